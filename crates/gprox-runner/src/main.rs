//! `gprox` command line.
//!
//! ```bash
//! gprox run --config gprox.yaml --meter-radius 500
//! gprox tiles --config gprox.yaml
//! ```

use clap::{Args, Parser, Subcommand};
use gprox_runner::{ConfigOverrides, Pipeline, PipelineConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gprox")]
#[command(about = "Share of a land-cover class within a radius of every cell", version)]
struct Cli {
    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the whole pipeline and write the output rasters
    Run(RunArgs),
    /// Resolve and download the tiles covering the area only
    Tiles(ConfigArgs),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Pipeline configuration (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// First corner as LAT LON
    #[arg(long, num_args = 2, value_names = ["LAT", "LON"], allow_negative_numbers = true)]
    point1: Option<Vec<f64>>,

    /// Opposite corner as LAT LON
    #[arg(long, num_args = 2, value_names = ["LAT", "LON"], allow_negative_numbers = true)]
    point2: Option<Vec<f64>>,

    /// Reuse cached tiles without checking the remote store
    #[arg(long)]
    trust_cache: bool,

    /// Stream tiles into memory without caching them
    #[arg(long, conflicts_with = "trust_cache")]
    disable_cache: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    common: ConfigArgs,

    /// Neighbourhood radius in metres
    #[arg(short = 'r', long)]
    meter_radius: Option<f64>,

    /// Output directory (`*date_time*` is replaced by the run time)
    #[arg(short, long)]
    output: Option<String>,
}

fn corner(values: Option<&[f64]>) -> Option<[f64; 2]> {
    match values? {
        [lat, lon] => Some([*lat, *lon]),
        _ => None,
    }
}

impl ConfigArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            point1: corner(self.point1.as_deref()),
            point2: corner(self.point2.as_deref()),
            trust_cache: self.trust_cache,
            disable_cache: self.disable_cache,
            ..Default::default()
        }
    }
}

fn load(args: &ConfigArgs, extra: impl FnOnce(&mut ConfigOverrides)) -> gprox_runner::Result<Pipeline> {
    let mut config = PipelineConfig::from_path(&args.config)?;
    let mut overrides = args.overrides();
    extra(&mut overrides);
    config.apply(&overrides);
    Pipeline::new(config)
}

fn run(cli: Cli) -> gprox_runner::Result<()> {
    match cli.command {
        Command::Run(args) => {
            let pipeline = load(&args.common, |o| {
                o.meter_radius = args.meter_radius;
                o.output = args.output.clone();
            })?;
            let report = pipeline.run()?;

            println!("Output:      {}", report.output_dir.display());
            if let Some(path) = &report.landcover_path {
                println!("Land cover:  {}", path.display());
            }
            println!("Percentage:  {}", report.percentage_path.display());
            println!(
                "Raster:      {} x {} cells of {:.2} x {:.2} m",
                report.width, report.height, report.resolution_m.0, report.resolution_m.1
            );
            println!("Radius:      {} cells", report.radius_cells);
            println!(
                "Percentage:  mean {:.2}%, max {:.2}%",
                report.mean_percentage, report.max_percentage
            );
            if let Some(stats) = report.download_stats {
                println!(
                    "Tiles:       {} downloaded ({} bytes), {} cache hits",
                    stats.tiles_downloaded, stats.bytes_downloaded, stats.cache_hits
                );
                if stats.unvalidated > 0 {
                    println!("             {} reused without a remote version", stats.unvalidated);
                }
            }
            println!("Elapsed:     {:.2}s", report.elapsed.as_secs_f64());
        }
        Command::Tiles(args) => {
            let pipeline = load(&args, |_| {})?;
            let references = pipeline.prefetch()?;
            for reference in &references {
                println!("{}\t{:?}", reference.id, reference.state);
            }
            if let Some(stats) = pipeline.download_stats() {
                println!(
                    "{} tiles: {} downloaded ({} bytes), {} cache hits",
                    references.len(),
                    stats.tiles_downloaded,
                    stats.bytes_downloaded,
                    stats.cache_hits
                );
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt().with_env_filter(filter).with_target(false).init();

    gprox_metrics::describe_metrics();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
