//! Pipeline orchestration: provider → proximity → GeoTIFF outputs.

use crate::config::{PipelineConfig, SourceConfig, StoreConfig};
use crate::{PipelineError, Result};
use gprox_proximity::{percentage_near_with, radius_cells_from_meters, ProximityConfig};
use gprox_raster::worldcover::{self, WorldCoverVersion};
use gprox_raster::{
    resolution_meters, write_geotiff, write_matrix, BoundingBox, ColorMap, DataType,
    DirectoryStore, DownloadStats, HttpStore, LocalFileProvider, RasterBlock, RasterProvider,
    RemoteStore, TileCache, TileReference, TiledProvider,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// File name of the stitched classification raster.
pub const LANDCOVER_FILE: &str = "landcover.tif";
/// File name of the percentage raster.
pub const PERCENTAGE_FILE: &str = "gprox.tif";

/// Raster provider selected by the configuration.
enum Source {
    Tiled(TiledProvider),
    Local(LocalFileProvider),
    Custom(Box<dyn RasterProvider>),
}

impl Source {
    fn provider(&self) -> &dyn RasterProvider {
        match self {
            Source::Tiled(p) => p,
            Source::Local(p) => p,
            Source::Custom(p) => p.as_ref(),
        }
    }
}

/// A configured, validated pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    source: Source,
}

/// What a run produced.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub output_dir: PathBuf,
    pub landcover_path: Option<PathBuf>,
    pub percentage_path: PathBuf,
    pub width: usize,
    pub height: usize,
    /// Ground size of one cell `(x, y)` in metres.
    pub resolution_m: (f64, f64),
    pub radius_cells: usize,
    pub mean_percentage: f64,
    pub max_percentage: f64,
    /// Present for tiled sources.
    pub download_stats: Option<DownloadStats>,
    pub elapsed: Duration,
}

impl Pipeline {
    /// Validate `config` and build its provider.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let source = build_source(&config)?;
        Ok(Self { config, source })
    }

    /// Use `provider` in place of the configured source.
    pub fn with_provider(config: PipelineConfig, provider: Box<dyn RasterProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source: Source::Custom(provider),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Name of the active provider.
    pub fn provider_name(&self) -> &str {
        self.source.provider().name()
    }

    /// Tile cache statistics so far, for tiled sources.
    pub fn download_stats(&self) -> Option<DownloadStats> {
        match &self.source {
            Source::Tiled(p) => Some(p.cache().stats()),
            _ => None,
        }
    }

    /// Resolve and download the tiles of the area without processing them.
    pub fn prefetch(&self) -> Result<Vec<TileReference>> {
        let bbox = self.config.bbox()?;
        match &self.source {
            Source::Tiled(provider) => {
                let references = provider.materialize(&bbox)?;
                tracing::info!(tiles = references.len(), "prefetch complete");
                Ok(references)
            }
            _ => Err(PipelineError::Config(format!(
                "source '{}' is not tiled, nothing to prefetch",
                self.provider_name()
            ))),
        }
    }

    /// Run into the configured output directory, resolving `*date_time*` now.
    pub fn run(&self) -> Result<PipelineReport> {
        let output_dir = self.config.output_dir(&chrono::Local::now());
        self.run_into(&output_dir)
    }

    /// Run every stage, writing outputs into `output_dir`.
    pub fn run_into(&self, output_dir: &Path) -> Result<PipelineReport> {
        let start = Instant::now();
        let bbox = self.config.bbox()?;

        tracing::info!(
            provider = self.provider_name(),
            west = bbox.west(),
            south = bbox.south(),
            east = bbox.east(),
            north = bbox.north(),
            "stage: provide"
        );
        let block = self.source.provider().provide(&bbox)?;
        tracing::info!(width = block.width(), height = block.height(), bands = block.count(), "raster ready");

        let resolution_m = self.ground_resolution(&block, &bbox)?;
        let cell_size = (resolution_m.0 + resolution_m.1) / 2.0;
        let radius_cells = radius_cells_from_meters(self.config.proximity.meter_radius, cell_size)?;

        tracing::info!(
            meter_radius = self.config.proximity.meter_radius,
            cell_size_m = cell_size,
            radius_cells,
            kernel = %self.config.kernel(),
            "stage: proximity"
        );
        let band = block
            .band(0)
            .ok_or_else(|| PipelineError::Config("provider returned a raster with no bands".to_string()))?;
        let proximity = ProximityConfig {
            target: self.config.target()?,
            radius_cells,
            kernel: self.config.kernel(),
            nodata: self.config.proximity.nodata,
        };
        let percentage = percentage_near_with(&band, &proximity)?;

        tracing::info!(dir = %output_dir.display(), "stage: write");
        std::fs::create_dir_all(output_dir)?;

        let landcover_path = if self.config.output.write_landcover {
            let path = output_dir.join(LANDCOVER_FILE);
            write_geotiff(&block, &path, landcover_colormap(&block))?;
            Some(path)
        } else {
            None
        };

        let format = self.config.output.percentage_format;
        let gradient = ColorMap::green_gradient();
        let colormap = (format.data_type() == DataType::U8).then_some(&gradient);
        let percentage_path = write_matrix(
            &percentage,
            *block.transform(),
            block.meta().crs,
            format.data_type(),
            output_dir.join(PERCENTAGE_FILE),
            colormap,
        )?;

        let cells = percentage.len().max(1) as f64;
        let report = PipelineReport {
            output_dir: output_dir.to_path_buf(),
            landcover_path,
            percentage_path,
            width: block.width(),
            height: block.height(),
            resolution_m,
            radius_cells,
            mean_percentage: percentage.sum() / cells,
            max_percentage: percentage.iter().copied().fold(0.0, f64::max),
            download_stats: self.download_stats(),
            elapsed: start.elapsed(),
        };
        tracing::info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            mean_percentage = report.mean_percentage,
            "pipeline complete"
        );
        Ok(report)
    }

    fn ground_resolution(&self, block: &RasterBlock, bbox: &BoundingBox) -> Result<(f64, f64)> {
        if let Some([x, y]) = self.config.proximity.resolution_m {
            return Ok((x, y));
        }
        let crs = block.meta().crs;
        resolution_meters(block.transform(), crs, bbox.center_lat()).ok_or_else(|| {
            PipelineError::Config(format!(
                "cannot derive ground resolution for CRS {crs}; set proximity.resolution_m"
            ))
        })
    }
}

/// The block's own colormap, if the writer can attach it.
fn landcover_colormap(block: &RasterBlock) -> Option<&ColorMap> {
    let colormap = block.colormap()?;
    if block.count() == 1 && block.meta().dtype == DataType::U8 {
        Some(colormap)
    } else {
        tracing::warn!(
            bands = block.count(),
            dtype = %block.meta().dtype,
            "dropping source colormap, output is not single-band uint8"
        );
        None
    }
}

fn build_source(config: &PipelineConfig) -> Result<Source> {
    let mode = config.cache_mode();
    let cache_dir = &config.cache.dir;

    let source = match &config.source {
        SourceConfig::Worldcover { version, base_url } => {
            let version = WorldCoverVersion::from_year(*version).ok_or_else(|| {
                PipelineError::Config(format!("unknown WorldCover version {version}"))
            })?;
            let base_url = base_url.as_deref().unwrap_or(worldcover::BUCKET_URL);
            Source::Tiled(worldcover::provider_with_store(version, cache_dir, mode, base_url)?)
        }
        SourceConfig::Tiled {
            store,
            grid_key,
            id_property,
            key_template,
        } => {
            let store: Arc<dyn RemoteStore> = match store {
                StoreConfig::Http { base_url } => Arc::new(HttpStore::new(base_url.as_str())?),
                StoreConfig::Directory { path } => Arc::new(DirectoryStore::new(path)),
            };
            tracing::info!(store = %store.describe(), "tiled source");
            let cache = TileCache::new(cache_dir, store, mode)?;
            Source::Tiled(TiledProvider::from_remote_grid(
                "tiled",
                cache,
                grid_key,
                id_property,
                key_template.as_str(),
            )?)
        }
        SourceConfig::LocalFile { path, clip } => {
            Source::Local(LocalFileProvider::new(path).with_clip(*clip))
        }
    };
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gprox_raster::{Crs, GeoTransform, RasterError, RasterMeta};
    use ndarray::Array3;

    struct FixedProvider(RasterBlock);

    impl RasterProvider for FixedProvider {
        fn name(&self) -> &str {
            "fixed"
        }

        fn provide(&self, _bbox: &BoundingBox) -> gprox_raster::Result<RasterBlock> {
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    impl RasterProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn provide(&self, _bbox: &BoundingBox) -> gprox_raster::Result<RasterBlock> {
            Err(RasterError::ProviderError("quota exceeded".to_string()))
        }
    }

    fn config(doc_extra: &str) -> PipelineConfig {
        let doc = format!(
            r#"
area: {{ point1: [45.0, 9.0], point2: [45.001, 9.001] }}
source: {{ kind: local_file, path: unused.tif }}
proximity: {{ meter_radius: 30, target_value: 10{doc_extra} }}
"#
        );
        PipelineConfig::from_yaml_str(&doc).unwrap()
    }

    fn projected_block(value: f64) -> RasterBlock {
        let data = Array3::from_elem((1, 20, 20), value);
        let meta = RasterMeta::new(DataType::U8, 1, 20, 20).with_crs(Crs::Projected(32632));
        RasterBlock::new(data, GeoTransform::north_up(500_000.0, 5_000_000.0, 10.0, 10.0), meta)
    }

    #[test]
    fn test_run_with_projected_raster() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline =
            Pipeline::with_provider(config(""), Box::new(FixedProvider(projected_block(10.0)))).unwrap();
        let report = pipeline.run_into(dir.path()).unwrap();

        assert_eq!(report.radius_cells, 3);
        assert_eq!(report.resolution_m, (10.0, 10.0));
        assert_eq!((report.width, report.height), (20, 20));
        assert!((report.mean_percentage - 100.0).abs() < 1e-6);
        assert!(report.percentage_path.is_file());
        assert_eq!(report.landcover_path, Some(dir.path().join(LANDCOVER_FILE)));
        assert!(report.download_stats.is_none());
    }

    #[test]
    fn test_unknown_crs_needs_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut block = projected_block(10.0);
        block = RasterBlock::new(
            block.data().clone(),
            *block.transform(),
            block.meta().clone().with_crs(Crs::Unknown),
        );

        let pipeline = Pipeline::with_provider(config(""), Box::new(FixedProvider(block.clone()))).unwrap();
        assert!(matches!(pipeline.run_into(dir.path()), Err(PipelineError::Config(_))));

        let pipeline = Pipeline::with_provider(
            config(", resolution_m: [5.0, 5.0]"),
            Box::new(FixedProvider(block)),
        )
        .unwrap();
        assert_eq!(pipeline.run_into(dir.path()).unwrap().radius_cells, 6);
    }

    #[test]
    fn test_provider_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::with_provider(config(""), Box::new(FailingProvider)).unwrap();
        let err = pipeline.run_into(dir.path()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Raster(RasterError::ProviderError(_))
        ));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_prefetch_requires_tiled_source() {
        let pipeline =
            Pipeline::with_provider(config(""), Box::new(FixedProvider(projected_block(1.0)))).unwrap();
        assert!(matches!(pipeline.prefetch(), Err(PipelineError::Config(_))));
    }
}
