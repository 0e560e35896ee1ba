//! Example: download the WorldCover tiles covering a box and write the mosaic.
//!
//! Usage: cargo run --example fetch_tiles -- <south> <west> <north> <east> [out.tif] [cache_dir]

use gprox_raster::worldcover::{self, WorldCoverVersion};
use gprox_raster::{write_geotiff, BoundingBox, CacheMode, RasterProvider};
use std::env;
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 5 {
        eprintln!("Usage: {} <south> <west> <north> <east> [out.tif] [cache_dir]", args[0]);
        eprintln!("Example: {} 45.40 9.10 45.55 9.30 milan.tif ./cache", args[0]);
        std::process::exit(1);
    }

    let coords = args[1..5]
        .iter()
        .map(|s| s.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()?;
    let output = args.get(5).map(|s| s.as_str()).unwrap_or("worldcover.tif");
    let cache_dir = args.get(6).map(|s| s.as_str()).unwrap_or("cache");

    let bbox = BoundingBox::from_corners((coords[0], coords[1]), (coords[2], coords[3]))?;

    let start = Instant::now();
    let provider = worldcover::provider(WorldCoverVersion::V200, cache_dir, CacheMode::Validate)?;
    println!("Loaded grid with {} tiles in {:.3}s", provider.grid().len(), start.elapsed().as_secs_f64());

    for reference in provider.references(&bbox)? {
        println!("  {} -> {} ({:?})", reference.id, reference.key, reference.state);
    }

    let start = Instant::now();
    let block = provider.provide(&bbox)?;
    let stats = provider.cache().stats();
    println!(
        "Mosaic {}x{} in {:.2}s ({} downloaded, {} bytes, {} cache hits)",
        block.width(),
        block.height(),
        start.elapsed().as_secs_f64(),
        stats.tiles_downloaded,
        stats.bytes_downloaded,
        stats.cache_hits
    );

    write_geotiff(&block, output, Some(&worldcover::colormap()))?;
    println!("Wrote {}", output);
    Ok(())
}
