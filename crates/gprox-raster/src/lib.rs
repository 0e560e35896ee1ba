//! # gprox-raster
//!
//! Tile resolution, caching, mosaicking and GeoTIFF output for land-cover rasters.
//!
//! This crate covers everything between a geographic bounding box and a
//! single clipped raster on disk:
//! - [`TileGrid`] / [`resolve_tiles`]: which tiles of a GeoJSON grid cover a box
//! - [`TileCache`]: idempotent, atomically written local copies of remote tiles
//! - [`stitch`]: merge windows of several GeoTIFF sources into one [`RasterBlock`]
//! - [`write_geotiff`]: transactional GeoTIFF output with an optional colormap
//!
//! ## Overview
//!
//! Land-cover products such as ESA WorldCover are published as 3x3 degree
//! GeoTIFF tiles in a public bucket, with a GeoJSON grid describing the tile
//! footprints. A [`TiledProvider`] chains the pieces together:
//!
//! ```no_run
//! use gprox_raster::{worldcover, BoundingBox, CacheMode, RasterProvider};
//!
//! let bbox = BoundingBox::from_corners((45.0, 9.0), (46.0, 10.0))?;
//! let provider = worldcover::provider(
//!     worldcover::WorldCoverVersion::V200,
//!     "./cache",
//!     CacheMode::Validate,
//! )?;
//!
//! let block = provider.provide(&bbox)?;
//! println!("{} x {} pixels", block.width(), block.height());
//! # Ok::<(), gprox_raster::RasterError>(())
//! ```
//!
//! ### Local files
//!
//! ```no_run
//! use gprox_raster::{write_geotiff, BoundingBox, LocalFileProvider, RasterProvider};
//!
//! let bbox = BoundingBox::new(9.0, 45.0, 10.0, 46.0)?;
//! let provider = LocalFileProvider::new("landcover.tif");
//! let block = provider.provide(&bbox)?;
//! write_geotiff(&block, "clipped.tif", block.colormap())?;
//! # Ok::<(), gprox_raster::RasterError>(())
//! ```

mod bbox;
mod cache;
mod colormap;
mod error;
mod geotiff;
mod grid;
mod mosaic;
mod provider;
mod raster;
mod writer;

pub mod worldcover;

pub use bbox::BoundingBox;
pub use cache::{
    CacheMode, DirectoryStore, DownloadStats, HttpStore, ObjectVersion, RemoteStore, TileCache,
    TileReference, TileState,
};
pub use colormap::ColorMap;
pub use error::RasterError;
pub use grid::{resolve_tiles, TileFeature, TileGrid};
pub use mosaic::{stitch, stitch_with, MosaicOptions, TransformPolicy};
pub use provider::{LocalFileProvider, RasterProvider, TiledProvider};
pub use geotiff::GeoTiffSource;
pub use raster::{
    resolution_meters, Crs, DataType, GeoTransform, MemorySource, PixelWindow, RasterBlock,
    RasterMeta, RasterSource,
};
pub use writer::{write_geotiff, write_matrix, GeoTiffWriter};

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
