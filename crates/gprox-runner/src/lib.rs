//! # gprox-runner
//!
//! Turns a YAML [`PipelineConfig`] into a proximity raster:
//! provider → mosaic → [`percentage_near_with`](gprox_proximity::percentage_near_with)
//! → GeoTIFF outputs, reporting what was produced in a [`PipelineReport`].

pub mod config;
pub mod pipeline;

pub use config::{ConfigOverrides, PipelineConfig};
pub use pipeline::{Pipeline, PipelineReport};

use gprox_proximity::ProximityError;
use gprox_raster::RasterError;
use thiserror::Error;

/// Errors surfaced by the pipeline, tagged with the stage that failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    #[error("Proximity error: {0}")]
    Proximity(#[from] ProximityError),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
