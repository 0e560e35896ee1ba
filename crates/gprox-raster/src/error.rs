//! Error types for the raster crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving, fetching, stitching or writing rasters.
#[derive(Debug, Error)]
pub enum RasterError {
    /// Malformed bounding box (non-finite, empty, or out of range).
    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    /// Bounding box crosses the antimeridian.
    #[error("Bounding box crossing the antimeridian is not supported (west={west}, east={east})")]
    ZoneUnsupported {
        /// Requested west edge.
        west: f64,
        /// Requested east edge.
        east: f64,
    },

    /// No tile or source window covers the requested area.
    #[error("No coverage: {0}")]
    NoCoverage(String),

    /// Fetching an object from a remote store failed.
    #[error("Failed to download '{key}': {reason}")]
    DownloadFailed {
        /// Remote key of the object.
        key: String,
        /// Reason for failure.
        reason: String,
    },

    /// Sources being mosaicked disagree on band count, dtype, grid or CRS.
    #[error("Incompatible source '{source_name}': {reason}")]
    IncompatibleSources {
        /// Description of the offending source.
        source_name: String,
        /// What did not match.
        reason: String,
    },

    /// Writing an output raster failed.
    #[error("Failed to write '{path}': {reason}")]
    WriteFailed {
        /// Target path.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },

    /// An external raster provider failed.
    #[error("Raster provider error: {0}")]
    ProviderError(String),

    /// The tile grid document could not be parsed.
    #[error("Invalid tile grid: {0}")]
    InvalidGrid(String),

    /// Invalid GeoTIFF - missing or unusable georeferencing.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// Unsupported data type or sample layout in the TIFF file.
    #[error("Unsupported TIFF data type: {0}")]
    UnsupportedDataType(String),

    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// HTTP request error when talking to a remote store.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),
}

impl RasterError {
    pub(crate) fn download(key: &str, reason: impl std::fmt::Display) -> Self {
        RasterError::DownloadFailed {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn incompatible(source_name: &str, reason: impl Into<String>) -> Self {
        RasterError::IncompatibleSources {
            source_name: source_name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn write_failed(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        RasterError::WriteFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}
