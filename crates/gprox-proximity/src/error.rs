//! Error types for proximity computations.

use thiserror::Error;

/// Errors that can occur while computing proximity rasters.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProximityError {
    #[error("Invalid radius: {0}")]
    InvalidRadius(String),

    #[error("Invalid value map: {0}")]
    InvalidValueMap(String),

    #[error("Invalid kernel: {0}")]
    InvalidKernel(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}
