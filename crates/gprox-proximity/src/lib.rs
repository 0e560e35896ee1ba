//! # gprox-proximity
//!
//! Per-cell percentage of a land-cover class within a radius.
//!
//! For a classification band, [`percentage_near`] answers "what share of the
//! cells within `r` of this one are class X?" for every cell at once. Both the
//! count of target cells and the count of cells in the neighbourhood come
//! from FFT convolutions with the same kernel, so the cost is O(N log N)
//! whatever the radius, and cells near the raster edge are normalised by their
//! truncated neighbourhood rather than the full kernel area.
//!
//! ```
//! use gprox_proximity::{percentage_near, percentage_near_with, KernelShape, ProximityConfig};
//! use ndarray::Array2;
//!
//! let band = Array2::from_elem((16, 16), 10.0);
//! let pct = percentage_near(&band, 10.0, 3)?;
//! assert!((pct[[8, 8]] - 100.0).abs() < 1e-6);
//!
//! let config = ProximityConfig::new(10.0, 3).with_kernel(KernelShape::Linear);
//! let soft = percentage_near_with(&band, &config)?;
//! assert_eq!(soft.dim(), (16, 16));
//! # Ok::<(), gprox_proximity::ProximityError>(())
//! ```

mod error;
mod fft;
mod kernel;
mod proximity;

pub use error::ProximityError;
pub use fft::{convolve_direct, convolve_fft, FftConvolver};
pub use kernel::{radius_cells_from_meters, validate_radius, KernelShape, MAX_RADIUS_CELLS};
pub use proximity::{
    percentage_from_counts, percentage_near, percentage_near_with, ProximityConfig,
    TargetSelector, MIN_DENOMINATOR,
};

/// Result type for proximity operations.
pub type Result<T> = std::result::Result<T, ProximityError>;
