//! Percentage of target cells within a radius.

use crate::fft::FftConvolver;
use crate::kernel::{validate_radius, KernelShape};
use crate::{ProximityError, Result};
use gprox_metrics::metric_defs;
use ndarray::{Array2, ArrayBase, Data, Ix2, Zip};
use std::time::Instant;

/// Denominators at or below this are treated as empty neighbourhoods.
pub const MIN_DENOMINATOR: f64 = 1e-9;

/// Which cells count towards the numerator, and how much.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSelector {
    /// Cells equal to the value count fully.
    Value(f64),
    /// Each listed value counts with its weight in `[0, 1]`.
    Weighted(Vec<(f64, f64)>),
}

impl TargetSelector {
    pub fn validate(&self) -> Result<()> {
        match self {
            TargetSelector::Value(v) if !v.is_finite() => Err(ProximityError::InvalidValueMap(
                format!("target value must be finite, got {v}"),
            )),
            TargetSelector::Value(_) => Ok(()),
            TargetSelector::Weighted(map) => {
                if map.is_empty() {
                    return Err(ProximityError::InvalidValueMap(
                        "value map is empty".to_string(),
                    ));
                }
                for (i, &(value, weight)) in map.iter().enumerate() {
                    if !value.is_finite() {
                        return Err(ProximityError::InvalidValueMap(format!(
                            "value {value} is not finite"
                        )));
                    }
                    if !(0.0..=1.0).contains(&weight) {
                        return Err(ProximityError::InvalidValueMap(format!(
                            "weight {weight} for value {value} is outside [0, 1]"
                        )));
                    }
                    if map[..i].iter().any(|&(v, _)| v == value) {
                        return Err(ProximityError::InvalidValueMap(format!(
                            "value {value} listed twice"
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    /// Contribution of a cell holding `value`.
    pub fn weight_of(&self, value: f64) -> f64 {
        match self {
            TargetSelector::Value(v) => {
                if value == *v {
                    1.0
                } else {
                    0.0
                }
            }
            TargetSelector::Weighted(map) => map
                .iter()
                .find(|(v, _)| *v == value)
                .map_or(0.0, |&(_, w)| w),
        }
    }
}

impl From<f64> for TargetSelector {
    fn from(value: f64) -> Self {
        TargetSelector::Value(value)
    }
}

/// Parameters of one proximity computation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityConfig {
    pub target: TargetSelector,
    pub radius_cells: usize,
    pub kernel: KernelShape,
    /// Cells equal to this are left out of both numerator and denominator.
    pub nodata: Option<f64>,
}

impl ProximityConfig {
    /// Disk kernel, no nodata handling.
    pub fn new(target: impl Into<TargetSelector>, radius_cells: usize) -> Self {
        Self {
            target: target.into(),
            radius_cells,
            kernel: KernelShape::Disk,
            nodata: None,
        }
    }

    pub fn with_kernel(mut self, kernel: KernelShape) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_radius(self.radius_cells)?;
        self.kernel.validate()?;
        self.target.validate()
    }

    fn is_valid(&self, value: f64) -> bool {
        match self.nodata {
            Some(nd) if nd.is_nan() => !value.is_nan(),
            Some(nd) => value != nd,
            None => true,
        }
    }
}

/// Percentage of `target_value` cells within a hard disk of `radius_cells`.
///
/// Shorthand for [`percentage_near_with`] with a default [`ProximityConfig`].
pub fn percentage_near<S>(
    band: &ArrayBase<S, Ix2>,
    target_value: f64,
    radius_cells: usize,
) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
{
    percentage_near_with(band, &ProximityConfig::new(target_value, radius_cells))
}

/// Percentage of (weighted) target cells in each cell's neighbourhood.
///
/// The result has the band's shape with values in `[0, 100]`. Cells whose
/// neighbourhood holds no valid cells are 0.
pub fn percentage_near_with<S>(band: &ArrayBase<S, Ix2>, config: &ProximityConfig) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
{
    config.validate()?;

    let shape = band.dim();
    if shape.0 == 0 || shape.1 == 0 {
        return Ok(Array2::zeros(shape));
    }

    let start = Instant::now();
    let kernel = config.kernel.build(config.radius_cells)?;
    let convolver = FftConvolver::new(&kernel, shape)?;

    let valid = band.mapv(|v| if config.is_valid(v) { 1.0 } else { 0.0 });
    let indicator = Zip::from(band)
        .and(&valid)
        .map_collect(|&v, &ok| ok * config.target.weight_of(v));

    let (numerator, denominator) = convolver.convolve_pair(&indicator, &valid)?;
    let percentage = percentage_from_counts(&numerator, &denominator)?;

    let elapsed = start.elapsed();
    metrics::histogram!(metric_defs::PROXIMITY_DURATION.name, "kernel" => config.kernel.name())
        .record(elapsed.as_secs_f64() * 1000.0);
    tracing::info!(
        rows = shape.0,
        cols = shape.1,
        radius_cells = config.radius_cells,
        kernel = %config.kernel,
        padded = ?convolver.padded_shape(),
        elapsed_ms = elapsed.as_millis() as u64,
        "proximity computed"
    );

    Ok(percentage)
}

/// `100 · numerator / denominator`, clamped to `[0, 100]`.
///
/// Cells whose denominator is at most [`MIN_DENOMINATOR`] are 0.
pub fn percentage_from_counts<S, T>(
    numerator: &ArrayBase<S, Ix2>,
    denominator: &ArrayBase<T, Ix2>,
) -> Result<Array2<f64>>
where
    S: Data<Elem = f64>,
    T: Data<Elem = f64>,
{
    if numerator.dim() != denominator.dim() {
        return Err(ProximityError::ShapeMismatch {
            expected: numerator.dim(),
            actual: denominator.dim(),
        });
    }

    Ok(Zip::from(numerator)
        .and(denominator)
        .map_collect(|&num, &den| {
            if den <= MIN_DENOMINATOR || !num.is_finite() {
                0.0
            } else {
                (100.0 * num / den).clamp(0.0, 100.0)
            }
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_uniform_band_is_full() {
        let band = Array2::from_elem((12, 9), 10.0);
        let out = percentage_near(&band, 10.0, 3).unwrap();
        assert_eq!(out.dim(), (12, 9));
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 100.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_absent_target_is_zero() {
        let band = Array2::from_elem((8, 8), 30.0);
        let out = percentage_near(&band, 10.0, 2).unwrap();
        for v in out.iter() {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_half_split() {
        // left half target, right half not
        let mut band = Array2::from_elem((9, 10), 0.0);
        band.slice_mut(ndarray::s![.., ..5]).fill(1.0);
        let out = percentage_near(&band, 1.0, 1).unwrap();

        // plus-shaped kernel at (4, 4): centre, up, down, left are target; right is not
        assert_abs_diff_eq!(out[[4, 4]], 80.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out[[4, 5]], 20.0, epsilon = 1e-6);
        // top-left corner sees 3 cells, all target
        assert_abs_diff_eq!(out[[0, 0]], 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_weighted_value_map() {
        let band = array![[10.0, 30.0, 50.0]];
        let config = ProximityConfig::new(
            TargetSelector::Weighted(vec![(10.0, 1.0), (30.0, 0.5)]),
            1,
        );
        let out = percentage_near_with(&band, &config).unwrap();
        // middle cell sees all three cells: (1 + 0.5 + 0) / 3
        assert_abs_diff_eq!(out[[0, 1]], 50.0, epsilon = 1e-6);
        // left edge sees two cells: (1 + 0.5) / 2
        assert_abs_diff_eq!(out[[0, 0]], 75.0, epsilon = 1e-6);
    }

    #[test]
    fn test_nodata_denominator() {
        let band = array![[10.0, 255.0, 30.0], [10.0, 255.0, 255.0]];
        let config = ProximityConfig::new(10.0, 1).with_nodata(Some(255.0));
        let out = percentage_near_with(&band, &config).unwrap();
        // (0, 1) neighbours: (0,0)=10, (0,2)=30, (1,1)=nodata, itself nodata
        assert_abs_diff_eq!(out[[0, 1]], 50.0, epsilon = 1e-6);
        // (1, 2) neighbours: (0,2)=30, (1,1) nodata, itself nodata
        assert_abs_diff_eq!(out[[1, 2]], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_all_nodata_gives_zero_not_nan() {
        let band = Array2::from_elem((5, 5), -1.0);
        let config = ProximityConfig::new(-1.0, 2).with_nodata(Some(-1.0));
        let out = percentage_near_with(&band, &config).unwrap();
        assert!(out.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_percentage_from_counts() {
        let num = array![[1.0, 2.0, 0.0, 5.0]];
        let den = array![[2.0, 0.0, 4.0, 4.0]];
        let out = percentage_from_counts(&num, &den).unwrap();
        assert_eq!(out, array![[50.0, 0.0, 0.0, 100.0]]);

        let short = array![[1.0]];
        assert!(matches!(
            percentage_from_counts(&num, &short),
            Err(ProximityError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        let band = Array2::from_elem((4, 4), 1.0);
        assert!(matches!(
            percentage_near(&band, 1.0, 0),
            Err(ProximityError::InvalidRadius(_))
        ));
        let empty_map = ProximityConfig::new(TargetSelector::Weighted(vec![]), 2);
        assert!(matches!(
            percentage_near_with(&band, &empty_map),
            Err(ProximityError::InvalidValueMap(_))
        ));
        let heavy = ProximityConfig::new(TargetSelector::Weighted(vec![(1.0, 1.5)]), 2);
        assert!(heavy.validate().is_err());
        let twice = TargetSelector::Weighted(vec![(1.0, 0.5), (1.0, 0.2)]);
        assert!(twice.validate().is_err());
    }

    #[test]
    fn test_empty_band() {
        let band = Array2::<f64>::zeros((0, 5));
        let out = percentage_near(&band, 1.0, 3).unwrap();
        assert_eq!(out.dim(), (0, 5));
    }
}
