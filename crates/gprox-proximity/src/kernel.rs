//! Neighbourhood kernels.

use crate::{ProximityError, Result};
use ndarray::Array2;

/// Largest radius accepted, in cells.
///
/// A kernel of this radius is already 8193 cells wide.
pub const MAX_RADIUS_CELLS: usize = 4096;

/// Weighting of a neighbour by its distance from the centre cell.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum KernelShape {
    /// 1 inside the circle `dx² + dy² ≤ r²`, 0 outside.
    #[default]
    Disk,
    /// Falls off linearly: `clamp((r - d) / r, 0, 1)`.
    Linear,
    /// `clamp(1 - (d / r)^omega, 0, 1)`. `omega = 1` is [`KernelShape::Linear`].
    Power { omega: f64 },
}

impl KernelShape {
    /// Short name used in logs and metric labels.
    pub fn name(&self) -> &'static str {
        match self {
            KernelShape::Disk => "disk",
            KernelShape::Linear => "linear",
            KernelShape::Power { .. } => "power",
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let KernelShape::Power { omega } = *self {
            if !omega.is_finite() || omega <= 0.0 {
                return Err(ProximityError::InvalidKernel(format!(
                    "power exponent must be positive and finite, got {omega}"
                )));
            }
        }
        Ok(())
    }

    /// Weight of the cell at offset `(dy, dx)` from the centre.
    pub fn weight(&self, dy: i64, dx: i64, radius: usize) -> f64 {
        let r = radius as f64;
        match *self {
            KernelShape::Disk => {
                let r2 = (radius * radius) as i64;
                if dx * dx + dy * dy <= r2 {
                    1.0
                } else {
                    0.0
                }
            }
            KernelShape::Linear => {
                let d = ((dx * dx + dy * dy) as f64).sqrt();
                ((r - d) / r).clamp(0.0, 1.0)
            }
            KernelShape::Power { omega } => {
                let d = ((dx * dx + dy * dy) as f64).sqrt();
                (1.0 - (d / r).powf(omega)).clamp(0.0, 1.0)
            }
        }
    }

    /// Build the `(2r + 1) × (2r + 1)` weight matrix.
    pub fn build(&self, radius_cells: usize) -> Result<Array2<f64>> {
        validate_radius(radius_cells)?;
        self.validate()?;

        let size = 2 * radius_cells + 1;
        let r = radius_cells as i64;
        Ok(Array2::from_shape_fn((size, size), |(i, j)| {
            self.weight(i as i64 - r, j as i64 - r, radius_cells)
        }))
    }
}

impl std::fmt::Display for KernelShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelShape::Power { omega } => write!(f, "power(omega={omega})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Reject radii outside `1..=MAX_RADIUS_CELLS`.
pub fn validate_radius(radius_cells: usize) -> Result<()> {
    if radius_cells == 0 {
        return Err(ProximityError::InvalidRadius(
            "radius must be at least one cell".to_string(),
        ));
    }
    if radius_cells > MAX_RADIUS_CELLS {
        return Err(ProximityError::InvalidRadius(format!(
            "{radius_cells} cells exceeds the maximum of {MAX_RADIUS_CELLS}"
        )));
    }
    Ok(())
}

/// Convert a radius in metres to whole cells, rounding to nearest.
pub fn radius_cells_from_meters(meters: f64, cell_size_m: f64) -> Result<usize> {
    if !meters.is_finite() || meters <= 0.0 {
        return Err(ProximityError::InvalidRadius(format!(
            "radius must be a positive number of metres, got {meters}"
        )));
    }
    if !cell_size_m.is_finite() || cell_size_m <= 0.0 {
        return Err(ProximityError::InvalidRadius(format!(
            "cell size must be a positive number of metres, got {cell_size_m}"
        )));
    }

    let cells = (meters / cell_size_m).round();
    if cells < 1.0 {
        return Err(ProximityError::InvalidRadius(format!(
            "{meters} m is less than half a {cell_size_m} m cell"
        )));
    }
    if cells > MAX_RADIUS_CELLS as f64 {
        return Err(ProximityError::InvalidRadius(format!(
            "{meters} m is {cells} cells of {cell_size_m} m, over the maximum of {MAX_RADIUS_CELLS}"
        )));
    }
    Ok(cells as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_disk_kernel() {
        let k = KernelShape::Disk.build(1).unwrap();
        assert_eq!(k.dim(), (3, 3));
        // radius 1 disk is a plus sign
        assert_eq!(k.sum(), 5.0);
        assert_eq!(k[[0, 0]], 0.0);
        assert_eq!(k[[1, 1]], 1.0);
        assert_eq!(k[[0, 1]], 1.0);

        let k = KernelShape::Disk.build(3).unwrap();
        assert_eq!(k.sum(), 29.0);
    }

    #[test]
    fn test_linear_kernel() {
        let k = KernelShape::Linear.build(2).unwrap();
        assert_eq!(k[[2, 2]], 1.0);
        assert_relative_eq!(k[[2, 3]], 0.5);
        assert_eq!(k[[2, 4]], 0.0);
        assert_eq!(k[[0, 0]], 0.0);
    }

    #[test]
    fn test_power_one_matches_linear() {
        let linear = KernelShape::Linear.build(5).unwrap();
        let power = KernelShape::Power { omega: 1.0 }.build(5).unwrap();
        for (a, b) in linear.iter().zip(power.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_power_rejects_bad_omega() {
        assert!(matches!(
            KernelShape::Power { omega: 0.0 }.build(3),
            Err(ProximityError::InvalidKernel(_))
        ));
        assert!(KernelShape::Power { omega: f64::NAN }.validate().is_err());
    }

    #[test]
    fn test_radius_limits() {
        assert!(matches!(
            KernelShape::Disk.build(0),
            Err(ProximityError::InvalidRadius(_))
        ));
        assert!(validate_radius(MAX_RADIUS_CELLS).is_ok());
        assert!(validate_radius(MAX_RADIUS_CELLS + 1).is_err());
    }

    #[test]
    fn test_radius_from_meters() {
        assert_eq!(radius_cells_from_meters(300.0, 10.0).unwrap(), 30);
        assert_eq!(radius_cells_from_meters(304.0, 10.0).unwrap(), 30);
        assert_eq!(radius_cells_from_meters(305.0, 10.0).unwrap(), 31);
        assert!(radius_cells_from_meters(4.0, 10.0).is_err());
        assert!(radius_cells_from_meters(-1.0, 10.0).is_err());
        assert!(radius_cells_from_meters(100.0, 0.0).is_err());
        assert!(radius_cells_from_meters(f64::INFINITY, 10.0).is_err());
        assert!(radius_cells_from_meters(1.0e9, 1.0).is_err());
    }

    #[test]
    fn test_kernel_names() {
        assert_eq!(KernelShape::default(), KernelShape::Disk);
        assert_eq!(KernelShape::Linear.to_string(), "linear");
        assert_eq!(KernelShape::Power { omega: 2.0 }.to_string(), "power(omega=2)");
    }
}
