//! Geographic bounding box in EPSG:4326.

use crate::{RasterError, Result};
use geo::{Coord, Polygon, Rect};

/// An axis-aligned bounding box in geographic coordinates (EPSG:4326).
///
/// Always satisfies `west < east` and `south < north`. Boxes crossing the
/// antimeridian cannot be represented and are rejected with
/// [`RasterError::ZoneUnsupported`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

impl BoundingBox {
    /// Create a bounding box from its four edges.
    ///
    /// `west > east` is read as a box wrapping across ±180° and fails with
    /// `ZoneUnsupported`; any other malformed input fails with
    /// `InvalidBoundingBox`.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        let bbox = Self {
            west,
            south,
            east,
            north,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Build a box from two corner points given as `(lat, lon)`.
    ///
    /// The corners may be supplied in any order; min/max are normalised.
    pub fn from_corners(point1: (f64, f64), point2: (f64, f64)) -> Result<Self> {
        let (lat1, lon1) = point1;
        let (lat2, lon2) = point2;
        Self::new(lon1.min(lon2), lat1.min(lat2), lon1.max(lon2), lat1.max(lat2))
    }

    /// Construct without validation, for exercising validation in callers.
    #[cfg(test)]
    pub(crate) fn unchecked(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Check the box invariants.
    pub fn validate(&self) -> Result<()> {
        let edges = [self.west, self.south, self.east, self.north];
        if edges.iter().any(|v| !v.is_finite()) {
            return Err(RasterError::InvalidBoundingBox(format!(
                "non-finite edge in {:?}",
                edges
            )));
        }

        if self.west < -180.0 || self.east > 180.0 || self.west > self.east {
            return Err(RasterError::ZoneUnsupported {
                west: self.west,
                east: self.east,
            });
        }

        if self.south < -90.0 || self.north > 90.0 {
            return Err(RasterError::InvalidBoundingBox(format!(
                "latitude out of range: south={}, north={}",
                self.south, self.north
            )));
        }

        if self.west == self.east || self.south >= self.north {
            return Err(RasterError::InvalidBoundingBox(format!(
                "empty box: west={}, south={}, east={}, north={}",
                self.west, self.south, self.east, self.north
            )));
        }

        Ok(())
    }

    /// West edge (minimum longitude).
    pub fn west(&self) -> f64 {
        self.west
    }

    /// South edge (minimum latitude).
    pub fn south(&self) -> f64 {
        self.south
    }

    /// East edge (maximum longitude).
    pub fn east(&self) -> f64 {
        self.east
    }

    /// North edge (maximum latitude).
    pub fn north(&self) -> f64 {
        self.north
    }

    /// Width in degrees of longitude.
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Height in degrees of latitude.
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Latitude of the box centre.
    pub fn center_lat(&self) -> f64 {
        (self.south + self.north) / 2.0
    }

    /// The box as a `geo` rectangle.
    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }

    /// The box as a closed `geo` polygon.
    pub fn to_polygon(&self) -> Polygon<f64> {
        self.to_rect().to_polygon()
    }

    /// Check if another box overlaps this one (shared edges count).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.west <= other.east
            && other.west <= self.east
            && self.south <= other.north
            && other.south <= self.north
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_corners_normalises_order() {
        let a = BoundingBox::from_corners((46.0, 9.0), (45.0, 10.0)).unwrap();
        let b = BoundingBox::from_corners((45.0, 10.0), (46.0, 9.0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.west(), 9.0);
        assert_eq!(a.south(), 45.0);
        assert_eq!(a.east(), 10.0);
        assert_eq!(a.north(), 46.0);
    }

    #[test]
    fn test_empty_box_is_invalid() {
        assert!(matches!(
            BoundingBox::new(9.0, 45.0, 9.0, 46.0),
            Err(RasterError::InvalidBoundingBox(_))
        ));
        assert!(matches!(
            BoundingBox::new(9.0, 46.0, 10.0, 46.0),
            Err(RasterError::InvalidBoundingBox(_))
        ));
    }

    #[test]
    fn test_non_finite_is_invalid() {
        assert!(matches!(
            BoundingBox::new(f64::NAN, 45.0, 10.0, 46.0),
            Err(RasterError::InvalidBoundingBox(_))
        ));
    }

    #[test]
    fn test_latitude_out_of_range() {
        assert!(matches!(
            BoundingBox::new(9.0, -91.0, 10.0, 46.0),
            Err(RasterError::InvalidBoundingBox(_))
        ));
    }

    #[test]
    fn test_antimeridian_is_unsupported() {
        assert!(matches!(
            BoundingBox::new(179.0, 10.0, -179.0, 11.0),
            Err(RasterError::ZoneUnsupported { .. })
        ));
        assert!(matches!(
            BoundingBox::from_corners((10.0, 179.5), (11.0, 181.0)),
            Err(RasterError::ZoneUnsupported { .. })
        ));
    }

    #[test]
    fn test_polygon_matches_edges() {
        let bbox = BoundingBox::new(9.0, 45.0, 10.0, 46.0).unwrap();
        let rect = bbox.to_rect();
        assert_eq!(rect.min().x, 9.0);
        assert_eq!(rect.max().y, 46.0);
        assert_eq!(bbox.to_polygon().exterior().0.len(), 5);
    }
}
