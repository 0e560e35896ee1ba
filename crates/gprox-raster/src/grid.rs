//! Tile grid: footprints of the tiles a remote product is split into.

use crate::{BoundingBox, RasterError, Result};
use geo::{Intersects, MultiPolygon, Polygon};
use geojson::GeoJson;
use std::path::Path;

/// One tile of a grid: its identifier and geographic footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct TileFeature {
    /// Tile identifier, e.g. `N45E009`.
    pub id: String,
    /// Footprint in EPSG:4326.
    pub footprint: MultiPolygon<f64>,
}

impl TileFeature {
    /// Create a tile feature from a single polygon footprint.
    pub fn new(id: impl Into<String>, footprint: Polygon<f64>) -> Self {
        Self {
            id: id.into(),
            footprint: MultiPolygon::new(vec![footprint]),
        }
    }

    /// Check if the footprint intersects a bounding box (touching counts).
    pub fn intersects(&self, bbox: &BoundingBox) -> bool {
        self.footprint.intersects(&bbox.to_polygon())
    }
}

/// An ordered, read-only collection of tile footprints.
#[derive(Debug, Clone, Default)]
pub struct TileGrid {
    features: Vec<TileFeature>,
}

impl TileGrid {
    /// Build a grid from already-constructed features.
    pub fn new(features: Vec<TileFeature>) -> Self {
        Self { features }
    }

    /// Parse a GeoJSON FeatureCollection, taking tile ids from `id_property`.
    ///
    /// Polygon and MultiPolygon geometries are accepted. Features without a
    /// geometry are skipped; a feature lacking the id property is an error.
    pub fn from_geojson_str(doc: &str, id_property: &str) -> Result<Self> {
        let geojson: GeoJson = doc
            .parse()
            .map_err(|e: geojson::Error| RasterError::InvalidGrid(e.to_string()))?;

        let collection = match geojson {
            GeoJson::FeatureCollection(fc) => fc,
            other => {
                return Err(RasterError::InvalidGrid(format!(
                    "expected a FeatureCollection, found {}",
                    geojson_kind(&other)
                )))
            }
        };

        let mut features = Vec::with_capacity(collection.features.len());
        for (index, feature) in collection.features.into_iter().enumerate() {
            let id = match feature.property(id_property) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Number(n)) => n.to_string(),
                Some(other) => {
                    return Err(RasterError::InvalidGrid(format!(
                        "feature {} has non-scalar '{}' property: {}",
                        index, id_property, other
                    )))
                }
                None => {
                    return Err(RasterError::InvalidGrid(format!(
                        "feature {} is missing the '{}' property",
                        index, id_property
                    )))
                }
            };

            let Some(geometry) = feature.geometry else {
                tracing::debug!(tile = %id, "skipping grid feature without geometry");
                continue;
            };

            let geometry = geo::Geometry::<f64>::try_from(geometry)
                .map_err(|e| RasterError::InvalidGrid(format!("tile {}: {}", id, e)))?;

            let footprint = match geometry {
                geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                geo::Geometry::MultiPolygon(mp) => mp,
                _ => {
                    return Err(RasterError::InvalidGrid(format!(
                        "tile {} has a non-polygonal footprint",
                        id
                    )))
                }
            };

            features.push(TileFeature { id, footprint });
        }

        tracing::debug!(tiles = features.len(), "parsed tile grid");
        Ok(Self { features })
    }

    /// Read and parse a GeoJSON grid file.
    pub fn from_path<P: AsRef<Path>>(path: P, id_property: &str) -> Result<Self> {
        let doc = std::fs::read_to_string(path.as_ref())?;
        Self::from_geojson_str(&doc, id_property)
    }

    /// All features, in document order.
    pub fn features(&self) -> &[TileFeature] {
        &self.features
    }

    /// Number of tiles in the grid.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Check if the grid has no tiles.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features whose footprint intersects the box, in grid order.
    pub fn resolve(&self, bbox: &BoundingBox) -> Result<Vec<&TileFeature>> {
        bbox.validate()?;
        Ok(self.features.iter().filter(|f| f.intersects(bbox)).collect())
    }
}

/// Resolve the ids of all tiles intersecting a bounding box.
///
/// The result preserves grid order and is empty (not an error) when nothing
/// intersects. The intersection test is planar in degrees.
pub fn resolve_tiles(grid: &TileGrid, bbox: &BoundingBox) -> Result<Vec<String>> {
    let ids: Vec<String> = grid
        .resolve(bbox)?
        .into_iter()
        .map(|f| f.id.clone())
        .collect();

    tracing::debug!(
        west = bbox.west(),
        south = bbox.south(),
        east = bbox.east(),
        north = bbox.north(),
        tiles = ids.len(),
        "resolved tiles"
    );
    Ok(ids)
}

fn geojson_kind(doc: &GeoJson) -> &'static str {
    match doc {
        GeoJson::Geometry(_) => "a Geometry",
        GeoJson::Feature(_) => "a Feature",
        GeoJson::FeatureCollection(_) => "a FeatureCollection",
    }
}
