//! ESA WorldCover 10 m land-cover preset.
//!
//! The product is published as 3x3 degree GeoTIFF tiles in a public S3
//! bucket, alongside a GeoJSON grid whose `ll_tile` property names each tile
//! (e.g. `N45E009`).

use crate::{CacheMode, ColorMap, HttpStore, Result, TileCache, TiledProvider};
use std::path::Path;
use std::sync::Arc;

/// Public bucket serving the product over plain HTTPS.
pub const BUCKET_URL: &str = "https://esa-worldcover.s3.eu-central-1.amazonaws.com";
/// Key of the tile footprint grid.
pub const GRID_KEY: &str = "esa_worldcover_grid.geojson";
/// Grid property holding the tile id.
pub const ID_PROPERTY: &str = "ll_tile";

pub const NO_DATA: u8 = 0;
pub const TREE_COVER: u8 = 10;
pub const SHRUBLAND: u8 = 20;
pub const GRASSLAND: u8 = 30;
pub const CROPLAND: u8 = 40;
pub const BUILT_UP: u8 = 50;
pub const BARE_SPARSE_VEGETATION: u8 = 60;
pub const SNOW_AND_ICE: u8 = 70;
pub const PERMANENT_WATER: u8 = 80;
pub const HERBACEOUS_WETLAND: u8 = 90;
pub const MANGROVES: u8 = 95;
pub const MOSS_AND_LICHEN: u8 = 100;

/// Every land-cover class, in legend order.
pub const CLASSES: [u8; 11] = [
    TREE_COVER,
    SHRUBLAND,
    GRASSLAND,
    CROPLAND,
    BUILT_UP,
    BARE_SPARSE_VEGETATION,
    SNOW_AND_ICE,
    PERMANENT_WATER,
    HERBACEOUS_WETLAND,
    MANGROVES,
    MOSS_AND_LICHEN,
];

/// Product release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorldCoverVersion {
    /// 2020 map.
    V100,
    /// 2021 map.
    #[default]
    V200,
}

impl WorldCoverVersion {
    /// Reference year of the map.
    pub fn year(self) -> u16 {
        match self {
            Self::V100 => 2020,
            Self::V200 => 2021,
        }
    }

    /// Version tag used in object keys.
    pub fn tag(self) -> &'static str {
        match self {
            Self::V100 => "v100",
            Self::V200 => "v200",
        }
    }

    /// Release for a reference year.
    pub fn from_year(year: u16) -> Option<Self> {
        match year {
            2020 => Some(Self::V100),
            2021 => Some(Self::V200),
            _ => None,
        }
    }

    /// Key template with a `{tile}` placeholder.
    pub fn key_template(self) -> String {
        format!(
            "{tag}/{year}/map/ESA_WorldCover_10m_{year}_{tag}_{{tile}}_Map.tif",
            tag = self.tag(),
            year = self.year()
        )
    }
}

/// Object key of a single tile.
pub fn tile_key(version: WorldCoverVersion, tile: &str) -> String {
    version
        .key_template()
        .replace(TiledProvider::TILE_PLACEHOLDER, tile)
}

/// Human-readable class name.
pub fn class_name(value: u8) -> Option<&'static str> {
    Some(match value {
        TREE_COVER => "Tree cover",
        SHRUBLAND => "Shrubland",
        GRASSLAND => "Grassland",
        CROPLAND => "Cropland",
        BUILT_UP => "Built-up",
        BARE_SPARSE_VEGETATION => "Bare / sparse vegetation",
        SNOW_AND_ICE => "Snow and ice",
        PERMANENT_WATER => "Permanent water bodies",
        HERBACEOUS_WETLAND => "Herbaceous wetland",
        MANGROVES => "Mangroves",
        MOSS_AND_LICHEN => "Moss and lichen",
        _ => return None,
    })
}

/// Official legend colours.
pub fn colormap() -> ColorMap {
    ColorMap::new()
        .with(NO_DATA, [0, 0, 0, 0])
        .with(TREE_COVER, [0, 100, 0, 255])
        .with(SHRUBLAND, [255, 187, 34, 255])
        .with(GRASSLAND, [255, 255, 76, 255])
        .with(CROPLAND, [240, 150, 255, 255])
        .with(BUILT_UP, [250, 0, 0, 255])
        .with(BARE_SPARSE_VEGETATION, [180, 180, 180, 255])
        .with(SNOW_AND_ICE, [240, 240, 240, 255])
        .with(PERMANENT_WATER, [0, 100, 200, 255])
        .with(HERBACEOUS_WETLAND, [0, 150, 160, 255])
        .with(MANGROVES, [0, 207, 117, 255])
        .with(MOSS_AND_LICHEN, [250, 230, 160, 255])
}

/// Provider reading WorldCover tiles from the public bucket.
pub fn provider<P: AsRef<Path>>(
    version: WorldCoverVersion,
    cache_dir: P,
    mode: CacheMode,
) -> Result<TiledProvider> {
    provider_with_store(version, cache_dir, mode, BUCKET_URL)
}

/// Like [`provider`] but against a mirror of the bucket.
pub fn provider_with_store<P: AsRef<Path>>(
    version: WorldCoverVersion,
    cache_dir: P,
    mode: CacheMode,
    base_url: &str,
) -> Result<TiledProvider> {
    let store = Arc::new(HttpStore::new(base_url)?);
    let cache = TileCache::new(cache_dir, store, mode)?;
    tracing::info!(version = version.tag(), year = version.year(), base_url, "WorldCover provider");
    TiledProvider::from_remote_grid(
        format!("worldcover_{}", version.year()),
        cache,
        GRID_KEY,
        ID_PROPERTY,
        version.key_template(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_keys() {
        assert_eq!(
            tile_key(WorldCoverVersion::V200, "N45E009"),
            "v200/2021/map/ESA_WorldCover_10m_2021_v200_N45E009_Map.tif"
        );
        assert_eq!(
            tile_key(WorldCoverVersion::V100, "S03W060"),
            "v100/2020/map/ESA_WorldCover_10m_2020_v100_S03W060_Map.tif"
        );
    }

    #[test]
    fn test_version_from_year() {
        assert_eq!(WorldCoverVersion::from_year(2020), Some(WorldCoverVersion::V100));
        assert_eq!(WorldCoverVersion::from_year(2021), Some(WorldCoverVersion::V200));
        assert_eq!(WorldCoverVersion::from_year(2019), None);
        assert_eq!(WorldCoverVersion::default().year(), 2021);
    }

    #[test]
    fn test_colormap_covers_every_class() {
        let cmap = colormap();
        for class in CLASSES {
            assert!(cmap.get(class).is_some(), "class {class} has no colour");
            assert!(class_name(class).is_some());
        }
        assert_eq!(cmap.get(TREE_COVER), Some([0, 100, 0, 255]));
        assert_eq!(cmap.len(), CLASSES.len() + 1);
        assert_eq!(class_name(7), None);
    }
}
