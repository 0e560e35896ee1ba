//! YAML pipeline configuration.
//!
//! ```yaml
//! area:
//!   point1: [45.45, 9.10]
//!   point2: [45.50, 9.25]
//! source:
//!   kind: worldcover
//!   version: 2021
//! cache:
//!   dir: ./cache
//!   mode: validate
//! proximity:
//!   meter_radius: 300
//!   target_value: 10
//!   kernel: disk
//! output:
//!   dir: output/gprox_*date_time*
//! ```

use crate::{PipelineError, Result};
use chrono::{DateTime, TimeZone};
use gprox_proximity::{radius_cells_from_meters, KernelShape, TargetSelector};
use gprox_raster::worldcover::WorldCoverVersion;
use gprox_raster::{BoundingBox, CacheMode, DataType, TiledProvider};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder in `output.dir` replaced by the run's local time.
pub const DATE_TIME_PLACEHOLDER: &str = "*date_time*";
/// Format of the substituted time.
pub const DATE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Complete configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub area: AreaConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub proximity: ProximitySettings,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Two opposite corners of the area of interest, each `[lat, lon]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AreaConfig {
    pub point1: [f64; 2],
    pub point2: [f64; 2],
}

/// Where the classification raster comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// ESA WorldCover from its public bucket (or a mirror).
    Worldcover {
        #[serde(default = "default_worldcover_year")]
        version: u16,
        #[serde(default)]
        base_url: Option<String>,
    },
    /// Any GeoTIFF tile set with a GeoJSON footprint grid.
    Tiled {
        #[serde(with = "serde_yaml::with::singleton_map")]
        store: StoreConfig,
        grid_key: String,
        id_property: String,
        key_template: String,
    },
    /// A single GeoTIFF on disk.
    LocalFile {
        path: PathBuf,
        #[serde(default = "default_true")]
        clip: bool,
    },
}

/// Remote store backing a tiled source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreConfig {
    Http { base_url: String },
    Directory { path: PathBuf },
}

/// Local tile cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub mode: CacheModeSetting,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            mode: CacheModeSetting::default(),
        }
    }
}

/// Serialized form of [`CacheMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheModeSetting {
    #[default]
    Validate,
    Trust,
    Disabled,
}

impl From<CacheModeSetting> for CacheMode {
    fn from(setting: CacheModeSetting) -> Self {
        match setting {
            CacheModeSetting::Validate => CacheMode::Validate,
            CacheModeSetting::Trust => CacheMode::Trust,
            CacheModeSetting::Disabled => CacheMode::Disabled,
        }
    }
}

/// Proximity computation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProximitySettings {
    /// Neighbourhood radius in metres.
    pub meter_radius: f64,
    /// Class whose share is computed. Exclusive with `value_map`.
    #[serde(default)]
    pub target_value: Option<f64>,
    /// `[value, weight]` pairs. Exclusive with `target_value`.
    #[serde(default)]
    pub value_map: Option<Vec<(f64, f64)>>,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub kernel: KernelSetting,
    /// Raster value excluded from numerator and denominator.
    #[serde(default)]
    pub nodata: Option<f64>,
    /// Ground size of a cell `[x, y]` in metres, overriding the raster's.
    #[serde(default)]
    pub resolution_m: Option<[f64; 2]>,
}

/// Serialized form of [`KernelShape`]: `disk`, `linear` or `{power: {omega: 2.0}}`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelSetting {
    #[default]
    Disk,
    Linear,
    Power { omega: f64 },
}

impl From<KernelSetting> for KernelShape {
    fn from(setting: KernelSetting) -> Self {
        match setting {
            KernelSetting::Disk => KernelShape::Disk,
            KernelSetting::Linear => KernelShape::Linear,
            KernelSetting::Power { omega } => KernelShape::Power { omega },
        }
    }
}

/// Output location and formats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Output directory; `*date_time*` is replaced by the run time.
    #[serde(default = "default_output_dir")]
    pub dir: String,
    /// Also write the stitched classification raster.
    #[serde(default = "default_true")]
    pub write_landcover: bool,
    #[serde(default)]
    pub percentage_format: PercentageFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            write_landcover: true,
            percentage_format: PercentageFormat::default(),
        }
    }
}

/// Sample type of the percentage raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PercentageFormat {
    /// Whole percentages with a green gradient colormap.
    #[default]
    U8,
    /// Unrounded percentages, no colormap.
    F32,
}

impl PercentageFormat {
    pub fn data_type(self) -> DataType {
        match self {
            PercentageFormat::U8 => DataType::U8,
            PercentageFormat::F32 => DataType::F32,
        }
    }
}

fn default_worldcover_year() -> u16 {
    WorldCoverVersion::default().year()
}

fn default_true() -> bool {
    true
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_output_dir() -> String {
    format!("output/gprox_{DATE_TIME_PLACEHOLDER}")
}

/// Command-line values that replace their configuration counterparts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub point1: Option<[f64; 2]>,
    pub point2: Option<[f64; 2]>,
    pub meter_radius: Option<f64>,
    pub trust_cache: bool,
    pub disable_cache: bool,
    pub output: Option<String>,
}

impl PipelineConfig {
    /// Parse a configuration document. Call [`PipelineConfig::validate`] before use.
    pub fn from_yaml_str(doc: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(doc)?)
    }

    /// Read and parse a configuration file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let doc = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!(path = %path.as_ref().display(), "loaded configuration");
        Self::from_yaml_str(&doc)
    }

    /// Apply command-line overrides.
    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(p) = overrides.point1 {
            self.area.point1 = p;
        }
        if let Some(p) = overrides.point2 {
            self.area.point2 = p;
        }
        if let Some(r) = overrides.meter_radius {
            self.proximity.meter_radius = r;
        }
        if overrides.trust_cache {
            self.cache.mode = CacheModeSetting::Trust;
        }
        // disabling wins over trusting
        if overrides.disable_cache {
            self.cache.mode = CacheModeSetting::Disabled;
        }
        if let Some(out) = &overrides.output {
            self.output.dir = out.clone();
        }
    }

    /// Check every setting before any stage runs.
    pub fn validate(&self) -> Result<()> {
        self.bbox()?;

        let radius = self.proximity.meter_radius;
        if !radius.is_finite() || radius <= 0.0 {
            return Err(PipelineError::Config(format!(
                "proximity.meter_radius must be positive, got {radius}"
            )));
        }
        if let Some([x, y]) = self.proximity.resolution_m {
            // reject a radius smaller than half a cell up front
            radius_cells_from_meters(radius, (x + y) / 2.0)?;
        }

        self.target()?.validate()?;
        self.kernel().validate()?;

        match &self.source {
            SourceConfig::Worldcover { version, base_url } => {
                if WorldCoverVersion::from_year(*version).is_none() {
                    return Err(PipelineError::Config(format!(
                        "unknown WorldCover version {version}, expected 2020 or 2021"
                    )));
                }
                if base_url.as_deref().is_some_and(str::is_empty) {
                    return Err(PipelineError::Config("source.base_url is empty".to_string()));
                }
            }
            SourceConfig::Tiled {
                grid_key,
                id_property,
                key_template,
                ..
            } => {
                if grid_key.is_empty() || id_property.is_empty() {
                    return Err(PipelineError::Config(
                        "source.grid_key and source.id_property are required".to_string(),
                    ));
                }
                if !key_template.contains(TiledProvider::TILE_PLACEHOLDER) {
                    return Err(PipelineError::Config(format!(
                        "source.key_template '{key_template}' has no {} placeholder",
                        TiledProvider::TILE_PLACEHOLDER
                    )));
                }
            }
            SourceConfig::LocalFile { path, .. } => {
                if path.as_os_str().is_empty() {
                    return Err(PipelineError::Config("source.path is empty".to_string()));
                }
            }
        }

        if self.output.dir.trim().is_empty() {
            return Err(PipelineError::Config("output.dir is empty".to_string()));
        }
        Ok(())
    }

    /// Area of interest.
    pub fn bbox(&self) -> Result<BoundingBox> {
        let [lat1, lon1] = self.area.point1;
        let [lat2, lon2] = self.area.point2;
        Ok(BoundingBox::from_corners((lat1, lon1), (lat2, lon2))?)
    }

    /// Numerator selection from `target_value` / `value_map`.
    pub fn target(&self) -> Result<TargetSelector> {
        match (&self.proximity.target_value, &self.proximity.value_map) {
            (Some(v), None) => Ok(TargetSelector::Value(*v)),
            (None, Some(map)) => Ok(TargetSelector::Weighted(map.clone())),
            (Some(_), Some(_)) => Err(PipelineError::Config(
                "set either proximity.target_value or proximity.value_map, not both".to_string(),
            )),
            (None, None) => Err(PipelineError::Config(
                "one of proximity.target_value or proximity.value_map is required".to_string(),
            )),
        }
    }

    pub fn kernel(&self) -> KernelShape {
        self.proximity.kernel.into()
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache.mode.into()
    }

    /// Output directory with the placeholder resolved against `now`.
    pub fn output_dir<Tz>(&self, now: &DateTime<Tz>) -> PathBuf
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let stamp = now.format(DATE_TIME_FORMAT).to_string();
        PathBuf::from(self.output.dir.replace(DATE_TIME_PLACEHOLDER, &stamp))
    }
}
