//! In-memory rasters, geotransforms and the pixel source trait.

use crate::{BoundingBox, ColorMap, RasterError, Result};
use ndarray::{s, Array3, ArrayView2};

// GeoKey ids
pub(crate) const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
pub(crate) const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
pub(crate) const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub(crate) const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

/// Fractional pixel positions closer than this to an integer snap to it.
const SNAP_EPSILON: f64 = 1e-6;

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Pixel sample type, as stored on disk.
///
/// Values are always held as `f64` in memory; the type decides how they are
/// converted back when writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl DataType {
    /// Bits per sample.
    pub fn bits(&self) -> u16 {
        match self {
            DataType::U8 | DataType::I8 => 8,
            DataType::U16 | DataType::I16 => 16,
            DataType::U32 | DataType::I32 | DataType::F32 => 32,
            DataType::F64 => 64,
        }
    }

    /// TIFF `SampleFormat` value: 1 unsigned, 2 signed, 3 IEEE float.
    pub fn sample_format(&self) -> u16 {
        match self {
            DataType::U8 | DataType::U16 | DataType::U32 => 1,
            DataType::I8 | DataType::I16 | DataType::I32 => 2,
            DataType::F32 | DataType::F64 => 3,
        }
    }

    /// Lowercase name, as used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::U8 => "uint8",
            DataType::I8 => "int8",
            DataType::U16 => "uint16",
            DataType::I16 => "int16",
            DataType::U32 => "uint32",
            DataType::I32 => "int32",
            DataType::F32 => "float32",
            DataType::F64 => "float64",
        }
    }

    /// Map TIFF BitsPerSample/SampleFormat to a data type.
    pub fn from_tiff(bits: u16, sample_format: u16) -> Result<Self> {
        let dtype = match (sample_format, bits) {
            (1, 8) => DataType::U8,
            (1, 16) => DataType::U16,
            (1, 32) => DataType::U32,
            (2, 8) => DataType::I8,
            (2, 16) => DataType::I16,
            (2, 32) => DataType::I32,
            (3, 32) => DataType::F32,
            (3, 64) => DataType::F64,
            _ => {
                return Err(RasterError::UnsupportedDataType(format!(
                    "{} bits with sample format {}",
                    bits, sample_format
                )))
            }
        };
        Ok(dtype)
    }

    /// Check if this is a floating point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    /// Smallest and largest representable value.
    pub fn range(&self) -> (f64, f64) {
        match self {
            DataType::U8 => (u8::MIN as f64, u8::MAX as f64),
            DataType::I8 => (i8::MIN as f64, i8::MAX as f64),
            DataType::U16 => (u16::MIN as f64, u16::MAX as f64),
            DataType::I16 => (i16::MIN as f64, i16::MAX as f64),
            DataType::U32 => (u32::MIN as f64, u32::MAX as f64),
            DataType::I32 => (i32::MIN as f64, i32::MAX as f64),
            DataType::F32 => (f32::MIN as f64, f32::MAX as f64),
            DataType::F64 => (f64::MIN, f64::MAX),
        }
    }

    /// Round (for integer types) and clamp a value into range.
    pub fn quantize(&self, value: f64) -> f64 {
        if self.is_float() {
            return value;
        }
        if value.is_nan() {
            return 0.0;
        }
        let (lo, hi) = self.range();
        value.round().clamp(lo, hi)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Coordinate reference system, as far as GeoTIFF keys tell us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Crs {
    /// Geographic CRS with an EPSG code (degrees).
    Geographic(u16),
    /// Projected CRS with an EPSG code (usually meters).
    Projected(u16),
    /// No usable georeferencing keys.
    Unknown,
}

impl Crs {
    /// WGS 84 geographic coordinates.
    pub const WGS84: Crs = Crs::Geographic(4326);

    /// EPSG code if known.
    pub fn epsg(&self) -> Option<u16> {
        match self {
            Crs::Geographic(code) | Crs::Projected(code) => Some(*code),
            Crs::Unknown => None,
        }
    }

    /// Check if coordinates are in degrees.
    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Geographic(_))
    }

    /// Parse the GeoKeyDirectory tag.
    ///
    /// Only inline (location 0) short keys are consulted; that is where
    /// GTModelType, GeographicType and ProjectedCSType live.
    pub fn from_geokeys(keys: &[u16]) -> Crs {
        if keys.len() < 4 {
            return Crs::Unknown;
        }
        let count = keys[3] as usize;

        let mut model_type = None;
        let mut geographic = None;
        let mut projected = None;
        for entry in keys[4..].chunks_exact(4).take(count) {
            let (key, location, value) = (entry[0], entry[1], entry[3]);
            if location != 0 {
                continue;
            }
            match key {
                GT_MODEL_TYPE_GEO_KEY => model_type = Some(value),
                GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(value),
                PROJECTED_CS_TYPE_GEO_KEY => projected = Some(value),
                _ => {}
            }
        }

        // 32767 is "user-defined", which we cannot interpret
        match (model_type, projected, geographic) {
            (Some(1), Some(code), _) if code != 32767 => Crs::Projected(code),
            (Some(2), _, Some(code)) if code != 32767 => Crs::Geographic(code),
            (None, Some(code), _) if code != 32767 => Crs::Projected(code),
            (None, None, Some(code)) if code != 32767 => Crs::Geographic(code),
            _ => Crs::Unknown,
        }
    }

    /// Build a GeoKeyDirectory for this CRS (pixel-is-area raster).
    pub fn to_geokeys(&self) -> Vec<u16> {
        const RASTER_PIXEL_IS_AREA: u16 = 1;

        let mut keys = vec![1, 1, 0, 0];
        match self {
            Crs::Geographic(code) => {
                keys.extend_from_slice(&[GT_MODEL_TYPE_GEO_KEY, 0, 1, 2]);
                keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
                keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, *code]);
            }
            Crs::Projected(code) => {
                keys.extend_from_slice(&[GT_MODEL_TYPE_GEO_KEY, 0, 1, 1]);
                keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
                keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, *code]);
            }
            Crs::Unknown => {
                keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
            }
        }
        keys[3] = ((keys.len() - 4) / 4) as u16;
        keys
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.epsg() {
            Some(code) => write!(f, "EPSG:{}", code),
            None => f.write_str("unknown CRS"),
        }
    }
}

/// A rectangular block of pixels.
///
/// Offsets may be negative or exceed the raster when computed from a box
/// that extends past a source; use [`PixelWindow::clamp_to`] before reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: i64,
    pub row_off: i64,
    pub width: i64,
    pub height: i64,
}

impl PixelWindow {
    pub fn new(col_off: i64, row_off: i64, width: i64, height: i64) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    /// Check if the window holds no pixels.
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Exclusive end column.
    pub fn col_end(&self) -> i64 {
        self.col_off + self.width
    }

    /// Exclusive end row.
    pub fn row_end(&self) -> i64 {
        self.row_off + self.height
    }

    /// Intersect with a raster extent of `width` x `height` pixels.
    ///
    /// Returns `None` when the intersection is empty.
    pub fn clamp_to(&self, width: usize, height: usize) -> Option<PixelWindow> {
        let col0 = self.col_off.max(0);
        let row0 = self.row_off.max(0);
        let col1 = self.col_end().min(width as i64);
        let row1 = self.row_end().min(height as i64);
        let clamped = PixelWindow::new(col0, row0, col1 - col0, row1 - row0);
        (!clamped.is_empty()).then_some(clamped)
    }

    /// Check if the window lies fully inside a `width` x `height` extent.
    pub fn fits_within(&self, width: usize, height: usize) -> bool {
        !self.is_empty()
            && self.col_off >= 0
            && self.row_off >= 0
            && self.col_end() <= width as i64
            && self.row_end() <= height as i64
    }
}

/// Affine pixel-to-world transform in GDAL coefficient order.
///
/// `[origin_x, pixel_width, row_rotation, origin_y, column_rotation, pixel_height]`;
/// for north-up rasters the rotations are zero and `pixel_height` is negative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform([f64; 6]);

impl GeoTransform {
    /// North-up transform with the given top-left origin and pixel size.
    ///
    /// `pixel_height` is the (positive) size of a pixel in the y direction.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height.abs()])
    }

    /// Wrap raw GDAL coefficients.
    pub fn from_gdal(coefficients: [f64; 6]) -> Self {
        Self(coefficients)
    }

    /// Raw GDAL coefficients.
    pub fn coefficients(&self) -> [f64; 6] {
        self.0
    }

    pub fn origin_x(&self) -> f64 {
        self.0[0]
    }

    pub fn origin_y(&self) -> f64 {
        self.0[3]
    }

    pub fn pixel_width(&self) -> f64 {
        self.0[1]
    }

    /// Signed pixel height (negative for north-up rasters).
    pub fn pixel_height(&self) -> f64 {
        self.0[5]
    }

    /// Check for zero rotation, positive width and negative height.
    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0 && self.0[1] > 0.0 && self.0[5] < 0.0
    }

    /// World coordinate of the top-left corner of a pixel.
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        let [ox, pw, rr, oy, cr, ph] = self.0;
        (ox + col * pw + row * rr, oy + col * cr + row * ph)
    }

    /// Fractional pixel position of a world coordinate (north-up only).
    pub fn world_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x()) / self.pixel_width(),
            (y - self.origin_y()) / self.pixel_height(),
        )
    }

    /// Smallest pixel window that fully covers a bounding box.
    ///
    /// The origin is floored and the far edge ceiled, after snapping values
    /// within [`SNAP_EPSILON`] of an integer, so a box aligned to the pixel
    /// grid maps to exactly its pixels.
    pub fn window_from_bounds(&self, bbox: &BoundingBox) -> PixelWindow {
        let (c0, r0) = self.world_to_pixel(bbox.west(), bbox.north());
        let (c1, r1) = self.world_to_pixel(bbox.east(), bbox.south());

        let col0 = snap(c0.min(c1)).floor() as i64;
        let row0 = snap(r0.min(r1)).floor() as i64;
        let col1 = snap(c0.max(c1)).ceil() as i64;
        let row1 = snap(r0.max(r1)).ceil() as i64;

        PixelWindow::new(col0, row0, (col1 - col0).max(1), (row1 - row0).max(1))
    }

    /// Transform of the sub-raster starting at the window's origin.
    pub fn for_window(&self, window: &PixelWindow) -> GeoTransform {
        let (x, y) = self.pixel_to_world(window.col_off as f64, window.row_off as f64);
        let mut coefficients = self.0;
        coefficients[0] = x;
        coefficients[3] = y;
        GeoTransform(coefficients)
    }

    /// Extent `(west, south, east, north)` of a `width` x `height` raster.
    pub fn bounds(&self, width: usize, height: usize) -> (f64, f64, f64, f64) {
        let (x0, y0) = self.pixel_to_world(0.0, 0.0);
        let (x1, y1) = self.pixel_to_world(width as f64, height as f64);
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < SNAP_EPSILON {
        r
    } else {
        v
    }
}

/// Approximate ground size of one pixel in meters, `(x, y)`.
///
/// Geographic rasters use a spherical approximation at `center_lat`:
/// 111,320 m per degree, with longitude shrinking by cos(latitude).
/// Projected rasters report their pixel size as-is. Returns `None` when the
/// CRS is unknown.
pub fn resolution_meters(transform: &GeoTransform, crs: Crs, center_lat: f64) -> Option<(f64, f64)> {
    let (dx, dy) = (transform.pixel_width().abs(), transform.pixel_height().abs());
    match crs {
        Crs::Geographic(_) => {
            let meters_per_deg_lat = METERS_PER_DEGREE;
            let meters_per_deg_lon = METERS_PER_DEGREE * center_lat.to_radians().cos();
            Some((dx * meters_per_deg_lon, dy * meters_per_deg_lat))
        }
        Crs::Projected(_) => Some((dx, dy)),
        Crs::Unknown => None,
    }
}

/// Descriptive metadata of a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMeta {
    /// Format driver name, `"GTiff"` for everything this crate reads or writes.
    pub driver: String,
    pub dtype: DataType,
    /// Number of bands.
    pub count: usize,
    pub width: usize,
    pub height: usize,
    pub nodata: Option<f64>,
    pub crs: Crs,
}

impl RasterMeta {
    pub fn new(dtype: DataType, count: usize, width: usize, height: usize) -> Self {
        Self {
            driver: "GTiff".to_string(),
            dtype,
            count,
            width,
            height,
            nodata: None,
            crs: Crs::Unknown,
        }
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = crs;
        self
    }
}

/// A georeferenced multi-band raster held in memory.
///
/// Data is band-major (`bands x rows x cols`). The metadata's size fields
/// are derived from the array, so they always agree with it.
#[derive(Debug, Clone)]
pub struct RasterBlock {
    data: Array3<f64>,
    transform: GeoTransform,
    meta: RasterMeta,
    colormap: Option<ColorMap>,
}

impl RasterBlock {
    /// Create a block; `meta.count`, `meta.width` and `meta.height` are
    /// overwritten from the array shape.
    pub fn new(data: Array3<f64>, transform: GeoTransform, mut meta: RasterMeta) -> Self {
        let (count, height, width) = data.dim();
        meta.count = count;
        meta.width = width;
        meta.height = height;
        Self {
            data,
            transform,
            meta,
            colormap: None,
        }
    }

    /// Attach (or clear) a colormap.
    pub fn with_colormap(mut self, colormap: Option<ColorMap>) -> Self {
        self.colormap = colormap;
        self
    }

    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    pub fn into_data(self) -> Array3<f64> {
        self.data
    }

    /// View of one band (0-based).
    pub fn band(&self, index: usize) -> Option<ArrayView2<'_, f64>> {
        (index < self.meta.count).then(|| self.data.slice(s![index, .., ..]))
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    pub fn colormap(&self) -> Option<&ColorMap> {
        self.colormap.as_ref()
    }

    pub fn width(&self) -> usize {
        self.meta.width
    }

    pub fn height(&self) -> usize {
        self.meta.height
    }

    pub fn count(&self) -> usize {
        self.meta.count
    }

    /// Extent `(west, south, east, north)` in CRS units.
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.transform.bounds(self.meta.width, self.meta.height)
    }
}

/// Anything the mosaic engine can read pixel windows from.
pub trait RasterSource {
    /// Human-readable name for logs and errors (usually a path or key).
    fn describe(&self) -> String;

    fn meta(&self) -> &RasterMeta;

    fn transform(&self) -> &GeoTransform;

    fn colormap(&self) -> Option<&ColorMap>;

    /// Read a window lying fully inside the raster, band-major.
    fn read_window(&mut self, window: &PixelWindow) -> Result<Array3<f64>>;
}

/// A raster already in memory.
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    block: RasterBlock,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, block: RasterBlock) -> Self {
        Self {
            name: name.into(),
            block,
        }
    }

    pub fn into_block(self) -> RasterBlock {
        self.block
    }
}

impl RasterSource for MemorySource {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn meta(&self) -> &RasterMeta {
        self.block.meta()
    }

    fn transform(&self) -> &GeoTransform {
        self.block.transform()
    }

    fn colormap(&self) -> Option<&ColorMap> {
        self.block.colormap()
    }

    fn read_window(&mut self, window: &PixelWindow) -> Result<Array3<f64>> {
        check_window(&self.name, window, self.block.width(), self.block.height())?;
        let (c0, r0) = (window.col_off as usize, window.row_off as usize);
        let (c1, r1) = (window.col_end() as usize, window.row_end() as usize);
        Ok(self.block.data.slice(s![.., r0..r1, c0..c1]).to_owned())
    }
}

pub(crate) fn check_window(name: &str, window: &PixelWindow, width: usize, height: usize) -> Result<()> {
    if window.fits_within(width, height) {
        Ok(())
    } else {
        Err(RasterError::NoCoverage(format!(
            "{}: window {:?} is outside the {}x{} raster",
            name, window, width, height
        )))
    }
}
