//! Raster providers: one interface for "give me a raster for this box".

use crate::{
    resolve_tiles, stitch_with, BoundingBox, GeoTiffSource, MosaicOptions, PixelWindow,
    RasterBlock, RasterError, RasterSource, Result, TileCache, TileGrid, TileReference, TileState,
};
use std::path::{Path, PathBuf};

/// Produces a [`RasterBlock`] covering a bounding box.
///
/// Implementations backed by external services should report their
/// failures as [`RasterError::ProviderError`].
pub trait RasterProvider {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Raster covering `bbox`.
    fn provide(&self, bbox: &BoundingBox) -> Result<RasterBlock>;
}

/// A product split into GeoTIFF tiles described by a footprint grid.
#[derive(Debug)]
pub struct TiledProvider {
    name: String,
    grid: TileGrid,
    cache: TileCache,
    key_template: String,
    options: MosaicOptions,
}

impl TiledProvider {
    /// Placeholder in key templates replaced by the tile id.
    pub const TILE_PLACEHOLDER: &'static str = "{tile}";

    pub fn new(
        name: impl Into<String>,
        grid: TileGrid,
        cache: TileCache,
        key_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            grid,
            cache,
            key_template: key_template.into(),
            options: MosaicOptions::default(),
        }
    }

    /// Create a provider whose grid document is itself an object in the store.
    ///
    /// The grid goes through the cache like any tile (streamed when caching
    /// is disabled).
    pub fn from_remote_grid(
        name: impl Into<String>,
        cache: TileCache,
        grid_key: &str,
        id_property: &str,
        key_template: impl Into<String>,
    ) -> Result<Self> {
        let grid = load_grid(&cache, grid_key, id_property)?;
        Ok(Self::new(name, grid, cache, key_template))
    }

    /// Set mosaic options.
    pub fn with_options(mut self, options: MosaicOptions) -> Self {
        self.options = options;
        self
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Remote key of a tile.
    pub fn key_for(&self, id: &str) -> String {
        self.key_template.replace(Self::TILE_PLACEHOLDER, id)
    }

    /// Resolve the tiles covering `bbox` and report their local state.
    pub fn references(&self, bbox: &BoundingBox) -> Result<Vec<TileReference>> {
        Ok(resolve_tiles(&self.grid, bbox)?
            .into_iter()
            .map(|id| {
                let key = self.key_for(&id);
                self.cache.inspect(&id, &key)
            })
            .collect())
    }

    /// Resolve and download (or revalidate) every tile covering `bbox`.
    pub fn materialize(&self, bbox: &BoundingBox) -> Result<Vec<TileReference>> {
        self.references(bbox)?
            .into_iter()
            .map(|reference| self.cache.materialize(reference))
            .collect()
    }

    fn open(&self, reference: &TileReference) -> Result<Box<dyn RasterSource>> {
        let context = |e: RasterError| match e {
            RasterError::TiffDecode(_) | RasterError::InvalidGeoTiff(_) => {
                RasterError::InvalidGeoTiff(format!("tile {} ({}): {}", reference.id, reference.key, e))
            }
            other => other,
        };

        match &reference.state {
            TileState::Cached(path) => Ok(Box::new(GeoTiffSource::open(path).map_err(context)?)),
            TileState::Remote => {
                let bytes = self.cache.fetch_bytes(&reference.key)?;
                Ok(Box::new(
                    GeoTiffSource::from_bytes(reference.key.clone(), bytes).map_err(context)?,
                ))
            }
            TileState::Missing => Err(RasterError::download(
                &reference.key,
                format!("tile {} does not exist in the remote store", reference.id),
            )),
        }
    }
}

impl RasterProvider for TiledProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn provide(&self, bbox: &BoundingBox) -> Result<RasterBlock> {
        let references = self.materialize(bbox)?;
        if references.is_empty() {
            return Err(RasterError::NoCoverage(format!(
                "no {} tiles intersect ({}, {}, {}, {})",
                self.name,
                bbox.west(),
                bbox.south(),
                bbox.east(),
                bbox.north()
            )));
        }
        tracing::info!(
            provider = %self.name,
            tiles = references.len(),
            ids = ?references.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            "tiles resolved"
        );

        let mut sources = references
            .iter()
            .map(|reference| self.open(reference))
            .collect::<Result<Vec<_>>>()?;

        stitch_with(&mut sources, bbox, &self.options)
    }
}

/// Read a tile grid document through the cache.
pub(crate) fn load_grid(cache: &TileCache, grid_key: &str, id_property: &str) -> Result<TileGrid> {
    if cache.mode() == crate::CacheMode::Disabled {
        let bytes = cache.fetch_bytes(grid_key)?;
        let doc = String::from_utf8(bytes)
            .map_err(|e| RasterError::InvalidGrid(format!("{}: {}", grid_key, e)))?;
        return TileGrid::from_geojson_str(&doc, id_property);
    }
    let path = cache.get(grid_key, cache.path_for(grid_key))?;
    TileGrid::from_path(path, id_property)
}

/// A single GeoTIFF on local disk.
#[derive(Debug, Clone)]
pub struct LocalFileProvider {
    path: PathBuf,
    clip: bool,
    options: MosaicOptions,
}

impl LocalFileProvider {
    /// Provider that clips the file to the requested box.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            clip: true,
            options: MosaicOptions::default(),
        }
    }

    /// Disable clipping to return the whole file (e.g. for projected rasters).
    pub fn with_clip(mut self, clip: bool) -> Self {
        self.clip = clip;
        self
    }

    pub fn with_options(mut self, options: MosaicOptions) -> Self {
        self.options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RasterProvider for LocalFileProvider {
    fn name(&self) -> &str {
        "local_file"
    }

    fn provide(&self, bbox: &BoundingBox) -> Result<RasterBlock> {
        let mut source = GeoTiffSource::open(&self.path)?;

        if self.clip {
            let mut sources: Vec<Box<dyn RasterSource>> = vec![Box::new(source)];
            return stitch_with(&mut sources, bbox, &self.options);
        }

        let meta = source.meta().clone();
        let transform = *source.transform();
        let colormap = source.colormap().cloned();
        let full = PixelWindow::new(0, 0, meta.width as i64, meta.height as i64);
        let data = source.read_window(&full)?;
        tracing::info!(path = %self.path.display(), width = meta.width, height = meta.height, "read whole raster");
        Ok(RasterBlock::new(data, transform, meta).with_colormap(colormap))
    }
}
