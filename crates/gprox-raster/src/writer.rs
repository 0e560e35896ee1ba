//! GeoTIFF writer.
//!
//! Writes uncompressed, single-strip, chunky GeoTIFFs with the tiff crate's
//! low-level directory encoder, so any band count and sample type can be
//! expressed. Writes to a path are transactional: the file is encoded into a
//! `.part` sibling, synced and renamed over the target, so readers never see
//! a half-written raster and a failed write leaves any existing file intact.

use crate::cache::part_path;
use crate::{ColorMap, Crs, DataType, GeoTransform, RasterBlock, RasterError, RasterMeta, Result};
use gprox_metrics::metric_defs;
use ndarray::{Array2, Axis};
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use tiff::encoder::{DirectoryEncoder, TiffEncoder, TiffKind, TiffValue};
use tiff::tags::Tag;
use tiff::TiffResult;

/// Builder for writing a [`RasterBlock`] as GeoTIFF.
#[derive(Debug, Clone, Copy)]
pub struct GeoTiffWriter<'a> {
    block: &'a RasterBlock,
    colormap: Option<&'a ColorMap>,
}

impl<'a> GeoTiffWriter<'a> {
    /// Create a writer for a block (without a colormap).
    #[must_use]
    pub fn new(block: &'a RasterBlock) -> Self {
        Self {
            block,
            colormap: None,
        }
    }

    /// Attach a palette to band 1. Only valid for single-band 8-bit output.
    #[must_use]
    pub fn colormap(mut self, colormap: Option<&'a ColorMap>) -> Self {
        self.colormap = colormap;
        self
    }

    /// Write to a file path, replacing any existing file atomically.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.validate().map_err(|reason| RasterError::write_failed(path, reason))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RasterError::write_failed(path, e))?;
        }

        let tmp = part_path(path);
        let result = self.write_part(&tmp).and_then(|()| {
            fs::rename(&tmp, path).map_err(|e| format!("rename failed: {}", e))
        });
        if let Err(reason) = result {
            let _ = fs::remove_file(&tmp);
            return Err(RasterError::write_failed(path, reason));
        }

        metrics::counter!(metric_defs::OUTPUT_FILES_WRITTEN.name).increment(1);
        tracing::info!(
            path = %path.display(),
            width = self.block.width(),
            height = self.block.height(),
            bands = self.block.count(),
            dtype = %self.block.meta().dtype,
            colormap = self.colormap.is_some(),
            "wrote GeoTIFF"
        );
        Ok(())
    }

    /// Write to any writer that implements Write + Seek (no temp file).
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        let stream = Path::new("<stream>");
        self.validate().map_err(|reason| RasterError::write_failed(stream, reason))?;
        self.encode(writer).map_err(|e| RasterError::write_failed(stream, e))
    }

    fn write_part(&self, tmp: &Path) -> std::result::Result<(), String> {
        let file = File::create(tmp).map_err(|e| e.to_string())?;
        let mut writer = BufWriter::new(file);
        self.encode(&mut writer).map_err(|e| e.to_string())?;
        let file = writer.into_inner().map_err(|e| e.to_string())?;
        file.sync_all().map_err(|e| e.to_string())
    }

    /// Checks that must pass before anything touches the disk.
    fn validate(&self) -> std::result::Result<(), String> {
        let meta = self.block.meta();
        if meta.width == 0 || meta.height == 0 || meta.count == 0 {
            return Err(format!(
                "raster has zero dimensions ({} bands, {}x{})",
                meta.count, meta.width, meta.height
            ));
        }
        if u32::try_from(meta.width).is_err() || u32::try_from(meta.height).is_err() {
            return Err(format!("raster too large ({}x{})", meta.width, meta.height));
        }
        if meta.count > u16::MAX as usize {
            return Err(format!("too many bands ({})", meta.count));
        }
        if self.colormap.is_some() && (meta.count != 1 || meta.dtype != DataType::U8) {
            return Err(format!(
                "a colormap needs a single-band uint8 raster, got {} bands of {}",
                meta.count, meta.dtype
            ));
        }
        Ok(())
    }

    fn encode<W: Write + Seek>(&self, writer: W) -> TiffResult<()> {
        let meta = self.block.meta();
        let bands = meta.count;
        let (width, height) = (meta.width as u32, meta.height as u32);

        let mut encoder = TiffEncoder::new(writer)?;
        let mut dir = encoder.new_directory()?;

        dir.write_tag(Tag::ImageWidth, width)?;
        dir.write_tag(Tag::ImageLength, height)?;

        let bits_per_sample: Vec<u16> = vec![meta.dtype.bits(); bands];
        dir.write_tag(Tag::BitsPerSample, bits_per_sample.as_slice())?;

        // No compression
        dir.write_tag(Tag::Compression, 1u16)?;

        // PhotometricInterpretation: 3 = palette, 1 = BlackIsZero
        let photometric: u16 = if self.colormap.is_some() { 3 } else { 1 };
        dir.write_tag(Tag::PhotometricInterpretation, photometric)?;

        dir.write_tag(Tag::SamplesPerPixel, bands as u16)?;

        let sample_format: Vec<u16> = vec![meta.dtype.sample_format(); bands];
        dir.write_tag(Tag::SampleFormat, sample_format.as_slice())?;

        // PlanarConfiguration: 1 = chunky (interleaved)
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
        dir.write_tag(Tag::RowsPerStrip, height)?;

        if bands > 1 {
            let extra_samples: Vec<u16> = vec![0; bands - 1];
            dir.write_tag(Tag::ExtraSamples, extra_samples.as_slice())?;
        }

        if let Some(colormap) = self.colormap {
            dir.write_tag(Tag::ColorMap, colormap.to_tiff_palette().as_slice())?;
        }

        write_geotiff_tags(&mut dir, self.block.transform(), meta)?;

        let (offset, byte_count) = match meta.dtype {
            DataType::U8 => write_samples(&mut dir, &self.interleave(|v| v as u8))?,
            DataType::I8 => write_samples(&mut dir, &self.interleave(|v| v as i8))?,
            DataType::U16 => write_samples(&mut dir, &self.interleave(|v| v as u16))?,
            DataType::I16 => write_samples(&mut dir, &self.interleave(|v| v as i16))?,
            DataType::U32 => write_samples(&mut dir, &self.interleave(|v| v as u32))?,
            DataType::I32 => write_samples(&mut dir, &self.interleave(|v| v as i32))?,
            DataType::F32 => write_samples(&mut dir, &self.interleave(|v| v as f32))?,
            DataType::F64 => write_samples(&mut dir, &self.interleave(|v| v))?,
        };
        dir.write_tag(Tag::StripOffsets, offset)?;
        dir.write_tag(Tag::StripByteCounts, byte_count)?;

        dir.finish()
    }

    /// Pixel-interleaved samples, quantized to the output type.
    fn interleave<T>(&self, convert: impl Fn(f64) -> T) -> Vec<T> {
        let data = self.block.data();
        let dtype = self.block.meta().dtype;
        let (bands, rows, cols) = data.dim();

        let mut samples = Vec::with_capacity(bands * rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                for band in 0..bands {
                    samples.push(convert(dtype.quantize(data[[band, row, col]])));
                }
            }
        }
        samples
    }
}

/// Write the strip and return its (offset, byte count) as classic-TIFF longs.
fn write_samples<W, K, T>(dir: &mut DirectoryEncoder<'_, W, K>, samples: &[T]) -> TiffResult<(u32, u32)>
where
    W: Write + Seek,
    K: TiffKind,
    [T]: TiffValue,
{
    let offset = dir.write_data(samples)?;
    let byte_count = std::mem::size_of_val(samples);
    let too_large = || tiff::TiffError::LimitsExceeded;
    Ok((
        u32::try_from(offset).map_err(|_| too_large())?,
        u32::try_from(byte_count).map_err(|_| too_large())?,
    ))
}

fn write_geotiff_tags<W: Write + Seek, K: TiffKind>(
    dir: &mut DirectoryEncoder<'_, W, K>,
    transform: &GeoTransform,
    meta: &RasterMeta,
) -> TiffResult<()> {
    // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
    let pixel_scale = [transform.pixel_width(), transform.pixel_height().abs(), 0.0];
    dir.write_tag(Tag::ModelPixelScaleTag, pixel_scale.as_slice())?;

    // ModelTiepoint: pixel (0, 0) -> world (origin_x, origin_y)
    let tiepoint = [0.0, 0.0, 0.0, transform.origin_x(), transform.origin_y(), 0.0];
    dir.write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())?;

    let geokeys = meta.crs.to_geokeys();
    dir.write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())?;

    if let Some(nodata) = meta.nodata {
        dir.write_tag(Tag::GdalNodata, format_nodata(nodata).as_str())?;
    }
    Ok(())
}

fn format_nodata(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Write a block to `path`, optionally with a palette on band 1.
pub fn write_geotiff<P: AsRef<Path>>(
    block: &RasterBlock,
    path: P,
    colormap: Option<&ColorMap>,
) -> Result<()> {
    GeoTiffWriter::new(block).colormap(colormap).write(path)
}

/// Write a bare 2-D matrix as a single-band GeoTIFF.
pub fn write_matrix<P: AsRef<Path>>(
    matrix: &Array2<f64>,
    transform: GeoTransform,
    crs: Crs,
    dtype: DataType,
    path: P,
    colormap: Option<&ColorMap>,
) -> Result<PathBuf> {
    let (height, width) = matrix.dim();
    let meta = RasterMeta::new(dtype, 1, width, height).with_crs(crs);
    let block = RasterBlock::new(matrix.clone().insert_axis(Axis(0)), transform, meta);
    write_geotiff(&block, path.as_ref(), colormap)?;
    Ok(path.as_ref().to_path_buf())
}
