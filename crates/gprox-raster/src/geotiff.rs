//! Windowed GeoTIFF reading.
//!
//! The `tiff` decoder parses the header and tags. Strips and tiles are then
//! read and decompressed here, which lets palette images and rasters with
//! any number of bands decode the same way as single-band grayscale ones.
//!
//! Supported: uncompressed, LZW, Deflate and PackBits chunks; horizontal
//! differencing on integer samples; chunky and separate planar layouts;
//! byte-aligned sample sizes of 8, 16, 32 and 64 bits.

use crate::raster::{check_window, Crs, DataType, GeoTransform, PixelWindow, RasterMeta, RasterSource};
use crate::{ColorMap, RasterError, Result};
use flate2::read::ZlibDecoder;
use ndarray::Array3;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use tiff::decoder::{Decoder, Limits};
use tiff::tags::Tag;

/// Byte order of a TIFF stream, from its first two bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Read the byte order mark and rewind.
    fn detect<R: Read + Seek>(reader: &mut R, name: &str) -> Result<Self> {
        let mut magic = [0u8; 2];
        reader.rewind()?;
        reader.read_exact(&mut magic)?;
        reader.rewind()?;
        match &magic {
            b"II" => Ok(ByteOrder::Little),
            b"MM" => Ok(ByteOrder::Big),
            _ => Err(RasterError::InvalidGeoTiff(format!(
                "{}: missing TIFF byte order mark",
                name
            ))),
        }
    }

    fn read_unsigned(&self, bytes: &[u8]) -> u64 {
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        match self {
            ByteOrder::Little => bytes.iter().rev().fold(0, fold),
            ByteOrder::Big => bytes.iter().fold(0, fold),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    None,
    Lzw,
    Deflate,
    PackBits,
}

impl Compression {
    fn from_tiff(code: u16, name: &str) -> Result<Self> {
        match code {
            1 => Ok(Compression::None),
            5 => Ok(Compression::Lzw),
            // 32946 is the pre-standard Deflate code some writers still emit
            8 | 32946 => Ok(Compression::Deflate),
            32773 => Ok(Compression::PackBits),
            other => Err(RasterError::UnsupportedDataType(format!(
                "{}: compression method {}",
                name, other
            ))),
        }
    }

    /// Inflate one chunk. The result is truncated to `expected` bytes; a
    /// shorter result is an error.
    fn decompress(&self, raw: Vec<u8>, expected: usize) -> Result<Vec<u8>> {
        let mut out = match self {
            Compression::None => raw,
            Compression::Lzw => {
                let mut out = Vec::with_capacity(expected);
                weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
                    .into_vec(&mut out)
                    .decode(&raw)
                    .status
                    .map_err(|e| RasterError::InvalidGeoTiff(format!("LZW: {}", e)))?;
                out
            }
            Compression::Deflate => {
                let mut out = Vec::with_capacity(expected);
                ZlibDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
                out
            }
            Compression::PackBits => unpack_bits(&raw, expected)?,
        };

        if out.len() < expected {
            return Err(RasterError::InvalidGeoTiff(format!(
                "chunk decoded to {} bytes, expected {}",
                out.len(),
                expected
            )));
        }
        out.truncate(expected);
        Ok(out)
    }
}

/// Decode a PackBits run-length stream.
fn unpack_bits(input: &[u8], expected: usize) -> Result<Vec<u8>> {
    let truncated = || RasterError::InvalidGeoTiff("truncated PackBits run".to_string());

    let mut out = Vec::with_capacity(expected);
    let mut pos = 0;
    while pos < input.len() && out.len() < expected {
        let header = input[pos] as i8;
        pos += 1;
        match header {
            // no-op
            -128 => {}
            n if n >= 0 => {
                let end = pos + n as usize + 1;
                out.extend_from_slice(input.get(pos..end).ok_or_else(truncated)?);
                pos = end;
            }
            n => {
                let byte = *input.get(pos).ok_or_else(truncated)?;
                let repeat = (1 - i16::from(n)) as usize;
                out.resize(out.len() + repeat, byte);
                pos += 1;
            }
        }
    }
    Ok(out)
}

/// Undo horizontal differencing in place. `row_len` and `stride` count
/// samples; `stride` is the number of samples per pixel.
fn undo_horizontal_predictor(samples: &mut [u64], row_len: usize, stride: usize, bits: u16) {
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    for row in samples.chunks_mut(row_len) {
        for i in stride..row.len() {
            row[i] = row[i].wrapping_add(row[i - stride]) & mask;
        }
    }
}

/// Reinterpret raw sample bits as a value of `dtype`.
fn sample_to_f64(raw: u64, dtype: DataType) -> f64 {
    match dtype {
        DataType::U8 | DataType::U16 | DataType::U32 => raw as f64,
        DataType::I8 => f64::from(raw as u8 as i8),
        DataType::I16 => f64::from(raw as u16 as i16),
        DataType::I32 => f64::from(raw as u32 as i32),
        DataType::F32 => f64::from(f32::from_bits(raw as u32)),
        DataType::F64 => f64::from_bits(raw),
    }
}

/// Where the strips or tiles of an image live and how they are encoded.
#[derive(Debug, Clone)]
struct ChunkLayout {
    byte_order: ByteOrder,
    compression: Compression,
    horizontal_predictor: bool,
    tiled: bool,
    /// One plane per band instead of interleaved samples.
    separate_planes: bool,
    chunk_width: usize,
    chunk_height: usize,
    chunks_across: usize,
    chunks_down: usize,
    offsets: Vec<u64>,
    byte_counts: Vec<u64>,
}

impl ChunkLayout {
    fn read<D: Read + Seek>(
        decoder: &mut Decoder<D>,
        byte_order: ByteOrder,
        meta: &RasterMeta,
        name: &str,
    ) -> Result<Self> {
        let compression = Compression::from_tiff(
            decoder.find_tag_unsigned::<u16>(Tag::Compression)?.unwrap_or(1),
            name,
        )?;

        let predictor = decoder.find_tag_unsigned::<u16>(Tag::Predictor)?.unwrap_or(1);
        let horizontal_predictor = match (predictor, meta.dtype.is_float()) {
            (1, _) => false,
            (2, false) => true,
            _ => {
                return Err(RasterError::UnsupportedDataType(format!(
                    "{}: predictor {} with {} samples",
                    name, predictor, meta.dtype
                )))
            }
        };

        let separate_planes = match decoder
            .find_tag_unsigned::<u16>(Tag::PlanarConfiguration)?
            .unwrap_or(1)
        {
            1 => false,
            2 => true,
            other => {
                return Err(RasterError::InvalidGeoTiff(format!(
                    "{}: planar configuration {}",
                    name, other
                )))
            }
        };

        let tile_width = decoder.find_tag_unsigned::<u32>(Tag::TileWidth)?;
        let tile_length = decoder.find_tag_unsigned::<u32>(Tag::TileLength)?;
        let (tiled, chunk_width, chunk_height) = match (tile_width, tile_length) {
            (Some(w), Some(h)) => (true, w as usize, h as usize),
            _ => {
                let rows = decoder
                    .find_tag_unsigned::<u32>(Tag::RowsPerStrip)?
                    .map_or(meta.height, |r| (r as usize).min(meta.height));
                (false, meta.width, rows)
            }
        };
        if chunk_width == 0 || chunk_height == 0 {
            return Err(RasterError::InvalidGeoTiff(format!(
                "{}: zero-sized strips or tiles",
                name
            )));
        }

        let (offsets_tag, counts_tag) = if tiled {
            (Tag::TileOffsets, Tag::TileByteCounts)
        } else {
            (Tag::StripOffsets, Tag::StripByteCounts)
        };
        let missing = |tag: Tag| {
            RasterError::InvalidGeoTiff(format!("{}: missing {:?} tag", name, tag))
        };
        let offsets = decoder
            .find_tag_unsigned_vec::<u64>(offsets_tag)?
            .ok_or_else(|| missing(offsets_tag))?;
        let byte_counts = decoder
            .find_tag_unsigned_vec::<u64>(counts_tag)?
            .ok_or_else(|| missing(counts_tag))?;

        let layout = Self {
            byte_order,
            compression,
            horizontal_predictor,
            tiled,
            separate_planes,
            chunk_width,
            chunk_height,
            chunks_across: meta.width.div_ceil(chunk_width),
            chunks_down: meta.height.div_ceil(chunk_height),
            offsets,
            byte_counts,
        };

        let expected = layout.chunks_per_plane() * layout.planes(meta.count);
        if layout.offsets.len() < expected || layout.byte_counts.len() < expected {
            return Err(RasterError::InvalidGeoTiff(format!(
                "{}: {} chunk offsets and {} byte counts for {} chunks",
                name,
                layout.offsets.len(),
                layout.byte_counts.len(),
                expected
            )));
        }
        Ok(layout)
    }

    fn chunks_per_plane(&self) -> usize {
        self.chunks_across * self.chunks_down
    }

    fn planes(&self, bands: usize) -> usize {
        if self.separate_planes {
            bands
        } else {
            1
        }
    }

    /// Samples per pixel stored in one chunk.
    fn samples_per_pixel(&self, bands: usize) -> usize {
        if self.separate_planes {
            1
        } else {
            bands
        }
    }

    /// Stored `(width, height)` of a chunk. Tiles are always full size;
    /// the last strip holds only the remaining rows.
    fn stored_size(&self, chunk_row: usize, image_height: usize) -> (usize, usize) {
        if self.tiled {
            (self.chunk_width, self.chunk_height)
        } else {
            let y0 = chunk_row * self.chunk_height;
            (self.chunk_width, self.chunk_height.min(image_height - y0))
        }
    }
}

/// A GeoTIFF read lazily, one strip or tile at a time.
pub struct GeoTiffSource<R: Read + Seek> {
    name: String,
    reader: R,
    layout: ChunkLayout,
    meta: RasterMeta,
    transform: GeoTransform,
    colormap: Option<ColorMap>,
}

impl<R: Read + Seek> std::fmt::Debug for GeoTiffSource<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoTiffSource")
            .field("name", &self.name)
            .field("meta", &self.meta)
            .field("transform", &self.transform)
            .field("compression", &self.layout.compression)
            .finish()
    }
}

impl GeoTiffSource<BufReader<File>> {
    /// Open a GeoTIFF file on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::new(path.display().to_string(), BufReader::new(file))
    }
}

impl GeoTiffSource<Cursor<Vec<u8>>> {
    /// Read a GeoTIFF held in memory (used when caching is disabled).
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        Self::new(name, Cursor::new(bytes))
    }
}

impl<R: Read + Seek> GeoTiffSource<R> {
    /// Parse the header, georeferencing and chunk layout of a GeoTIFF stream.
    pub fn new(name: impl Into<String>, mut reader: R) -> Result<Self> {
        let name = name.into();
        let byte_order = ByteOrder::detect(&mut reader, &name)?;

        let (meta, transform, colormap, layout) = {
            let mut limits = Limits::default();
            // WorldCover tiles carry large offset tables
            limits.ifd_value_size = 64 * 1024 * 1024;
            let mut decoder = Decoder::new(&mut reader)?.with_limits(limits);

            let (width, height) = decoder.dimensions()?;
            let count = decoder
                .find_tag_unsigned::<u16>(Tag::SamplesPerPixel)?
                .unwrap_or(1) as usize;
            let bits = decoder
                .find_tag_unsigned_vec::<u16>(Tag::BitsPerSample)?
                .and_then(|v| v.first().copied())
                .unwrap_or(1);
            let sample_format = decoder
                .find_tag_unsigned_vec::<u16>(Tag::SampleFormat)?
                .and_then(|v| v.first().copied())
                .unwrap_or(1);
            let dtype = DataType::from_tiff(bits, sample_format)?;

            let transform = read_geotransform(&mut decoder, &name)?;
            let crs = decoder
                .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
                .map(|keys| Crs::from_geokeys(&keys))
                .unwrap_or(Crs::Unknown);
            let nodata = read_nodata_value(&mut decoder);
            let colormap = decoder
                .get_tag_u16_vec(Tag::ColorMap)
                .ok()
                .and_then(|palette| ColorMap::from_tiff_palette(&palette));

            let meta = RasterMeta::new(dtype, count, width as usize, height as usize)
                .with_nodata(nodata)
                .with_crs(crs);
            let layout = ChunkLayout::read(&mut decoder, byte_order, &meta, &name)?;
            (meta, transform, colormap, layout)
        };

        tracing::debug!(
            source = %name,
            width = meta.width,
            height = meta.height,
            bands = meta.count,
            dtype = %meta.dtype,
            crs = %meta.crs,
            compression = ?layout.compression,
            tiled = layout.tiled,
            "opened GeoTIFF"
        );

        Ok(Self {
            name,
            reader,
            layout,
            meta,
            transform,
            colormap,
        })
    }

    /// Read and decode chunk `index`, which stores `width` x `height`
    /// pixels of `samples` samples each.
    fn read_chunk(&mut self, index: usize, width: usize, height: usize, samples: usize) -> Result<Vec<f64>> {
        let dtype = self.meta.dtype;
        let sample_bytes = usize::from(dtype.bits() / 8);
        let sample_count = width * height * samples;

        let (offset, byte_count) = (self.layout.offsets[index], self.layout.byte_counts[index]);
        if byte_count == 0 {
            // sparse chunk
            return Ok(vec![self.meta.nodata.unwrap_or(0.0); sample_count]);
        }

        let byte_count = usize::try_from(byte_count).map_err(|_| {
            RasterError::InvalidGeoTiff(format!("{}: chunk {} is too large", self.name, index))
        })?;
        let mut raw = vec![0u8; byte_count];
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(&mut raw)?;

        let bytes = self
            .layout
            .compression
            .decompress(raw, sample_count * sample_bytes)
            .map_err(|e| {
                RasterError::InvalidGeoTiff(format!("{}: chunk {}: {}", self.name, index, e))
            })?;

        let byte_order = self.layout.byte_order;
        let mut values: Vec<u64> = bytes
            .chunks_exact(sample_bytes)
            .map(|b| byte_order.read_unsigned(b))
            .collect();
        if self.layout.horizontal_predictor {
            undo_horizontal_predictor(&mut values, width * samples, samples, dtype.bits());
        }
        Ok(values.into_iter().map(|v| sample_to_f64(v, dtype)).collect())
    }
}

/// Read the geotransform from ModelTransformation or ModelTiepoint + ModelPixelScale.
fn read_geotransform<D: Read + Seek>(decoder: &mut Decoder<D>, name: &str) -> Result<GeoTransform> {
    if let Ok(m) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
        if m.len() >= 8 {
            return Ok(GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }

    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
    let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);

    if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
        if tiepoint.len() >= 6 && scale.len() >= 2 {
            // Tiepoint format: [i, j, k, x, y, z]; pixel (i, j) maps to world (x, y)
            let (i, j) = (tiepoint[0], tiepoint[1]);
            let (sx, sy) = (scale[0], scale[1]);
            let origin_x = tiepoint[3] - i * sx;
            let origin_y = tiepoint[4] + j * sy;
            return Ok(GeoTransform::from_gdal([origin_x, sx, 0.0, origin_y, 0.0, -sy]));
        }
    }

    Err(RasterError::InvalidGeoTiff(format!(
        "{}: no ModelTransformation or ModelTiepoint/ModelPixelScale tags",
        name
    )))
}

/// Try to read the no-data value from the GDAL_NODATA tag.
fn read_nodata_value<D: Read + Seek>(decoder: &mut Decoder<D>) -> Option<f64> {
    decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse().ok())
}

impl<R: Read + Seek> RasterSource for GeoTiffSource<R> {
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn meta(&self) -> &RasterMeta {
        &self.meta
    }

    fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    fn colormap(&self) -> Option<&ColorMap> {
        self.colormap.as_ref()
    }

    fn read_window(&mut self, window: &PixelWindow) -> Result<Array3<f64>> {
        let (height, bands) = (self.meta.height, self.meta.count);
        check_window(&self.name, window, self.meta.width, height)?;

        let (c0, r0) = (window.col_off as usize, window.row_off as usize);
        let (c1, r1) = (window.col_end() as usize, window.row_end() as usize);
        let mut out = Array3::<f64>::zeros((bands, r1 - r0, c1 - c0));

        let (chunk_w, chunk_h) = (self.layout.chunk_width, self.layout.chunk_height);
        let samples = self.layout.samples_per_pixel(bands);

        for plane in 0..self.layout.planes(bands) {
            for chunk_row in r0 / chunk_h..=(r1 - 1) / chunk_h {
                for chunk_col in c0 / chunk_w..=(c1 - 1) / chunk_w {
                    let index = plane * self.layout.chunks_per_plane()
                        + chunk_row * self.layout.chunks_across
                        + chunk_col;
                    let (data_w, data_h) = self.layout.stored_size(chunk_row, height);
                    let values = self.read_chunk(index, data_w, data_h, samples)?;

                    let (x0, y0) = (chunk_col * chunk_w, chunk_row * chunk_h);
                    for row in r0.max(y0)..r1.min(y0 + data_h) {
                        for col in c0.max(x0)..c1.min(x0 + data_w) {
                            let base = ((row - y0) * data_w + (col - x0)) * samples;
                            for sample in 0..samples {
                                out[[plane + sample, row - r0, col - c0]] = values[base + sample];
                            }
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tiff::encoder::TiffEncoder;

    /// Layout and compression tags for [`encode_tiff`].
    enum Field {
        Short(Tag, u16),
        Shorts(Tag, Vec<u16>),
        Long(Tag, u32),
        Ascii(Tag, &'static str),
    }

    /// Assemble a single-image GeoTIFF from pre-encoded chunks.
    fn encode_tiff((width, height): (u32, u32), chunks: &[Vec<u8>], tiled: bool, fields: Vec<Field>) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
            let mut dir = encoder.new_directory().unwrap();
            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            for chunk in chunks {
                offsets.push(dir.write_data(chunk.as_slice()).unwrap() as u32);
                counts.push(chunk.len() as u32);
            }
            let (offsets_tag, counts_tag) = if tiled {
                (Tag::TileOffsets, Tag::TileByteCounts)
            } else {
                (Tag::StripOffsets, Tag::StripByteCounts)
            };
            dir.write_tag(offsets_tag, offsets.as_slice()).unwrap();
            dir.write_tag(counts_tag, counts.as_slice()).unwrap();
            dir.write_tag(Tag::ImageWidth, width).unwrap();
            dir.write_tag(Tag::ImageLength, height).unwrap();
            dir.write_tag(Tag::PhotometricInterpretation, 1u16).unwrap();
            dir.write_tag(Tag::ModelPixelScaleTag, &[0.5f64, 0.5, 0.0][..]).unwrap();
            dir.write_tag(Tag::ModelTiepointTag, &[0.0f64, 0.0, 0.0, 9.0, 46.0, 0.0][..])
                .unwrap();
            for field in fields {
                match field {
                    Field::Short(tag, v) => dir.write_tag(tag, v),
                    Field::Shorts(tag, v) => dir.write_tag(tag, v.as_slice()),
                    Field::Long(tag, v) => dir.write_tag(tag, v),
                    Field::Ascii(tag, v) => dir.write_tag(tag, v),
                }
                .unwrap();
            }
            dir.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn lzw(bytes: &[u8]) -> Vec<u8> {
        weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .encode(bytes)
            .unwrap()
    }

    fn deflate(bytes: &[u8]) -> Vec<u8> {
        let mut zlib = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        zlib.write_all(bytes).unwrap();
        zlib.finish().unwrap()
    }

    #[test]
    fn test_tiled_lzw_separate_planes() {
        // 5x3 image, 4x2 tiles (padded), two uint16 bands stored as planes
        let (width, height, tile_w, tile_h) = (5, 3, 4, 2);
        let value = |band: usize, row: usize, col: usize| (1000 * band + 10 * row + col) as u16;

        let mut chunks = Vec::new();
        for band in 0..2 {
            for tile_row in 0..2 {
                for tile_col in 0..2 {
                    let mut tile = vec![0u16; tile_w * tile_h];
                    for r in 0..tile_h {
                        for c in 0..tile_w {
                            let (row, col) = (tile_row * tile_h + r, tile_col * tile_w + c);
                            if row < height && col < width {
                                tile[r * tile_w + c] = value(band, row, col);
                            }
                        }
                        // horizontal differencing
                        for c in (1..tile_w).rev() {
                            let i = r * tile_w + c;
                            tile[i] = tile[i].wrapping_sub(tile[i - 1]);
                        }
                    }
                    let bytes: Vec<u8> = tile.iter().flat_map(|v| v.to_ne_bytes()).collect();
                    chunks.push(lzw(&bytes));
                }
            }
        }

        let fields = vec![
            Field::Shorts(Tag::BitsPerSample, vec![16, 16]),
            Field::Short(Tag::SamplesPerPixel, 2),
            Field::Short(Tag::Compression, 5),
            Field::Short(Tag::Predictor, 2),
            Field::Short(Tag::PlanarConfiguration, 2),
            Field::Long(Tag::TileWidth, 4),
            Field::Long(Tag::TileLength, 2),
        ];
        let bytes = encode_tiff((5, 3), &chunks, true, fields);

        let mut source = GeoTiffSource::from_bytes("tiled.tif", bytes).unwrap();
        assert_eq!(source.meta().count, 2);
        assert_eq!(source.meta().dtype, DataType::U16);

        let full = source.read_window(&PixelWindow::new(0, 0, 5, 3)).unwrap();
        for ((band, row, col), v) in full.indexed_iter() {
            assert_eq!(*v, f64::from(value(band, row, col)), "({band}, {row}, {col})");
        }

        // crosses all four tiles of each plane
        let part = source.read_window(&PixelWindow::new(3, 1, 2, 2)).unwrap();
        assert_eq!(part[[0, 0, 0]], 13.0);
        assert_eq!(part[[1, 1, 1]], 1024.0);
    }

    #[test]
    fn test_deflate_strips_three_bands() {
        // 3x5 RGB-like uint8 image, 2 rows per strip (last strip has 1 row)
        let (width, height, rows_per_strip) = (3usize, 5usize, 2usize);
        let value = |band: usize, row: usize, col: usize| (50 * band + 10 * row + col) as u8;

        let mut chunks = Vec::new();
        for strip in 0..height.div_ceil(rows_per_strip) {
            let mut bytes = Vec::new();
            for row in strip * rows_per_strip..((strip + 1) * rows_per_strip).min(height) {
                for col in 0..width {
                    bytes.extend((0..3).map(|band| value(band, row, col)));
                }
            }
            chunks.push(deflate(&bytes));
        }

        let fields = vec![
            Field::Shorts(Tag::BitsPerSample, vec![8, 8, 8]),
            Field::Short(Tag::SamplesPerPixel, 3),
            Field::Short(Tag::Compression, 8),
            Field::Long(Tag::RowsPerStrip, 2),
        ];
        let bytes = encode_tiff((3, 5), &chunks, false, fields);

        let mut source = GeoTiffSource::from_bytes("strips.tif", bytes).unwrap();
        assert_eq!(source.meta().count, 3);
        let data = source.read_window(&PixelWindow::new(1, 3, 2, 2)).unwrap();
        assert_eq!(data.dim(), (3, 2, 2));
        assert_eq!(data[[0, 0, 0]], 31.0);
        assert_eq!(data[[2, 1, 1]], 142.0);
    }

    #[test]
    fn test_sparse_chunk_reads_as_nodata() {
        let fields = vec![
            Field::Short(Tag::BitsPerSample, 8),
            Field::Ascii(Tag::GdalNodata, "255"),
        ];
        let bytes = encode_tiff((2, 2), &[Vec::new()], false, fields);
        let mut source = GeoTiffSource::from_bytes("sparse.tif", bytes).unwrap();
        let data = source.read_window(&PixelWindow::new(0, 0, 2, 2)).unwrap();
        assert!(data.iter().all(|v| *v == 255.0));
    }

    #[test]
    fn test_unpack_bits() {
        // literal run of 3, repeat run of 4, no-op, literal run of 1
        let packed = [2, 1, 2, 3, (-3i8) as u8, 9, 0x80, 0, 7];
        assert_eq!(unpack_bits(&packed, 8).unwrap(), vec![1, 2, 3, 9, 9, 9, 9, 7]);
        assert!(unpack_bits(&[4, 1, 2], 5).is_err());
    }

    #[test]
    fn test_horizontal_predictor_wraps_per_row() {
        // two rows of 2 pixels x 2 samples, 8-bit differences
        let mut samples = vec![10, 200, 5, 100, 0, 1, 255, 255];
        undo_horizontal_predictor(&mut samples, 4, 2, 8);
        assert_eq!(samples, vec![10, 200, 15, 44, 0, 1, 255, 0]);
    }

    #[test]
    fn test_signed_and_float_samples() {
        assert_eq!(sample_to_f64(0xFF, DataType::I8), -1.0);
        assert_eq!(sample_to_f64(0xFFFE, DataType::I16), -2.0);
        assert_eq!(sample_to_f64(0xFFFE, DataType::U16), 65534.0);
        assert_eq!(sample_to_f64(u64::from(1.5f32.to_bits()), DataType::F32), 1.5);
        assert_eq!(ByteOrder::Big.read_unsigned(&[0x01, 0x02]), 0x0102);
        assert_eq!(ByteOrder::Little.read_unsigned(&[0x01, 0x02]), 0x0201);
    }

    #[test]
    fn test_decompress_lzw_and_deflate() {
        let data: Vec<u8> = (0..200u8).map(|v| v % 7).collect();
        assert_eq!(Compression::Lzw.decompress(lzw(&data), data.len()).unwrap(), data);
        assert_eq!(
            Compression::Deflate.decompress(deflate(&data), data.len()).unwrap(),
            data
        );

        assert!(Compression::None.decompress(vec![1, 2], 3).is_err());
        assert!(Compression::from_tiff(7, "jpeg.tif").is_err());
    }

    #[test]
    fn test_rejects_non_tiff() {
        let err = GeoTiffSource::from_bytes("junk", b"PK\x03\x04".to_vec()).unwrap_err();
        assert!(matches!(err, RasterError::InvalidGeoTiff(_)));
    }
}
