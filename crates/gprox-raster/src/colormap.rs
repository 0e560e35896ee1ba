//! Palette colormaps attached to single-band 8-bit rasters.

use std::collections::BTreeMap;

/// Mapping from 8-bit pixel value to RGBA colour.
///
/// Only used when writing output; never consulted by any computation.
/// Values without an entry are written as opaque black.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorMap {
    entries: BTreeMap<u8, [u8; 4]>,
}

impl ColorMap {
    /// Create an empty colormap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, value: u8, rgba: [u8; 4]) -> Self {
        self.insert(value, rgba);
        self
    }

    /// Set the colour for a pixel value.
    pub fn insert(&mut self, value: u8, rgba: [u8; 4]) {
        self.entries.insert(value, rgba);
    }

    /// Colour for a pixel value, if one is set.
    pub fn get(&self, value: u8) -> Option<[u8; 4]> {
        self.entries.get(&value).copied()
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the colormap has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over explicit entries in value order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, [u8; 4])> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }

    /// Green ramp used for percentage rasters: value `i` maps to `(0, i, 0, 255)`.
    pub fn green_gradient() -> Self {
        let entries = (0..=u8::MAX).map(|i| (i, [0, i, 0, 255])).collect();
        Self { entries }
    }

    /// Expand to the 768-entry TIFF `ColorMap` layout.
    ///
    /// All red values come first, then green, then blue, each scaled from
    /// 8 to 16 bits. Alpha has no place in a TIFF palette and is dropped.
    pub fn to_tiff_palette(&self) -> Vec<u16> {
        let mut palette = vec![0u16; 3 * 256];
        for (value, [r, g, b, _]) in self.iter() {
            let i = value as usize;
            palette[i] = u16::from(r) * 257;
            palette[256 + i] = u16::from(g) * 257;
            palette[512 + i] = u16::from(b) * 257;
        }
        palette
    }

    /// Rebuild a colormap from a TIFF `ColorMap` tag.
    ///
    /// Returns `None` if the tag does not hold three equal-length channels.
    /// Entries that are pure black are omitted so a round trip through a
    /// file does not grow the map.
    pub fn from_tiff_palette(palette: &[u16]) -> Option<Self> {
        if palette.is_empty() || palette.len() % 3 != 0 {
            return None;
        }
        let n = (palette.len() / 3).min(256);
        let stride = palette.len() / 3;

        let mut map = ColorMap::new();
        for i in 0..n {
            let rgb = [palette[i], palette[stride + i], palette[2 * stride + i]];
            if rgb == [0, 0, 0] {
                continue;
            }
            let [r, g, b] = rgb.map(|c| (c / 257) as u8);
            map.insert(i as u8, [r, g, b, 255]);
        }
        Some(map)
    }
}

impl FromIterator<(u8, [u8; 4])> for ColorMap {
    fn from_iter<I: IntoIterator<Item = (u8, [u8; 4])>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_green_gradient() {
        let cmap = ColorMap::green_gradient();
        assert_eq!(cmap.len(), 256);
        assert_eq!(cmap.get(0), Some([0, 0, 0, 255]));
        assert_eq!(cmap.get(100), Some([0, 100, 0, 255]));
        assert_eq!(cmap.get(255), Some([0, 255, 0, 255]));
    }

    #[test]
    fn test_tiff_palette_layout() {
        let cmap = ColorMap::new().with(10, [0, 100, 0, 255]).with(50, [255, 0, 0, 255]);
        let palette = cmap.to_tiff_palette();

        assert_eq!(palette.len(), 768);
        assert_eq!(palette[10], 0);
        assert_eq!(palette[256 + 10], 100 * 257);
        assert_eq!(palette[50], 65535);
        assert_eq!(palette[512 + 50], 0);
    }

    #[test]
    fn test_palette_round_trip_drops_alpha() {
        let cmap = ColorMap::new().with(30, [255, 255, 76, 128]);
        let back = ColorMap::from_tiff_palette(&cmap.to_tiff_palette()).unwrap();
        assert_eq!(back.get(30), Some([255, 255, 76, 255]));
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn test_malformed_palette() {
        assert!(ColorMap::from_tiff_palette(&[]).is_none());
        assert!(ColorMap::from_tiff_palette(&[1, 2]).is_none());
    }
}
