//! Binary raster masks over an item's pixel grid.
//!
//! Masks are stored as a packed bitmap (one bit per pixel, row major).
//! Serialized forms use uncompressed run-length counts that alternate
//! between background and foreground, starting with background.

use serde::{Deserialize, Serialize};

use super::bbox::BBoxXYXY;
use super::space::Pixel;
use crate::error::LabelbridgeError;

const WORD_BITS: usize = 64;

/// Largest mask accepted, in pixels (a 16384 x 16384 raster).
pub const MAX_MASK_PIXELS: u64 = 1 << 28;

/// A binary mask of `width x height` pixels.
///
/// Bits past the last pixel are always zero, so derived equality compares
/// masks pixel for pixel.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Mask {
    width: u32,
    height: u32,
    words: Vec<u64>,
}

impl Mask {
    /// Creates an all-background mask.
    ///
    /// # Errors
    /// Returns [`LabelbridgeError::InvalidAnnotation`] when either
    /// dimension is zero or the mask exceeds [`MAX_MASK_PIXELS`].
    pub fn new(width: u32, height: u32) -> Result<Self, LabelbridgeError> {
        if width == 0 || height == 0 {
            return Err(LabelbridgeError::InvalidAnnotation(format!(
                "mask dimensions must be positive, got {width}x{height}"
            )));
        }
        if u64::from(width) * u64::from(height) > MAX_MASK_PIXELS {
            return Err(LabelbridgeError::InvalidAnnotation(format!(
                "mask of {width}x{height} exceeds {MAX_MASK_PIXELS} pixels"
            )));
        }
        let pixels = width as usize * height as usize;
        Ok(Self {
            width,
            height,
            words: vec![0; pixels.div_ceil(WORD_BITS)],
        })
    }

    /// Creates a mask whose foreground is every pixel where `f(x, y)` holds.
    pub fn from_fn(
        width: u32,
        height: u32,
        mut f: impl FnMut(u32, u32) -> bool,
    ) -> Result<Self, LabelbridgeError> {
        let mut mask = Self::new(width, height)?;
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    mask.set_index(mask.index(x, y));
                }
            }
        }
        Ok(mask)
    }

    /// Rebuilds a mask from run-length counts.
    ///
    /// # Errors
    /// The counts must cover exactly `width * height` pixels.
    pub fn from_rle(width: u32, height: u32, counts: &[u32]) -> Result<Self, LabelbridgeError> {
        let expected = u64::from(width) * u64::from(height);
        let covered = counts
            .iter()
            .try_fold(0u64, |acc, &run| acc.checked_add(u64::from(run)));
        if covered != Some(expected) {
            return Err(LabelbridgeError::InvalidAnnotation(format!(
                "run-length counts do not cover the {width}x{height} mask"
            )));
        }

        let mut mask = Self::new(width, height)?;
        let mut pos = 0usize;
        for (run_idx, &run) in counts.iter().enumerate() {
            let end = pos + run as usize;
            if run_idx % 2 == 1 {
                for i in pos..end {
                    mask.set_index(i);
                }
            }
            pos = end;
        }
        Ok(mask)
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    fn set_index(&mut self, i: usize) {
        self.words[i / WORD_BITS] |= 1u64 << (i % WORD_BITS);
    }

    #[inline]
    fn get_index(&self, i: usize) -> bool {
        self.words[i / WORD_BITS] & (1u64 << (i % WORD_BITS)) != 0
    }

    /// Returns false for coordinates outside the mask.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.get_index(self.index(x, y))
    }

    /// Sets or clears one pixel. Out-of-range coordinates are ignored.
    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x >= self.width || y >= self.height {
            return;
        }
        let i = self.index(x, y);
        if value {
            self.set_index(i);
        } else {
            self.words[i / WORD_BITS] &= !(1u64 << (i % WORD_BITS));
        }
    }

    /// Number of foreground pixels.
    pub fn area(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Iterates foreground pixels in row-major order.
    pub fn foreground(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let width = self.width as usize;
        self.words
            .iter()
            .enumerate()
            .filter(|(_, w)| **w != 0)
            .flat_map(move |(wi, &w)| {
                (0..WORD_BITS)
                    .filter(move |b| w & (1u64 << b) != 0)
                    .map(move |b| {
                        let i = wi * WORD_BITS + b;
                        ((i % width) as u32, (i / width) as u32)
                    })
            })
    }

    /// Tight pixel-space bounding box of the foreground (max is exclusive).
    pub fn bbox(&self) -> Option<BBoxXYXY<Pixel>> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for (x, y) in self.foreground() {
            bounds = Some(match bounds {
                None => (x, y, x, y),
                Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
            });
        }
        bounds.map(|(x0, y0, x1, y1)| {
            BBoxXYXY::from_xyxy(x0 as f64, y0 as f64, (x1 + 1) as f64, (y1 + 1) as f64)
        })
    }

    /// Number of pixels set in both masks.
    ///
    /// Masks of different sizes are compared over their common top-left
    /// region.
    pub fn intersection_area(&self, other: &Mask) -> u64 {
        if self.dimensions() == other.dimensions() {
            return self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| (a & b).count_ones() as u64)
                .sum();
        }
        let w = self.width.min(other.width);
        let h = self.height.min(other.height);
        let mut count = 0;
        for y in 0..h {
            for x in 0..w {
                if self.get(x, y) && other.get(x, y) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Intersection over union; two empty masks count as identical.
    pub fn iou(&self, other: &Mask) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union == 0 {
            1.0
        } else {
            inter as f64 / union as f64
        }
    }

    /// Adds every foreground pixel of `other` to this mask.
    pub fn union_with(&mut self, other: &Mask) {
        if self.dimensions() == other.dimensions() {
            for (a, b) in self.words.iter_mut().zip(&other.words) {
                *a |= b;
            }
        } else {
            for (x, y) in other.foreground() {
                self.set(x, y, true);
            }
        }
    }

    /// Run-length counts, alternating background/foreground and starting
    /// with a (possibly zero) background run.
    pub fn to_rle(&self) -> Vec<u32> {
        let mut counts = Vec::new();
        let mut current = false;
        let mut run = 0u32;
        for i in 0..self.pixel_count() {
            let bit = self.get_index(i);
            if bit != current {
                counts.push(run);
                run = 0;
                current = bit;
            }
            run += 1;
        }
        counts.push(run);
        counts
    }
}

impl std::fmt::Debug for Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("area", &self.area())
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct MaskData {
    width: u32,
    height: u32,
    rle: Vec<u32>,
}

impl Serialize for Mask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MaskData {
            width: self.width,
            height: self.height,
            rle: self.to_rle(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Mask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = MaskData::deserialize(deserializer)?;
        Mask::from_rle(data.width, data.height, &data.rle).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: u32, x0: u32, y0: u32, side: u32) -> Mask {
        Mask::from_fn(size, size, |x, y| {
            x >= x0 && x < x0 + side && y >= y0 && y < y0 + side
        })
        .unwrap()
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(Mask::new(0, 4).is_err());
        assert!(Mask::new(4, 0).is_err());
    }

    #[test]
    fn set_get_and_area() {
        let mut mask = Mask::new(70, 3).unwrap();
        mask.set(69, 0, true);
        mask.set(0, 1, true);
        mask.set(100, 100, true);
        assert!(mask.get(69, 0));
        assert!(mask.get(0, 1));
        assert!(!mask.get(1, 1));
        assert_eq!(mask.area(), 2);

        mask.set(69, 0, false);
        assert_eq!(mask.area(), 1);
    }

    #[test]
    fn rle_roundtrip_and_leading_background() {
        let mask = square(8, 0, 0, 2);
        let counts = mask.to_rle();
        assert_eq!(counts[0], 0);
        assert_eq!(Mask::from_rle(8, 8, &counts).unwrap(), mask);

        let empty = Mask::new(3, 3).unwrap();
        assert_eq!(empty.to_rle(), vec![9]);
    }

    #[test]
    fn rle_with_wrong_total_is_rejected() {
        assert!(Mask::from_rle(2, 2, &[1, 1]).is_err());
        assert!(Mask::from_rle(2, 2, &[1, 5]).is_err());
        assert!(Mask::from_rle(2, 2, &[u32::MAX, u32::MAX, 6]).is_err());
    }

    #[test]
    fn huge_dimensions_are_rejected_before_allocating() {
        assert!(Mask::new(4_000_000_000, 4_000_000_000).is_err());
        assert!(Mask::new(16_385, 16_384).is_err());
        assert!(Mask::from_rle(4_000_000_000, 4_000_000_000, &[1]).is_err());
        assert!(Mask::from_rle(100_000, 100_000, &[u32::MAX, u32::MAX, u32::MAX]).is_err());
    }

    #[test]
    fn bbox_and_iou() {
        let a = square(10, 2, 2, 4);
        let b = square(10, 4, 2, 4);
        assert_eq!(a.bbox(), Some(BBoxXYXY::from_xyxy(2.0, 2.0, 6.0, 6.0)));
        assert_eq!(a.intersection_area(&b), 8);
        assert!((a.iou(&b) - 8.0 / 24.0).abs() < 1e-12);
        assert_eq!(Mask::new(4, 4).unwrap().bbox(), None);
    }

    #[test]
    fn foreground_is_row_major() {
        let mut mask = Mask::new(5, 5).unwrap();
        mask.set(4, 0, true);
        mask.set(1, 2, true);
        let pixels: Vec<_> = mask.foreground().collect();
        assert_eq!(pixels, vec![(4, 0), (1, 2)]);
    }

    #[test]
    fn serde_uses_rle() {
        let mask = square(4, 1, 1, 2);
        let json = serde_json::to_string(&mask).unwrap();
        assert_eq!(json, r#"{"width":4,"height":4,"rle":[5,2,2,2,5]}"#);
        let back: Mask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mask);
    }
}
