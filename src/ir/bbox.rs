//! Axis-aligned boxes in canonical XYXY form.

use serde::{Deserialize, Serialize};

use super::coord::Coord;
use super::{Normalized, Pixel};

/// An axis-aligned box stored as (xmin, ymin, xmax, ymax).
///
/// The struct itself accepts any values so that readers can represent what
/// a file actually contains; [`Annotation::bbox`](super::Annotation::bbox)
/// is the validating constructor.
#[derive(Clone, Copy, PartialEq)]
pub struct BBoxXYXY<TSpace> {
    pub min: Coord<TSpace>,
    pub max: Coord<TSpace>,
}

impl<TSpace> BBoxXYXY<TSpace> {
    #[inline]
    pub fn from_xyxy(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            min: Coord::new(xmin, ymin),
            max: Coord::new(xmax, ymax),
        }
    }

    /// Builds a box from its top-left corner and size.
    #[inline]
    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::from_xyxy(x, y, x + width, y + height)
    }

    /// Smallest box containing every point, or `None` for an empty slice.
    pub fn enclosing(points: &[Coord<TSpace>]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self::from_xyxy(first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            bbox.min.x = bbox.min.x.min(p.x);
            bbox.min.y = bbox.min.y.min(p.y);
            bbox.max.x = bbox.max.x.max(p.x);
            bbox.max.y = bbox.max.y.max(p.y);
        }
        Some(bbox)
    }

    #[inline]
    pub fn xmin(&self) -> f64 {
        self.min.x
    }

    #[inline]
    pub fn ymin(&self) -> f64 {
        self.min.y
    }

    #[inline]
    pub fn xmax(&self) -> f64 {
        self.max.x
    }

    #[inline]
    pub fn ymax(&self) -> f64 {
        self.max.y
    }

    /// May be negative for a malformed box.
    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// May be negative for a malformed box.
    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    #[inline]
    pub fn to_xywh(&self) -> (f64, f64, f64, f64) {
        (self.xmin(), self.ymin(), self.width(), self.height())
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.min.is_finite() && self.max.is_finite()
    }

    /// Returns true if min <= max on both axes.
    #[inline]
    pub fn is_ordered(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y
    }

    /// Area shared with `other`; zero when the boxes do not overlap.
    pub fn intersection_area(&self, other: &Self) -> f64 {
        let w = self.xmax().min(other.xmax()) - self.xmin().max(other.xmin());
        let h = self.ymax().min(other.ymax()) - self.ymin().max(other.ymin());
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Intersection over union. Two degenerate boxes at the same place
    /// count as identical.
    pub fn iou(&self, other: &Self) -> f64 {
        let inter = self.intersection_area(other);
        let union = self.area().max(0.0) + other.area().max(0.0) - inter;
        if union <= 0.0 {
            let same = self.min.x == other.min.x
                && self.min.y == other.min.y
                && self.max.x == other.max.x
                && self.max.y == other.max.y;
            if same {
                1.0
            } else {
                0.0
            }
        } else {
            inter / union
        }
    }
}

impl<TSpace> std::fmt::Debug for BBoxXYXY<TSpace> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BBoxXYXY")
            .field("xmin", &self.min.x)
            .field("ymin", &self.min.y)
            .field("xmax", &self.max.x)
            .field("ymax", &self.max.y)
            .finish()
    }
}

impl<TSpace> Default for BBoxXYXY<TSpace> {
    fn default() -> Self {
        Self::from_xyxy(0.0, 0.0, 0.0, 0.0)
    }
}

#[derive(Serialize, Deserialize)]
struct BBoxData {
    xmin: f64,
    ymin: f64,
    xmax: f64,
    ymax: f64,
}

impl<TSpace> Serialize for BBoxXYXY<TSpace> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BBoxData {
            xmin: self.xmin(),
            ymin: self.ymin(),
            xmax: self.xmax(),
            ymax: self.ymax(),
        }
        .serialize(serializer)
    }
}

impl<'de, TSpace> Deserialize<'de> for BBoxXYXY<TSpace> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let data = BBoxData::deserialize(deserializer)?;
        Ok(BBoxXYXY::from_xyxy(
            data.xmin, data.ymin, data.xmax, data.ymax,
        ))
    }
}

impl BBoxXYXY<Pixel> {
    pub fn to_normalized(&self, image_width: f64, image_height: f64) -> BBoxXYXY<Normalized> {
        BBoxXYXY::from_xyxy(
            self.min.x / image_width,
            self.min.y / image_height,
            self.max.x / image_width,
            self.max.y / image_height,
        )
    }
}

impl BBoxXYXY<Normalized> {
    pub fn to_pixel(&self, image_width: f64, image_height: f64) -> BBoxXYXY<Pixel> {
        BBoxXYXY::from_xyxy(
            self.min.x * image_width,
            self.min.y * image_height,
            self.max.x * image_width,
            self.max.y * image_height,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_from_xywh() {
        let bbox: BBoxXYXY<Pixel> = BBoxXYXY::from_xywh(10.0, 20.0, 90.0, 60.0);
        assert_eq!(bbox.xmax(), 100.0);
        assert_eq!(bbox.ymax(), 80.0);
        assert_eq!(bbox.area(), 5400.0);
        assert_eq!(bbox.to_xywh(), (10.0, 20.0, 90.0, 60.0));
    }

    #[test]
    fn test_bbox_iou() {
        let a: BBoxXYXY<Pixel> = BBoxXYXY::from_xyxy(0.0, 0.0, 10.0, 10.0);
        let b: BBoxXYXY<Pixel> = BBoxXYXY::from_xyxy(5.0, 0.0, 15.0, 10.0);
        let far: BBoxXYXY<Pixel> = BBoxXYXY::from_xyxy(50.0, 50.0, 60.0, 60.0);

        assert!((a.iou(&a) - 1.0).abs() < 1e-12);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-12);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_bbox_iou_of_degenerate_boxes() {
        let point: BBoxXYXY<Normalized> = BBoxXYXY::from_xyxy(0.5, 0.5, 0.5, 0.5);
        let other: BBoxXYXY<Normalized> = BBoxXYXY::from_xyxy(0.2, 0.2, 0.2, 0.4);

        assert_eq!(point.iou(&point), 1.0);
        assert_eq!(point.iou(&other), 0.0);
    }

    #[test]
    fn test_bbox_enclosing_points() {
        let points = [
            Coord::<Pixel>::new(3.0, 9.0),
            Coord::new(1.0, 4.0),
            Coord::new(7.0, 2.0),
        ];
        let bbox = BBoxXYXY::enclosing(&points).unwrap();
        assert_eq!(bbox, BBoxXYXY::from_xyxy(1.0, 2.0, 7.0, 9.0));
        assert!(BBoxXYXY::<Pixel>::enclosing(&[]).is_none());
    }

    #[test]
    fn test_bbox_normalization_roundtrip() {
        let px: BBoxXYXY<Pixel> = BBoxXYXY::from_xyxy(64.0, 96.0, 320.0, 384.0);
        let norm = px.to_normalized(640.0, 480.0);
        assert!((norm.xmin() - 0.1).abs() < 1e-12);
        assert!((norm.ymax() - 0.8).abs() < 1e-12);
        let back = norm.to_pixel(640.0, 480.0);
        assert!((back.xmin() - 64.0).abs() < 1e-9);
        assert!((back.ymax() - 384.0).abs() < 1e-9);
    }
}
