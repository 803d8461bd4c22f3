//! Annotation variants of the unified model.
//!
//! An [`Annotation`] is a set of common fields (id, label, group, z-order,
//! attributes) plus one [`AnnotationKind`] payload. The validating
//! constructors (`Annotation::bbox`, `Annotation::polygon`, ...) are the
//! intended way in; struct literals stay available for readers that must
//! represent whatever a file contains so validation can report it.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::attrs::{AttributeValue, Attributes};
use super::bbox::BBoxXYXY;
use super::coord::Coord;
use super::ids::{AnnotationId, CategoryId, InstanceId};
use super::mask::Mask;
use super::space::Pixel;
use crate::error::LabelbridgeError;

/// Identity of an object instance within an item.
///
/// Instance ids are scoped per category: the same instance id may appear
/// once for every label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceKey {
    pub label: CategoryId,
    pub instance_id: InstanceId,
}

impl InstanceKey {
    pub fn new(label: impl Into<CategoryId>, instance_id: impl Into<InstanceId>) -> Self {
        Self {
            label: label.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.instance_id)
    }
}

/// Variant payloads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Image-level label; the category lives in [`Annotation::label`].
    Label,
    Bbox {
        bbox: BBoxXYXY<Pixel>,
    },
    /// Class or binary mask without instance identity.
    Mask {
        mask: Mask,
    },
    InstanceMask {
        mask: Mask,
        instance_id: InstanceId,
    },
    /// Sub-part of an instance at hierarchy `level` (1 = direct parts).
    PartMask {
        mask: Mask,
        level: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<InstanceKey>,
    },
    Polygon {
        points: Vec<Coord<Pixel>>,
    },
    Points {
        points: Vec<Coord<Pixel>>,
    },
    Caption {
        text: String,
    },
    Cuboid3d {
        position: [f64; 3],
        rotation: [f64; 3],
        scale: [f64; 3],
    },
}

/// Discriminant of [`AnnotationKind`], used for capability sets and reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationType {
    Label,
    Bbox,
    Mask,
    InstanceMask,
    PartMask,
    Polygon,
    Points,
    Caption,
    Cuboid3d,
}

impl AnnotationType {
    pub const ALL: [AnnotationType; 9] = [
        AnnotationType::Label,
        AnnotationType::Bbox,
        AnnotationType::Mask,
        AnnotationType::InstanceMask,
        AnnotationType::PartMask,
        AnnotationType::Polygon,
        AnnotationType::Points,
        AnnotationType::Caption,
        AnnotationType::Cuboid3d,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnnotationType::Label => "label",
            AnnotationType::Bbox => "bbox",
            AnnotationType::Mask => "mask",
            AnnotationType::InstanceMask => "instance_mask",
            AnnotationType::PartMask => "part_mask",
            AnnotationType::Polygon => "polygon",
            AnnotationType::Points => "points",
            AnnotationType::Caption => "caption",
            AnnotationType::Cuboid3d => "cuboid_3d",
        }
    }
}

impl fmt::Display for AnnotationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One annotation attached to a dataset item.
///
/// Equality is structural: two annotations are equal iff every common
/// field and the payload match exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,

    /// Category, resolved against the owning dataset's label table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<CategoryId>,

    /// Optional grouping of related annotations (e.g. an object's box and mask).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,

    #[serde(default)]
    pub z_order: i32,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(flatten)]
    pub kind: AnnotationKind,
}

impl Annotation {
    fn with_kind(id: impl Into<AnnotationId>, label: Option<CategoryId>, kind: AnnotationKind) -> Self {
        Self {
            id: id.into(),
            label,
            group: None,
            z_order: 0,
            attributes: Attributes::new(),
            kind,
        }
    }

    pub fn label(id: impl Into<AnnotationId>, label: impl Into<CategoryId>) -> Self {
        Self::with_kind(id, Some(label.into()), AnnotationKind::Label)
    }

    /// Creates a box from its top-left corner and size.
    ///
    /// # Errors
    /// Width and height must be finite and non-negative.
    pub fn bbox(
        id: impl Into<AnnotationId>,
        label: impl Into<CategoryId>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    ) -> Result<Self, LabelbridgeError> {
        if !(x.is_finite() && y.is_finite() && width.is_finite() && height.is_finite()) {
            return Err(LabelbridgeError::InvalidAnnotation(format!(
                "bbox has non-finite coordinates ({x}, {y}, {width}, {height})"
            )));
        }
        if width < 0.0 || height < 0.0 {
            return Err(LabelbridgeError::InvalidAnnotation(format!(
                "bbox size must be non-negative, got {width}x{height}"
            )));
        }
        Ok(Self::with_kind(
            id,
            Some(label.into()),
            AnnotationKind::Bbox {
                bbox: BBoxXYXY::from_xywh(x, y, width, height),
            },
        ))
    }

    pub fn mask(id: impl Into<AnnotationId>, label: Option<CategoryId>, mask: Mask) -> Self {
        Self::with_kind(id, label, AnnotationKind::Mask { mask })
    }

    pub fn instance_mask(
        id: impl Into<AnnotationId>,
        label: impl Into<CategoryId>,
        instance_id: impl Into<InstanceId>,
        mask: Mask,
    ) -> Self {
        Self::with_kind(
            id,
            Some(label.into()),
            AnnotationKind::InstanceMask {
                mask,
                instance_id: instance_id.into(),
            },
        )
    }

    /// # Errors
    /// Part levels start at 1; level 0 is the instance layer itself.
    pub fn part_mask(
        id: impl Into<AnnotationId>,
        label: impl Into<CategoryId>,
        level: u32,
        owner: Option<InstanceKey>,
        mask: Mask,
    ) -> Result<Self, LabelbridgeError> {
        if level == 0 {
            return Err(LabelbridgeError::InvalidAnnotation(
                "part masks must have level >= 1".to_string(),
            ));
        }
        Ok(Self::with_kind(
            id,
            Some(label.into()),
            AnnotationKind::PartMask { mask, level, owner },
        ))
    }

    /// # Errors
    /// A polygon needs at least three finite vertices.
    pub fn polygon(
        id: impl Into<AnnotationId>,
        label: impl Into<CategoryId>,
        points: Vec<Coord<Pixel>>,
    ) -> Result<Self, LabelbridgeError> {
        if points.len() < 3 {
            return Err(LabelbridgeError::InvalidAnnotation(format!(
                "polygon needs at least 3 points, got {}",
                points.len()
            )));
        }
        if !points.iter().all(Coord::is_finite) {
            return Err(LabelbridgeError::InvalidAnnotation(
                "polygon has non-finite vertices".to_string(),
            ));
        }
        Ok(Self::with_kind(
            id,
            Some(label.into()),
            AnnotationKind::Polygon { points },
        ))
    }

    pub fn points(
        id: impl Into<AnnotationId>,
        label: Option<CategoryId>,
        points: Vec<Coord<Pixel>>,
    ) -> Self {
        Self::with_kind(id, label, AnnotationKind::Points { points })
    }

    pub fn caption(id: impl Into<AnnotationId>, text: impl Into<String>) -> Self {
        Self::with_kind(id, None, AnnotationKind::Caption { text: text.into() })
    }

    /// # Errors
    /// Scale components must be finite and non-negative.
    pub fn cuboid_3d(
        id: impl Into<AnnotationId>,
        label: impl Into<CategoryId>,
        position: [f64; 3],
        rotation: [f64; 3],
        scale: [f64; 3],
    ) -> Result<Self, LabelbridgeError> {
        if scale.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(LabelbridgeError::InvalidAnnotation(format!(
                "cuboid scale must be finite and non-negative, got {scale:?}"
            )));
        }
        Ok(Self::with_kind(
            id,
            Some(label.into()),
            AnnotationKind::Cuboid3d {
                position,
                rotation,
                scale,
            },
        ))
    }

    pub fn with_group(mut self, group: u32) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_z_order(mut self, z_order: i32) -> Self {
        self.z_order = z_order;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn annotation_type(&self) -> AnnotationType {
        match &self.kind {
            AnnotationKind::Label => AnnotationType::Label,
            AnnotationKind::Bbox { .. } => AnnotationType::Bbox,
            AnnotationKind::Mask { .. } => AnnotationType::Mask,
            AnnotationKind::InstanceMask { .. } => AnnotationType::InstanceMask,
            AnnotationKind::PartMask { .. } => AnnotationType::PartMask,
            AnnotationKind::Polygon { .. } => AnnotationType::Polygon,
            AnnotationKind::Points { .. } => AnnotationType::Points,
            AnnotationKind::Caption { .. } => AnnotationType::Caption,
            AnnotationKind::Cuboid3d { .. } => AnnotationType::Cuboid3d,
        }
    }

    /// The raster payload of mask-like variants.
    pub fn raster(&self) -> Option<&Mask> {
        match &self.kind {
            AnnotationKind::Mask { mask }
            | AnnotationKind::InstanceMask { mask, .. }
            | AnnotationKind::PartMask { mask, .. } => Some(mask),
            _ => None,
        }
    }

    /// Pixel-space extent of spatial variants.
    pub fn bounding_box(&self) -> Option<BBoxXYXY<Pixel>> {
        match &self.kind {
            AnnotationKind::Bbox { bbox } => Some(*bbox),
            AnnotationKind::Polygon { points } | AnnotationKind::Points { points } => {
                BBoxXYXY::enclosing(points)
            }
            _ => self.raster().and_then(Mask::bbox),
        }
    }

    /// The instance this annotation represents, for instance masks.
    pub fn instance_key(&self) -> Option<InstanceKey> {
        match (&self.kind, self.label) {
            (AnnotationKind::InstanceMask { instance_id, .. }, Some(label)) => Some(InstanceKey {
                label,
                instance_id: *instance_id,
            }),
            _ => None,
        }
    }
}
