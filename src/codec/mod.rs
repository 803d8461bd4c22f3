//! Mask codec: dense per-pixel identity packed into raster channels.
//!
//! Two schemes are implemented:
//!
//! - [`instance`]: an RGB raster where `R * 256 + G` is a class id and `B`
//!   discriminates instances of that class (at most 256 per class).
//! - [`parts`]: one 8-bit raster per hierarchy level whose pixel value is
//!   a part class id; parts are attached to the instance they overlap most.
//!
//! Class ids are raster-side numbers. A [`ClassLookup`] translates them to
//! and from the dataset's [`CategoryId`]s; class 0 is always "unlabeled".
//!
//! # Known lossy cases
//!
//! - An empty mask paints no pixels and does not come back on decode.
//! - Overlapping masks of one raster are flattened: the mask painted last
//!   (highest z-order, then latest in input order) keeps the pixel. The
//!   number of overwritten pixels is returned to the caller.
//! - Two parts with the same class, level and owner come back as one mask.

pub mod instance;
pub mod parts;

pub use instance::{decode_instances, encode_instances, DecodedInstance, EncodedInstances, InstanceLayer};
pub use parts::{decode_parts, encode_parts, DecodedPart, EncodedParts, PartAssignment, PartLayer, TieBreak};

use std::collections::HashMap;

use crate::error::LabelbridgeError;
use crate::ir::{CategoryId, LabelCategories};

/// Largest number of distinct instances of one class a single instance
/// raster can hold.
pub const MAX_INSTANCES_PER_CLASS: usize = 256;

/// Largest class id expressible in the `R`/`G` channel pair.
pub const MAX_CLASS_ID: u32 = u16::MAX as u32;

/// Two-way table between raster class ids and category ids.
#[derive(Clone, Debug, Default)]
pub struct ClassLookup {
    to_category: HashMap<u32, CategoryId>,
    to_class: HashMap<CategoryId, u32>,
}

impl ClassLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps every category to `category id + 1`, leaving 0 for unlabeled.
    ///
    /// Categories whose class id would not fit in 16 bits are left out.
    pub fn sequential(categories: &LabelCategories) -> Self {
        let mut lookup = Self::new();
        for (id, _) in categories.iter() {
            let class_id = id.get() + 1;
            if class_id > MAX_CLASS_ID {
                break;
            }
            lookup.to_category.insert(class_id, id);
            lookup.to_class.insert(id, class_id);
        }
        lookup
    }

    /// Binds `class_id` to `category`.
    ///
    /// A category may be bound to several class ids; encoding uses the
    /// first binding.
    ///
    /// # Errors
    /// Class 0 is reserved and class ids above 65535 cannot be encoded.
    pub fn insert(&mut self, class_id: u32, category: CategoryId) -> Result<(), LabelbridgeError> {
        if class_id == 0 || class_id > MAX_CLASS_ID {
            return Err(LabelbridgeError::InvalidAnnotation(format!(
                "raster class id must be in 1..={MAX_CLASS_ID}, got {class_id}"
            )));
        }
        self.to_category.insert(class_id, category);
        self.to_class.entry(category).or_insert(class_id);
        Ok(())
    }

    pub fn category(&self, class_id: u32) -> Option<CategoryId> {
        self.to_category.get(&class_id).copied()
    }

    pub fn class_id(&self, category: CategoryId) -> Option<u32> {
        self.to_class.get(&category).copied()
    }

    pub fn len(&self) -> usize {
        self.to_category.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_category.is_empty()
    }

    pub(crate) fn resolve(&self, class_id: u32) -> Result<CategoryId, LabelbridgeError> {
        self.category(class_id)
            .ok_or_else(|| LabelbridgeError::CategoryUnresolved {
                reference: format!("raster class id {class_id}"),
                item: None,
            })
    }

    pub(crate) fn class_for(&self, category: CategoryId) -> Result<u32, LabelbridgeError> {
        self.class_id(category)
            .ok_or_else(|| LabelbridgeError::CategoryUnresolved {
                reference: format!("category id {category} has no raster class id"),
                item: None,
            })
    }
}

pub(crate) fn check_dimensions(
    source_name: &str,
    expected: (u32, u32),
    actual: (u32, u32),
) -> Result<(), LabelbridgeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(LabelbridgeError::MaskDimensionMismatch {
            source_name: source_name.to_string(),
            expected,
            actual,
            item: None,
        })
    }
}

/// Fuzz-only entrypoint: decodes PNG bytes as an instance raster, then
/// its luma channel as level 1 parts of the decoded instances.
#[cfg(feature = "fuzzing")]
pub fn fuzz_decode_png(bytes: &[u8]) -> Result<(), LabelbridgeError> {
    let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Png).map_err(
        |source| LabelbridgeError::ImageDecode {
            path: std::path::PathBuf::from("<fuzz>"),
            source,
        },
    )?;
    if u64::from(img.width()) * u64::from(img.height()) > 1 << 20 {
        return Ok(());
    }

    let mut lookup = ClassLookup::new();
    for class_id in 1..=255 {
        lookup.insert(class_id, CategoryId::new(class_id - 1))?;
    }
    let instances = decode_instances(&img.to_rgb8(), &lookup)?;
    let owners: Vec<_> = instances.iter().map(|i| (i.key, &i.mask)).collect();
    decode_parts(&img.to_luma8(), 1, &owners, &lookup, &PartAssignment::default())?;
    Ok(())
}
