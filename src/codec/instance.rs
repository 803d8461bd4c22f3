//! Channel-packed instance rasters.
//!
//! Pixel `(R, G, B)` belongs to class `R * 256 + G` and to instance `B` of
//! that class. Class 0 is unlabeled background regardless of `B`.

use image::{Rgb, RgbImage};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use super::{check_dimensions, ClassLookup, MAX_INSTANCES_PER_CLASS};
use crate::error::LabelbridgeError;
use crate::ir::{Annotation, AnnotationKind, CategoryId, InstanceId, InstanceKey, Mask};

/// One `(class, instance)` pair found in a raster.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedInstance {
    /// Raster-side class id (`R * 256 + G`).
    pub class_id: u32,
    pub key: InstanceKey,
    pub mask: Mask,
}

impl DecodedInstance {
    pub fn into_annotation(self, id: u64) -> Annotation {
        Annotation::instance_mask(id, self.key.label, self.key.instance_id, self.mask)
    }
}

/// Splits an instance raster into one mask per `(class, instance)` pair.
///
/// Output is ordered by class id, then instance discriminator.
///
/// # Errors
/// - [`LabelbridgeError::CategoryUnresolved`] when a class id present in
///   the raster has no entry in `lookup`.
/// - [`LabelbridgeError::InvalidAnnotation`] for a zero-sized raster that
///   carries labels.
pub fn decode_instances(
    raster: &RgbImage,
    lookup: &ClassLookup,
) -> Result<Vec<DecodedInstance>, LabelbridgeError> {
    let (width, height) = raster.dimensions();
    let mut layers: BTreeMap<(u32, u8), Mask> = BTreeMap::new();

    for (x, y, pixel) in raster.enumerate_pixels() {
        let Rgb([r, g, b]) = *pixel;
        let class_id = (u32::from(r) << 8) | u32::from(g);
        if class_id == 0 {
            continue;
        }
        let mask = match layers.entry((class_id, b)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Mask::new(width, height)?),
        };
        mask.set(x, y, true);
    }

    log::debug!(
        "decoded {} instance layer(s) from {}x{} raster",
        layers.len(),
        width,
        height
    );

    layers
        .into_iter()
        .map(|((class_id, discriminator), mask)| {
            let label = lookup.resolve(class_id)?;
            Ok(DecodedInstance {
                class_id,
                key: InstanceKey::new(label, u32::from(discriminator)),
                mask,
            })
        })
        .collect()
}

/// An instance mask to paint into a raster.
#[derive(Clone, Copy, Debug)]
pub struct InstanceLayer<'a> {
    pub key: InstanceKey,
    pub mask: &'a Mask,
    pub z_order: i32,
}

impl<'a> InstanceLayer<'a> {
    /// Borrows a labeled instance mask annotation; `None` for anything else.
    pub fn from_annotation(ann: &'a Annotation) -> Option<Self> {
        match (&ann.kind, ann.instance_key()) {
            (AnnotationKind::InstanceMask { mask, .. }, Some(key)) => Some(Self {
                key,
                mask,
                z_order: ann.z_order,
            }),
            _ => None,
        }
    }
}

/// Result of [`encode_instances`].
#[derive(Clone, Debug)]
pub struct EncodedInstances {
    pub raster: RgbImage,
    /// `B` value chosen for every instance.
    pub discriminators: BTreeMap<InstanceKey, u8>,
    /// Pixels that belonged to more than one instance; the later one won.
    pub overwritten_pixels: u64,
}

/// Paints instance masks into a `width x height` raster.
///
/// Discriminators are allocated per class. When every instance id of a
/// class already fits in a byte it is used as is, so decoding gives the
/// same ids back; otherwise the class's instances are renumbered
/// `0, 1, ...` in ascending instance id order.
///
/// # Errors
/// - [`LabelbridgeError::InstanceOverflow`] if a class has more than 256
///   distinct instances.
/// - [`LabelbridgeError::MaskDimensionMismatch`] if a mask is not
///   `width x height`.
/// - [`LabelbridgeError::CategoryUnresolved`] if a label has no class id.
pub fn encode_instances(
    width: u32,
    height: u32,
    layers: &[InstanceLayer<'_>],
    lookup: &ClassLookup,
) -> Result<EncodedInstances, LabelbridgeError> {
    if width == 0 || height == 0 {
        return Err(LabelbridgeError::InvalidAnnotation(format!(
            "instance raster dimensions must be positive, got {width}x{height}"
        )));
    }

    let mut per_class: BTreeMap<CategoryId, BTreeSet<InstanceId>> = BTreeMap::new();
    for layer in layers {
        check_dimensions(
            &format!("instance mask {}", layer.key),
            (width, height),
            layer.mask.dimensions(),
        )?;
        per_class
            .entry(layer.key.label)
            .or_default()
            .insert(layer.key.instance_id);
    }

    let mut class_ids: BTreeMap<CategoryId, u32> = BTreeMap::new();
    let mut discriminators: BTreeMap<InstanceKey, u8> = BTreeMap::new();
    for (label, ids) in &per_class {
        let class_id = lookup.class_for(*label)?;
        if ids.len() > MAX_INSTANCES_PER_CLASS {
            return Err(LabelbridgeError::InstanceOverflow {
                class_id,
                count: ids.len(),
                item: None,
            });
        }
        class_ids.insert(*label, class_id);

        let identity = ids.iter().all(|id| id.get() <= u32::from(u8::MAX));
        for (position, id) in ids.iter().enumerate() {
            let discriminator = if identity { id.get() } else { position as u32 };
            discriminators.insert(InstanceKey::new(*label, *id), discriminator as u8);
        }
    }

    let mut order: Vec<&InstanceLayer<'_>> = layers.iter().collect();
    order.sort_by_key(|layer| layer.z_order);

    let mut raster = RgbImage::new(width, height);
    let mut overwritten_pixels = 0u64;
    for layer in order {
        let class_id = class_ids[&layer.key.label];
        let value = Rgb([
            (class_id >> 8) as u8,
            (class_id & 0xff) as u8,
            discriminators[&layer.key],
        ]);
        for (x, y) in layer.mask.foreground() {
            let pixel = raster.get_pixel_mut(x, y);
            if pixel.0 != [0, 0, 0] && *pixel != value {
                overwritten_pixels += 1;
            }
            *pixel = value;
        }
    }

    if overwritten_pixels > 0 {
        log::warn!("{overwritten_pixels} overlapping instance pixel(s) overwritten while encoding");
    }

    Ok(EncodedInstances {
        raster,
        discriminators,
        overwritten_pixels,
    })
}
