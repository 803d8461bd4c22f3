//! Part-hierarchy rasters.
//!
//! Each hierarchy level has its own 8-bit raster whose pixel value is the
//! part's class id (0 = no part). On decode every 4-connected region of
//! one value is attached to the instance it overlaps most; regions with
//! the same class and owner are merged into a single part mask.

use image::{GrayImage, Luma};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, VecDeque};

use super::{check_dimensions, ClassLookup};
use crate::error::LabelbridgeError;
use crate::ir::{Annotation, AnnotationKind, CategoryId, InstanceKey, Mask};

/// Which instance wins when a part region overlaps several equally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TieBreak {
    /// Lowest instance id, then lowest label.
    #[default]
    LowestInstance,
    /// Highest instance id, then highest label.
    HighestInstance,
}

/// Policy for attaching decoded parts to instances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PartAssignment {
    pub tie_break: TieBreak,
}

impl PartAssignment {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    fn prefers(&self, candidate: InstanceKey, current: InstanceKey) -> bool {
        let rank = |key: InstanceKey| (key.instance_id, key.label);
        match self.tie_break {
            TieBreak::LowestInstance => rank(candidate) < rank(current),
            TieBreak::HighestInstance => rank(candidate) > rank(current),
        }
    }
}

/// A part mask recovered from a level raster.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedPart {
    /// Raw raster value.
    pub class_id: u32,
    pub label: CategoryId,
    pub level: u32,
    /// `None` when the part overlaps no instance.
    pub owner: Option<InstanceKey>,
    pub mask: Mask,
}

impl DecodedPart {
    pub fn into_annotation(self, id: u64) -> Result<Annotation, LabelbridgeError> {
        Annotation::part_mask(id, self.label, self.level, self.owner, self.mask)
    }
}

/// Decodes one level raster against the instances it may belong to.
///
/// Output is ordered by owner (unowned first), then class id.
///
/// # Errors
/// - [`LabelbridgeError::MaskDimensionMismatch`] if an instance mask is not
///   the raster's size.
/// - [`LabelbridgeError::CategoryUnresolved`] for a part value missing
///   from `lookup`.
pub fn decode_parts(
    raster: &GrayImage,
    level: u32,
    instances: &[(InstanceKey, &Mask)],
    lookup: &ClassLookup,
    policy: &PartAssignment,
) -> Result<Vec<DecodedPart>, LabelbridgeError> {
    if level == 0 {
        return Err(LabelbridgeError::InvalidAnnotation(
            "part rasters start at level 1".to_string(),
        ));
    }
    let (width, height) = raster.dimensions();
    for (key, mask) in instances {
        check_dimensions(
            &format!("instance mask {key} against level {level} parts"),
            (width, height),
            mask.dimensions(),
        )?;
    }

    let mut merged: BTreeMap<(Option<InstanceKey>, u32), Mask> = BTreeMap::new();
    for region in connected_regions(raster) {
        let owner = majority_owner(&region.pixels, instances, policy);
        let mask = match merged.entry((owner, region.value)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Mask::new(width, height)?),
        };
        for &(x, y) in &region.pixels {
            mask.set(x, y, true);
        }
    }

    log::debug!("decoded {} level {level} part(s)", merged.len());

    merged
        .into_iter()
        .map(|((owner, class_id), mask)| {
            Ok(DecodedPart {
                class_id,
                label: lookup.resolve(class_id)?,
                level,
                owner,
                mask,
            })
        })
        .collect()
}

struct Region {
    value: u32,
    pixels: Vec<(u32, u32)>,
}

fn connected_regions(raster: &GrayImage) -> Vec<Region> {
    let (width, height) = raster.dimensions();
    let mut visited = vec![false; width as usize * height as usize];
    let mut regions = Vec::new();
    let mut queue = VecDeque::new();

    for (sx, sy, start) in raster.enumerate_pixels() {
        let value = start.0[0];
        let start_index = sy as usize * width as usize + sx as usize;
        if value == 0 || visited[start_index] {
            continue;
        }

        visited[start_index] = true;
        queue.push_back((sx, sy));
        let mut pixels = Vec::new();
        while let Some((x, y)) = queue.pop_front() {
            pixels.push((x, y));
            let neighbours = [
                (x.checked_sub(1), Some(y)),
                (x.checked_add(1).filter(|nx| *nx < width), Some(y)),
                (Some(x), y.checked_sub(1)),
                (Some(x), y.checked_add(1).filter(|ny| *ny < height)),
            ];
            for (nx, ny) in neighbours {
                let (Some(nx), Some(ny)) = (nx, ny) else {
                    continue;
                };
                let index = ny as usize * width as usize + nx as usize;
                if !visited[index] && raster.get_pixel(nx, ny).0[0] == value {
                    visited[index] = true;
                    queue.push_back((nx, ny));
                }
            }
        }

        regions.push(Region {
            value: u32::from(value),
            pixels,
        });
    }

    regions
}

fn majority_owner(
    pixels: &[(u32, u32)],
    instances: &[(InstanceKey, &Mask)],
    policy: &PartAssignment,
) -> Option<InstanceKey> {
    let mut best: Option<(u64, InstanceKey)> = None;
    for (key, mask) in instances {
        let overlap = pixels.iter().filter(|(x, y)| mask.get(*x, *y)).count() as u64;
        if overlap == 0 {
            continue;
        }
        best = match best {
            None => Some((overlap, *key)),
            Some((count, current)) => {
                if overlap > count || (overlap == count && policy.prefers(*key, current)) {
                    Some((overlap, *key))
                } else {
                    Some((count, current))
                }
            }
        };
    }
    best.map(|(_, key)| key)
}

/// A part mask to paint into its level raster.
#[derive(Clone, Copy, Debug)]
pub struct PartLayer<'a> {
    pub label: CategoryId,
    pub level: u32,
    pub mask: &'a Mask,
    pub z_order: i32,
}

impl<'a> PartLayer<'a> {
    pub fn from_annotation(ann: &'a Annotation) -> Option<Self> {
        match (&ann.kind, ann.label) {
            (AnnotationKind::PartMask { mask, level, .. }, Some(label)) => Some(Self {
                label,
                level: *level,
                mask,
                z_order: ann.z_order,
            }),
            _ => None,
        }
    }
}

/// Result of [`encode_parts`].
#[derive(Clone, Debug, Default)]
pub struct EncodedParts {
    /// One raster per level present in the input.
    pub rasters: BTreeMap<u32, GrayImage>,
    pub overwritten_pixels: u64,
}

/// Paints part masks into one raster per level.
///
/// # Errors
/// Part class ids must fit in a byte; masks must be `width x height`.
pub fn encode_parts(
    width: u32,
    height: u32,
    layers: &[PartLayer<'_>],
    lookup: &ClassLookup,
) -> Result<EncodedParts, LabelbridgeError> {
    let mut order: Vec<&PartLayer<'_>> = layers.iter().collect();
    order.sort_by_key(|layer| (layer.level, layer.z_order));

    let mut encoded = EncodedParts::default();
    for layer in order {
        if layer.level == 0 {
            return Err(LabelbridgeError::InvalidAnnotation(
                "part masks must have level >= 1".to_string(),
            ));
        }
        check_dimensions(
            &format!("level {} part mask", layer.level),
            (width, height),
            layer.mask.dimensions(),
        )?;
        let class_id = lookup.class_for(layer.label)?;
        let value = u8::try_from(class_id).map_err(|_| {
            LabelbridgeError::InvalidAnnotation(format!(
                "part class id {class_id} does not fit an 8-bit part raster"
            ))
        })?;

        let raster = encoded
            .rasters
            .entry(layer.level)
            .or_insert_with(|| GrayImage::new(width, height));
        for (x, y) in layer.mask.foreground() {
            let pixel = raster.get_pixel_mut(x, y);
            if pixel.0[0] != 0 && pixel.0[0] != value {
                encoded.overwritten_pixels += 1;
            }
            *pixel = Luma([value]);
        }
    }

    if encoded.overwritten_pixels > 0 {
        log::warn!(
            "{} overlapping part pixel(s) overwritten while encoding",
            encoded.overwritten_pixels
        );
    }

    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup() -> ClassLookup {
        let mut lookup = ClassLookup::new();
        lookup.insert(1, CategoryId(0)).unwrap();
        lookup.insert(2, CategoryId(1)).unwrap();
        lookup.insert(3, CategoryId(2)).unwrap();
        lookup
    }

    fn columns(width: u32, height: u32, from: u32, to: u32) -> Mask {
        Mask::from_fn(width, height, |x, _| x >= from && x < to).unwrap()
    }

    #[test]
    fn part_goes_to_largest_overlap() {
        let left = columns(6, 2, 0, 2);
        let right = columns(6, 2, 2, 6);
        let a = InstanceKey::new(0u32, 1u32);
        let b = InstanceKey::new(0u32, 2u32);

        // Part covers x in 1..4: one column over `left`, two over `right`.
        let mut raster = GrayImage::new(6, 2);
        for y in 0..2 {
            for x in 1..4 {
                raster.put_pixel(x, y, Luma([3]));
            }
        }

        let parts = decode_parts(
            &raster,
            1,
            &[(a, &left), (b, &right)],
            &lookup(),
            &PartAssignment::default(),
        )
        .unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].owner, Some(b));
        assert_eq!(parts[0].label, CategoryId(2));
        assert_eq!(parts[0].mask.area(), 6);
    }

    #[test]
    fn ties_follow_the_configured_policy() {
        let left = columns(4, 1, 0, 2);
        let right = columns(4, 1, 2, 4);
        let low = InstanceKey::new(0u32, 1u32);
        let high = InstanceKey::new(0u32, 5u32);

        let mut raster = GrayImage::new(4, 1);
        raster.put_pixel(1, 0, Luma([2]));
        raster.put_pixel(2, 0, Luma([2]));
        let instances = [(high, &right), (low, &left)];

        let lowest = decode_parts(&raster, 1, &instances, &lookup(), &PartAssignment::default())
            .unwrap();
        assert_eq!(lowest[0].owner, Some(low));

        let highest = decode_parts(
            &raster,
            1,
            &instances,
            &lookup(),
            &PartAssignment::new(TieBreak::HighestInstance),
        )
        .unwrap();
        assert_eq!(highest[0].owner, Some(high));
    }

    #[test]
    fn separate_regions_split_between_owners() {
        let left = columns(5, 1, 0, 2);
        let right = columns(5, 1, 3, 5);
        let a = InstanceKey::new(0u32, 1u32);
        let b = InstanceKey::new(1u32, 1u32);

        let mut raster = GrayImage::new(5, 1);
        raster.put_pixel(0, 0, Luma([1]));
        raster.put_pixel(4, 0, Luma([1]));

        let parts =
            decode_parts(&raster, 2, &[(a, &left), (b, &right)], &lookup(), &PartAssignment::default())
                .unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].owner, Some(a));
        assert_eq!(parts[1].owner, Some(b));
        assert!(parts.iter().all(|part| part.level == 2 && part.mask.area() == 1));
    }

    #[test]
    fn unowned_parts_have_no_owner() {
        let mut raster = GrayImage::new(3, 3);
        raster.put_pixel(1, 1, Luma([1]));
        let parts = decode_parts(&raster, 1, &[], &lookup(), &PartAssignment::default()).unwrap();
        assert_eq!(parts[0].owner, None);
    }

    #[test]
    fn unknown_part_value_is_unresolved() {
        let mut raster = GrayImage::new(2, 2);
        raster.put_pixel(0, 0, Luma([200]));
        let err = decode_parts(&raster, 1, &[], &lookup(), &PartAssignment::default()).unwrap_err();
        assert!(matches!(err, LabelbridgeError::CategoryUnresolved { .. }));
    }

    #[test]
    fn encode_writes_one_raster_per_level() {
        let wheel = columns(4, 2, 0, 1);
        let door = columns(4, 2, 2, 4);
        let handle = columns(4, 2, 3, 4);
        let layers = [
            PartLayer { label: CategoryId(0), level: 1, mask: &wheel, z_order: 0 },
            PartLayer { label: CategoryId(1), level: 1, mask: &door, z_order: 0 },
            PartLayer { label: CategoryId(2), level: 2, mask: &handle, z_order: 0 },
        ];
        let encoded = encode_parts(4, 2, &layers, &lookup()).unwrap();
        assert_eq!(encoded.rasters.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(encoded.rasters[&1].get_pixel(0, 0).0[0], 1);
        assert_eq!(encoded.rasters[&1].get_pixel(3, 1).0[0], 2);
        assert_eq!(encoded.rasters[&2].get_pixel(3, 0).0[0], 3);
        assert_eq!(encoded.overwritten_pixels, 0);
    }

    #[test]
    fn wide_part_class_is_rejected() {
        let mut lookup = ClassLookup::new();
        lookup.insert(300, CategoryId(0)).unwrap();
        let mask = columns(2, 2, 0, 1);
        let layers = [PartLayer { label: CategoryId(0), level: 1, mask: &mask, z_order: 0 }];
        assert!(encode_parts(2, 2, &layers, &lookup).is_err());
    }
}
