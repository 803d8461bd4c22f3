#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use labelbridge::codec::ClassLookup;
use labelbridge::ir::{InstanceKey, LabelCategories, Mask};
use proptest::collection::{btree_set, vec};
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use proptest::test_runner::{Config as ProptestConfig, FileFailurePersistence};

pub const LABELS: [&str; 4] = ["car", "person", "tree", "wheel"];

pub fn proptest_config() -> ProptestConfig {
    let cases = std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(64);

    let mut config = ProptestConfig::with_failure_persistence(FileFailurePersistence::WithSource(
        "proptest-regressions",
    ));
    config.cases = cases;
    config.max_shrink_iters = 1024;
    config
}

pub fn categories() -> LabelCategories {
    LabelCategories::from_names(LABELS).expect("unique label names")
}

pub fn lookup() -> ClassLookup {
    ClassLookup::sequential(&categories())
}

/// Disjoint instance masks covering parts of one raster.
#[derive(Clone, Debug)]
pub struct InstanceScene {
    pub width: u32,
    pub height: u32,
    /// Non-empty masks only, keyed by instance.
    pub instances: BTreeMap<InstanceKey, Mask>,
}

/// Scenes with up to `max_instances` instances whose ids fit in a byte.
///
/// Every pixel belongs to at most one instance, so the scene is exactly
/// representable in a single instance raster.
pub fn arb_instance_scene(max_instances: usize) -> BoxedStrategy<InstanceScene> {
    let keys = btree_set((0u32..LABELS.len() as u32 - 1, 0u32..256), 1..=max_instances);
    (1u32..16, 1u32..16, keys)
        .prop_flat_map(|(width, height, keys)| {
            let owners = vec(0..=keys.len(), (width * height) as usize);
            (Just(width), Just(height), Just(keys), owners)
        })
        .prop_map(|(width, height, keys, owners)| build_scene(width, height, &keys, &owners))
        .boxed()
}

fn build_scene(
    width: u32,
    height: u32,
    keys: &BTreeSet<(u32, u32)>,
    owners: &[usize],
) -> InstanceScene {
    let keys: Vec<InstanceKey> = keys
        .iter()
        .map(|&(label, instance)| InstanceKey::new(label, instance))
        .collect();
    let mut instances = BTreeMap::new();
    for (slot, key) in keys.iter().enumerate() {
        let mask = Mask::from_fn(width, height, |x, y| {
            owners[(y * width + x) as usize] == slot + 1
        })
        .expect("non-zero scene size");
        if !mask.is_empty() {
            instances.insert(*key, mask);
        }
    }
    InstanceScene {
        width,
        height,
        instances,
    }
}

/// Splits `owner` into a left and a right half-mask, for use as parts.
pub fn halves(owner: &Mask) -> (Mask, Mask) {
    let (width, height) = owner.dimensions();
    let mid = width / 2;
    let left = Mask::from_fn(width, height, |x, y| x < mid && owner.get(x, y))
        .expect("non-zero mask size");
    let right = Mask::from_fn(width, height, |x, y| x >= mid && owner.get(x, y))
        .expect("non-zero mask size");
    (left, right)
}
