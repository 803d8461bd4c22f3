//! Random re-partitioning into new subsets.

use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use std::collections::HashSet;

use super::Dataset;
use crate::error::LabelbridgeError;
use crate::ir::DatasetItem;

impl Dataset {
    /// Reassigns every item to one of `splits` at random.
    ///
    /// Ratios are relative weights. Item counts are rounded down and the
    /// remainder goes to the splits with the largest fractional share,
    /// earlier splits first on ties. The result only depends on `seed` and
    /// the dataset.
    ///
    /// # Errors
    /// - [`LabelbridgeError::InvalidAnnotation`] for empty or repeated
    ///   names and for ratios that are negative, non-finite or all zero.
    /// - [`LabelbridgeError::DuplicateItem`] if two source subsets hold the
    ///   same item id and both land in one split.
    pub fn random_split(&self, splits: &[(&str, f64)], seed: u64) -> Result<Dataset, LabelbridgeError> {
        validate_splits(splits)?;

        let mut items: Vec<&DatasetItem> = self.items().collect();
        let mut rng = StdRng::seed_from_u64(seed);
        items.shuffle(&mut rng);

        let counts = split_counts(items.len(), splits);
        let mut result = Dataset::with_categories(self.categories.clone());
        let mut remaining = items.into_iter();
        for ((name, _), count) in splits.iter().zip(counts) {
            for item in remaining.by_ref().take(count) {
                let mut item = item.clone();
                item.subset = (*name).to_string();
                result.add_item(item)?;
            }
        }

        log::info!(
            "split {} item(s) into {}",
            result.len(),
            result
                .subsets()
                .map(|subset| format!("{}={}", subset.name(), subset.len()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(result)
    }
}

fn validate_splits(splits: &[(&str, f64)]) -> Result<(), LabelbridgeError> {
    let invalid = |message: String| Err(LabelbridgeError::InvalidAnnotation(message));
    if splits.is_empty() {
        return invalid("at least one split is required".to_string());
    }
    let mut names = HashSet::new();
    for (name, ratio) in splits {
        if name.is_empty() {
            return invalid("split names must not be empty".to_string());
        }
        if !names.insert(*name) {
            return invalid(format!("split '{name}' is listed twice"));
        }
        if !ratio.is_finite() || *ratio < 0.0 {
            return invalid(format!("split '{name}' has invalid ratio {ratio}"));
        }
    }
    if splits.iter().all(|(_, ratio)| *ratio == 0.0) {
        return invalid("split ratios must not all be zero".to_string());
    }
    Ok(())
}

/// Largest-remainder apportionment of `total` items.
fn split_counts(total: usize, splits: &[(&str, f64)]) -> Vec<usize> {
    let weight: f64 = splits.iter().map(|(_, ratio)| ratio).sum();
    let shares: Vec<f64> = splits
        .iter()
        .map(|(_, ratio)| ratio / weight * total as f64)
        .collect();
    let mut counts: Vec<usize> = shares.iter().map(|share| share.floor() as usize).collect();

    let assigned: usize = counts.iter().sum();
    let mut order: Vec<usize> = (0..splits.len()).collect();
    order.sort_by(|&a, &b| {
        let frac_a = shares[a] - shares[a].floor();
        let frac_b = shares[b] - shares[b].floor();
        frac_b.total_cmp(&frac_a).then(a.cmp(&b))
    });
    for &idx in order.iter().take(total.saturating_sub(assigned)) {
        counts[idx] += 1;
    }
    counts
}
