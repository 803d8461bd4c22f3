//! Dataset statistics.

mod report;

pub use report::{
    LabelCount, LabelsSection, MaskStats, StatsReport, SubsetCount, SummarySection, TypeCount,
};

use std::collections::{BTreeMap, HashMap};

use crate::dataset::Dataset;
use crate::ir::{AnnotationKind, CategoryId};

/// Options for dataset statistics.
#[derive(Clone, Debug)]
pub struct StatsOptions {
    /// Number of top labels to show in the histogram.
    pub top_labels: usize,
    /// Width of histogram bars (in characters).
    pub bar_width: usize,
}

impl Default for StatsOptions {
    fn default() -> Self {
        Self {
            top_labels: 10,
            bar_width: 20,
        }
    }
}

/// Compute a full statistics report for a dataset.
pub fn stats_dataset(dataset: &Dataset, opts: &StatsOptions) -> StatsReport {
    StatsReport {
        summary: compute_summary(dataset),
        subsets: compute_subsets(dataset),
        types: compute_types(dataset),
        labels: compute_labels(dataset, opts.top_labels),
        masks: compute_masks(dataset),
        bar_width: opts.bar_width,
    }
}

fn compute_summary(dataset: &Dataset) -> SummarySection {
    SummarySection {
        items: dataset.len(),
        subsets: dataset.subsets().count(),
        categories: dataset.categories().len(),
        annotations: dataset.annotation_count(),
        unannotated_items: dataset
            .items()
            .filter(|item| item.annotations.is_empty())
            .count(),
        items_with_media: dataset.items().filter(|item| item.media.is_some()).count(),
    }
}

fn compute_subsets(dataset: &Dataset) -> Vec<SubsetCount> {
    dataset
        .subsets()
        .map(|subset| SubsetCount {
            name: subset.name().to_string(),
            items: subset.len(),
            annotations: subset.items().map(|item| item.annotations.len()).sum(),
        })
        .collect()
}

fn compute_types(dataset: &Dataset) -> Vec<TypeCount> {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for ann in dataset.items().flat_map(|item| &item.annotations) {
        *counts.entry(ann.annotation_type().name()).or_insert(0) += 1;
    }
    let mut sorted: Vec<TypeCount> = counts
        .into_iter()
        .map(|(kind, count)| TypeCount {
            kind: kind.to_string(),
            count,
        })
        .collect();
    sorted.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.kind.cmp(&b.kind)));
    sorted
}

/// Compute label distribution histogram.
fn compute_labels(dataset: &Dataset, top_n: usize) -> LabelsSection {
    let mut counts: HashMap<CategoryId, usize> = HashMap::new();
    let mut unlabeled = 0;
    for ann in dataset.items().flat_map(|item| &item.annotations) {
        match ann.label {
            Some(label) => *counts.entry(label).or_insert(0) += 1,
            None => unlabeled += 1,
        }
    }

    let mut sorted: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(id, count)| {
            let label = dataset
                .categories()
                .name(id)
                .map(str::to_string)
                .unwrap_or_else(|_| format!("<missing cat {id}>"));
            (label, count)
        })
        .collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let total_distinct = sorted.len();
    let other_count = sorted.iter().skip(top_n).map(|(_, count)| count).sum();
    let entries = sorted
        .into_iter()
        .take(top_n)
        .map(|(label, count)| LabelCount { label, count })
        .collect();

    LabelsSection {
        top_n,
        total_distinct,
        entries,
        other_count,
        unlabeled,
    }
}

fn compute_masks(dataset: &Dataset) -> MaskStats {
    let mut stats = MaskStats::default();
    let mut area_sum = 0u64;
    for item in dataset.items() {
        let mut instances = 0;
        for ann in &item.annotations {
            let Some(mask) = ann.raster() else {
                continue;
            };
            stats.total += 1;
            match ann.kind {
                AnnotationKind::InstanceMask { .. } => instances += 1,
                AnnotationKind::PartMask { .. } => stats.parts += 1,
                _ => {}
            }
            let area = mask.area();
            if area == 0 {
                stats.empty += 1;
            } else {
                area_sum += area;
            }
        }
        stats.instances += instances;
        stats.max_instances_per_item = stats.max_instances_per_item.max(instances);
    }
    let non_empty = stats.total - stats.empty;
    stats.mean_area = (non_empty > 0).then(|| area_sum as f64 / non_empty as f64);
    stats
}
