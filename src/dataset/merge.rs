//! Merging two datasets.
//!
//! Items with the same `(subset, id)` are combined annotation by
//! annotation through an [`AnnotationMatcher`]; every other item is
//! carried over unchanged apart from label ids, which are translated into
//! the receiving table by name.

use serde::Serialize;
use std::fmt;

use super::Dataset;
use crate::error::LabelbridgeError;
use crate::ir::{Annotation, AnnotationKind, CategoryId, DatasetItem, InstanceKey};

/// Decides whether two annotations of the same item describe one object.
pub trait AnnotationMatcher: Send + Sync {
    /// Similarity of `ours` and `theirs`, or `None` if they must not be
    /// matched. Higher scores win.
    fn score(&self, ours: &Annotation, theirs: &Annotation) -> Option<f64>;
}

/// Options for [`IouMatcher`].
#[derive(Clone, Copy, Debug)]
pub struct MergeOptions {
    /// Smallest overlap that counts as the same object.
    pub iou_threshold: f64,
    /// Annotations with different labels never match.
    pub require_same_label: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            require_same_label: true,
        }
    }
}

/// Spatial matching: mask IoU for raster annotations, box IoU for the
/// other geometric ones, equality for everything else.
#[derive(Clone, Copy, Debug, Default)]
pub struct IouMatcher {
    pub options: MergeOptions,
}

impl IouMatcher {
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }
}

impl AnnotationMatcher for IouMatcher {
    fn score(&self, ours: &Annotation, theirs: &Annotation) -> Option<f64> {
        if ours.annotation_type() != theirs.annotation_type() {
            return None;
        }
        if self.options.require_same_label && ours.label != theirs.label {
            return None;
        }
        if ours.kind == theirs.kind {
            return Some(1.0);
        }

        let iou = match (ours.raster(), theirs.raster()) {
            (Some(a), Some(b)) if a.dimensions() == b.dimensions() => a.iou(b),
            (Some(_), Some(_)) => return None,
            _ => match (ours.bounding_box(), theirs.bounding_box()) {
                (Some(a), Some(b)) => a.iou(&b),
                _ => return None,
            },
        };
        (iou >= self.options.iou_threshold).then_some(iou)
    }
}

/// What a merge changed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub added_categories: usize,
    pub added_items: usize,
    pub merged_items: usize,
    pub matched_annotations: usize,
    pub added_annotations: usize,
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} item(s) added, {} merged; {} annotation(s) matched, {} added; {} new label(s)",
            self.added_items,
            self.merged_items,
            self.matched_annotations,
            self.added_annotations,
            self.added_categories
        )
    }
}

impl Dataset {
    /// Returns the merge of this dataset with `other`. Neither input is
    /// modified.
    ///
    /// Matching is greedy: each annotation of `other` takes the best
    /// scoring annotation of this item not already taken. A matched pair
    /// keeps this side's annotation and gains the attributes only `other`
    /// has. Unmatched annotations are appended with fresh ids.
    ///
    /// # Errors
    /// Fails only if `other` refers to category ids outside its own table.
    pub fn merge(
        &self,
        other: &Dataset,
        matcher: &dyn AnnotationMatcher,
    ) -> Result<(Dataset, MergeReport), LabelbridgeError> {
        let mut merged = self.clone();
        let report = merged.merge_from(other, matcher)?;
        log::info!("merge: {report}");
        Ok((merged, report))
    }

    fn merge_from(
        &mut self,
        other: &Dataset,
        matcher: &dyn AnnotationMatcher,
    ) -> Result<MergeReport, LabelbridgeError> {
        let mut report = MergeReport::default();

        let mut mapping: Vec<CategoryId> = Vec::with_capacity(other.categories.len());
        for (_, label) in other.categories.iter() {
            let id = match self.categories.find(&label.name) {
                Some(id) => id,
                None => {
                    report.added_categories += 1;
                    self.categories.add(label.clone())?
                }
            };
            mapping.push(id);
        }

        for theirs in other.items() {
            let theirs = remap_item(theirs, &mapping)?;
            let existing = self
                .subsets
                .get_mut(&theirs.subset)
                .and_then(|subset| subset.items.get_mut(&theirs.id));
            match existing {
                Some(ours) => {
                    report.merged_items += 1;
                    merge_item(ours, theirs, matcher, &mut report);
                }
                None => {
                    report.added_items += 1;
                    report.added_annotations += theirs.annotations.len();
                    self.add_item(theirs)?;
                }
            }
        }

        Ok(report)
    }
}

fn remap_item(item: &DatasetItem, mapping: &[CategoryId]) -> Result<DatasetItem, LabelbridgeError> {
    let translate = |id: CategoryId| {
        mapping
            .get(id.index())
            .copied()
            .ok_or_else(|| LabelbridgeError::CategoryUnresolved {
                reference: format!("category id {id} of the merged dataset"),
                item: Some(item.item_ref()),
            })
    };

    let mut item = item.clone();
    for ann in &mut item.annotations {
        if let Some(label) = ann.label {
            ann.label = Some(translate(label)?);
        }
        if let AnnotationKind::PartMask {
            owner: Some(owner), ..
        } = &mut ann.kind
        {
            *owner = InstanceKey {
                label: translate(owner.label)?,
                instance_id: owner.instance_id,
            };
        }
    }
    Ok(item)
}

fn merge_item(
    ours: &mut DatasetItem,
    theirs: DatasetItem,
    matcher: &dyn AnnotationMatcher,
    report: &mut MergeReport,
) {
    if ours.media.is_none() {
        ours.media = theirs.media;
    }
    for (key, value) in theirs.attributes {
        ours.attributes.entry(key).or_insert(value);
    }

    let original = ours.annotations.len();
    let mut taken = vec![false; original];
    let mut next_id = ours.next_annotation_id();

    for ann in theirs.annotations {
        let mut best: Option<(usize, f64)> = None;
        for (idx, candidate) in ours.annotations[..original].iter().enumerate() {
            if taken[idx] {
                continue;
            }
            if let Some(score) = matcher.score(candidate, &ann) {
                if best.map_or(true, |(_, best_score)| score > best_score) {
                    best = Some((idx, score));
                }
            }
        }

        match best {
            Some((idx, _)) => {
                taken[idx] = true;
                report.matched_annotations += 1;
                let target = &mut ours.annotations[idx];
                for (key, value) in ann.attributes {
                    target.attributes.entry(key).or_insert(value);
                }
            }
            None => {
                report.added_annotations += 1;
                let mut ann = ann;
                ann.id = next_id.into();
                next_id += 1;
                ours.annotations.push(ann);
            }
        }
    }
}
