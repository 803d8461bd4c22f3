//! Dataset validation.
//!
//! Checks what a converter would otherwise trip over, per item:
//! - identity (unique annotation ids, unique instance keys, instance
//!   counts that fit a channel raster)
//! - mask consistency (sizes agree with each other and with the media,
//!   instances are disjoint, parts lie inside their owner)
//! - geometry (boxes finite, ordered and inside the image; polygons with
//!   at least three finite vertices)
//!
//! plus the label table itself.

mod report;

pub use report::{IssueCode, IssueContext, Severity, ValidationIssue, ValidationReport};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::codec::MAX_INSTANCES_PER_CLASS;
use crate::dataset::Dataset;
use crate::ir::{Annotation, AnnotationKind, CategoryId, DatasetItem, InstanceKey, Mask};

/// Options for validation behavior.
#[derive(Clone, Debug, Default)]
pub struct ValidateOptions {
    /// If true, treat warnings as errors.
    pub strict: bool,
    /// Read media headers from disk when the size is not already known,
    /// and report media files that do not exist.
    pub check_media: bool,
}

/// Validates a dataset and returns every issue found.
pub fn validate_dataset(dataset: &Dataset, opts: &ValidateOptions) -> ValidationReport {
    let mut report = ValidationReport::new();
    validate_categories(dataset, &mut report);
    for item in dataset.items() {
        validate_item(item, opts, &mut report);
    }
    log::debug!(
        "validated {} item(s): {} error(s), {} warning(s)",
        dataset.len(),
        report.error_count(),
        report.warning_count()
    );
    report
}

fn validate_categories(dataset: &Dataset, report: &mut ValidationReport) {
    let categories = dataset.categories();
    for (id, label) in categories.iter() {
        let context = IssueContext::Category { id: id.get() };
        if label.name.trim().is_empty() {
            report.add(ValidationIssue::error(
                IssueCode::EmptyCategoryName,
                "Category name is empty",
                context.clone(),
            ));
        }
        if let Some(parent) = &label.parent {
            if categories.find(parent).is_none() {
                report.add(ValidationIssue::warning(
                    IssueCode::UnknownParentCategory,
                    format!("Parent '{}' of '{}' is not a category", parent, label.name),
                    context,
                ));
            }
        }
    }
}

struct ItemCheck<'a> {
    item: &'a DatasetItem,
    report: &'a mut ValidationReport,
}

impl ItemCheck<'_> {
    fn item_context(&self) -> IssueContext {
        IssueContext::Item {
            subset: self.item.subset.clone(),
            id: self.item.id.clone(),
        }
    }

    fn ann_context(&self, ann: &Annotation) -> IssueContext {
        IssueContext::Annotation {
            subset: self.item.subset.clone(),
            item: self.item.id.clone(),
            id: ann.id.get(),
        }
    }

    fn error(&mut self, code: IssueCode, message: String, context: IssueContext) {
        self.report.add(ValidationIssue::error(code, message, context));
    }

    fn warning(&mut self, code: IssueCode, message: String, context: IssueContext) {
        self.report.add(ValidationIssue::warning(code, message, context));
    }
}

fn validate_item(item: &DatasetItem, opts: &ValidateOptions, report: &mut ValidationReport) {
    let mut check = ItemCheck { item, report };

    let media_size = media_size(&mut check, opts);
    let mut seen_ids = HashSet::new();
    let mut instances: BTreeMap<InstanceKey, &Annotation> = BTreeMap::new();
    let mut per_label: HashMap<CategoryId, BTreeSet<u32>> = HashMap::new();
    let mut raster_size = media_size;

    for ann in &item.annotations {
        if !seen_ids.insert(ann.id) {
            let context = check.ann_context(ann);
            check.error(
                IssueCode::DuplicateAnnotationId,
                format!("Duplicate annotation id {}", ann.id),
                context,
            );
        }

        if let Some(mask) = ann.raster() {
            validate_mask(&mut check, ann, mask, &mut raster_size, media_size.is_some());
        }

        match &ann.kind {
            AnnotationKind::InstanceMask { .. } => {
                if let Some(key) = ann.instance_key() {
                    per_label
                        .entry(key.label)
                        .or_default()
                        .insert(key.instance_id.get());
                    if instances.insert(key, ann).is_some() {
                        let context = check.ann_context(ann);
                        check.error(
                            IssueCode::DuplicateInstance,
                            format!("Instance {key} appears more than once"),
                            context,
                        );
                    }
                }
            }
            AnnotationKind::Bbox { .. } => validate_bbox(&mut check, ann, media_size),
            AnnotationKind::Polygon { points } => {
                if points.len() < 3 || points.iter().any(|p| !p.is_finite()) {
                    let context = check.ann_context(ann);
                    check.error(
                        IssueCode::InvalidPolygon,
                        format!("Polygon has {} vertices, some may be non-finite", points.len()),
                        context,
                    );
                }
            }
            _ => {}
        }
    }

    for (label, ids) in &per_label {
        if ids.len() > MAX_INSTANCES_PER_CLASS {
            let context = check.item_context();
            check.error(
                IssueCode::InstanceOverflow,
                format!(
                    "Category {label} has {} instances, a channel raster holds {MAX_INSTANCES_PER_CLASS}",
                    ids.len()
                ),
                context,
            );
        }
    }

    validate_overlaps(&mut check, &instances);
    validate_parts(&mut check, &instances);
}

fn media_size(check: &mut ItemCheck<'_>, opts: &ValidateOptions) -> Option<(u32, u32)> {
    let item = check.item;
    let image = item.image()?;
    if let Some(size) = image.size {
        return Some(size);
    }
    if !opts.check_media {
        return None;
    }
    if !image.exists() {
        let context = check.item_context();
        check.warning(
            IssueCode::MediaMissing,
            format!("Image {} does not exist", image.path.display()),
            context,
        );
        return None;
    }
    match image.dimensions() {
        Ok(size) => Some(size),
        Err(err) => {
            let context = check.item_context();
            check.warning(IssueCode::MediaMissing, err.to_string(), context);
            None
        }
    }
}

fn validate_mask(
    check: &mut ItemCheck<'_>,
    ann: &Annotation,
    mask: &Mask,
    expected: &mut Option<(u32, u32)>,
    from_media: bool,
) {
    let context = check.ann_context(ann);
    if mask.is_empty() {
        check.warning(IssueCode::EmptyMask, "Mask has no foreground pixels".to_string(), context.clone());
    }
    if ann.label.is_none() {
        check.warning(
            IssueCode::MaskWithoutLabel,
            "Mask has no label and cannot be written to a channel raster".to_string(),
            context.clone(),
        );
    }
    match expected {
        Some(size) if *size != mask.dimensions() => {
            let against = if from_media { "image" } else { "first mask" };
            check.error(
                IssueCode::MaskDimensionMismatch,
                format!(
                    "Mask is {}x{}, {against} is {}x{}",
                    mask.width(),
                    mask.height(),
                    size.0,
                    size.1
                ),
                context,
            );
        }
        Some(_) => {}
        None => *expected = Some(mask.dimensions()),
    }
}

fn validate_bbox(check: &mut ItemCheck<'_>, ann: &Annotation, media_size: Option<(u32, u32)>) {
    let AnnotationKind::Bbox { bbox } = &ann.kind else {
        return;
    };
    let context = check.ann_context(ann);

    if !bbox.is_finite() {
        check.error(
            IssueCode::BBoxNotFinite,
            format!(
                "Non-finite coordinates ({}, {}, {}, {})",
                bbox.xmin(),
                bbox.ymin(),
                bbox.xmax(),
                bbox.ymax()
            ),
            context,
        );
        return;
    }

    if !bbox.is_ordered() {
        check.error(
            IssueCode::InvalidBBoxOrdering,
            format!(
                "Invalid ordering: min ({}, {}) should be <= max ({}, {})",
                bbox.xmin(),
                bbox.ymin(),
                bbox.xmax(),
                bbox.ymax()
            ),
            context.clone(),
        );
    }

    let area = bbox.area();
    if area <= 0.0 {
        check.warning(
            IssueCode::InvalidBBoxArea,
            format!("Zero or negative area: {:.2}", area),
            context.clone(),
        );
    }

    if let Some((width, height)) = media_size {
        let (w, h) = (width as f64, height as f64);
        // Allow small tolerance for floating point
        let tolerance = 0.5;
        if bbox.xmin() < -tolerance
            || bbox.ymin() < -tolerance
            || bbox.xmax() > w + tolerance
            || bbox.ymax() > h + tolerance
        {
            check.error(
                IssueCode::BBoxOutOfBounds,
                format!(
                    "Bounding box ({:.1}, {:.1}, {:.1}, {:.1}) extends outside image bounds (0, 0, {}, {})",
                    bbox.xmin(), bbox.ymin(), bbox.xmax(), bbox.ymax(), width, height
                ),
                context,
            );
        }
    }
}

fn validate_overlaps(check: &mut ItemCheck<'_>, instances: &BTreeMap<InstanceKey, &Annotation>) {
    let masks: Vec<(&Annotation, &Mask)> = instances
        .values()
        .filter_map(|ann| ann.raster().map(|mask| (*ann, mask)))
        .collect();
    for (i, (a, mask_a)) in masks.iter().enumerate() {
        for (b, mask_b) in &masks[i + 1..] {
            let shared = mask_a.intersection_area(mask_b);
            if shared > 0 {
                let context = check.ann_context(b);
                check.warning(
                    IssueCode::OverlappingInstances,
                    format!(
                        "{shared} pixel(s) shared with annotation {}; only one keeps them in a channel raster",
                        a.id
                    ),
                    context,
                );
            }
        }
    }
}

fn validate_parts(check: &mut ItemCheck<'_>, instances: &BTreeMap<InstanceKey, &Annotation>) {
    let item = check.item;
    for ann in &item.annotations {
        let AnnotationKind::PartMask {
            mask,
            owner: Some(owner),
            ..
        } = &ann.kind
        else {
            continue;
        };
        let context = check.ann_context(ann);
        match instances.get(owner).and_then(|owner_ann| owner_ann.raster()) {
            None => check.error(
                IssueCode::PartOwnerMissing,
                format!("Owner instance {owner} is not in the item"),
                context,
            ),
            Some(owner_mask) => {
                let outside = mask.area() - mask.intersection_area(owner_mask);
                if outside > 0 {
                    check.warning(
                        IssueCode::PartOutsideOwner,
                        format!("{outside} pixel(s) lie outside owner instance {owner}"),
                        context,
                    );
                }
            }
        }
    }
}
