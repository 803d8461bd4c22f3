//! The Dataset aggregate: one label table plus items grouped by subset.
//!
//! A [`Dataset`] is the only owner of its [`LabelCategories`]. Items refer
//! to labels by [`CategoryId`], and every operation that changes the table
//! (`merge`, `remap_labels`) rewrites the item references with it.

mod filter;
mod merge;
mod remap;
mod split;

pub use filter::FilterMode;
pub use merge::{AnnotationMatcher, IouMatcher, MergeOptions, MergeReport};
pub use remap::RemapDefault;

use std::collections::BTreeMap;
use std::path::Path;

use crate::conversion::{export_items, ConversionIssue, ConversionReport, Stage};
use crate::error::LabelbridgeError;
use crate::format::detect::detect_format;
use crate::format::registry::FormatRegistry;
use crate::format::{ExportOptions, ImportOptions};
use crate::ir::{AnnotationKind, CategoryId, DatasetItem, LabelCategories, LabelCategory};

/// A named partition of a dataset, items ordered by id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Subset {
    name: String,
    items: BTreeMap<String, DatasetItem>,
}

impl Subset {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, id: &str) -> Option<&DatasetItem> {
        self.items.get(id)
    }

    pub fn items(&self) -> impl Iterator<Item = &DatasetItem> {
        self.items.values()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    categories: LabelCategories,
    subsets: BTreeMap<String, Subset>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_categories(categories: LabelCategories) -> Self {
        Self {
            categories,
            subsets: BTreeMap::new(),
        }
    }

    pub fn categories(&self) -> &LabelCategories {
        &self.categories
    }

    /// Appends a label to the table.
    ///
    /// # Errors
    /// Label names are unique.
    pub fn add_category(&mut self, label: LabelCategory) -> Result<CategoryId, LabelbridgeError> {
        self.categories.add(label)
    }

    /// Adds an item to its subset, creating the subset if needed.
    ///
    /// # Errors
    /// - [`LabelbridgeError::CategoryUnresolved`] if an annotation or part
    ///   owner names a category id outside the table.
    /// - [`LabelbridgeError::DuplicateItem`] if `(subset, id)` is taken.
    pub fn add_item(&mut self, item: DatasetItem) -> Result<(), LabelbridgeError> {
        self.check_labels(&item)?;
        let subset = self
            .subsets
            .entry(item.subset.clone())
            .or_insert_with(|| Subset::new(item.subset.clone()));
        if subset.items.contains_key(&item.id) {
            return Err(LabelbridgeError::DuplicateItem {
                subset: item.subset,
                id: item.id,
            });
        }
        subset.items.insert(item.id.clone(), item);
        Ok(())
    }

    fn check_labels(&self, item: &DatasetItem) -> Result<(), LabelbridgeError> {
        for ann in &item.annotations {
            let owner = match &ann.kind {
                AnnotationKind::PartMask { owner, .. } => owner.map(|key| key.label),
                _ => None,
            };
            for label in ann.label.into_iter().chain(owner) {
                if !self.categories.contains(label) {
                    return Err(LabelbridgeError::CategoryUnresolved {
                        reference: format!(
                            "annotation {} uses category id {label} (table has {} labels)",
                            ann.id,
                            self.categories.len()
                        ),
                        item: Some(item.item_ref()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Removes and returns an item.
    pub fn remove_item(&mut self, subset: &str, id: &str) -> Option<DatasetItem> {
        let entry = self.subsets.get_mut(subset)?;
        let item = entry.items.remove(id);
        if entry.items.is_empty() {
            self.subsets.remove(subset);
        }
        item
    }

    pub fn get(&self, subset: &str, id: &str) -> Option<&DatasetItem> {
        self.subsets.get(subset)?.get(id)
    }

    pub fn subset(&self, name: &str) -> Option<&Subset> {
        self.subsets.get(name)
    }

    pub fn subsets(&self) -> impl Iterator<Item = &Subset> {
        self.subsets.values()
    }

    pub fn subset_names(&self) -> Vec<&str> {
        self.subsets.keys().map(String::as_str).collect()
    }

    /// Every item, subset by subset, each subset ordered by id.
    pub fn items(&self) -> impl Iterator<Item = &DatasetItem> {
        self.subsets.values().flat_map(Subset::items)
    }

    pub fn len(&self) -> usize {
        self.subsets.values().map(Subset::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn annotation_count(&self) -> usize {
        self.items().map(|item| item.annotations.len()).sum()
    }

    /// Reads a dataset, detecting the format when `format` is `None`.
    ///
    /// # Errors
    /// See [`Dataset::import_with_report`].
    pub fn import(
        root: &Path,
        format: Option<&str>,
        registry: &FormatRegistry,
        options: &ImportOptions,
    ) -> Result<Self, LabelbridgeError> {
        Self::import_with_report(root, format, registry, options).map(|(dataset, _)| dataset)
    }

    /// Reads a dataset and reports the items that were skipped.
    ///
    /// A named format must still recognise `root`; reading a directory
    /// with the wrong plugin is refused up front.
    ///
    /// # Errors
    /// Detection and layout errors always abort. Per-item errors abort
    /// only when `options.strict` is set; otherwise the item is skipped
    /// and listed in the report.
    pub fn import_with_report(
        root: &Path,
        format: Option<&str>,
        registry: &FormatRegistry,
        options: &ImportOptions,
    ) -> Result<(Self, ConversionReport), LabelbridgeError> {
        let name = match format {
            Some(name) => {
                let plugin = registry.lookup(name)?;
                if !plugin.detector.detect(root)? {
                    return Err(LabelbridgeError::structure(
                        name,
                        root,
                        "directory does not have the layout of this format",
                    ));
                }
                name.to_string()
            }
            None => detect_format(root, registry)?,
        };
        let plugin = registry.lookup(&name)?;
        log::info!("importing {} as {name}", root.display());

        let extractor = plugin.extractor.open(root, options)?;
        let mut dataset = Self::with_categories(extractor.categories().clone());
        let mut report = ConversionReport::new(Stage::Import, name);
        report.input.items = extractor.len();
        report.input.categories = dataset.categories.len();

        for (index, result) in extractor.items().enumerate() {
            let outcome = result.and_then(|item| {
                let annotations = item.annotations.len();
                dataset.add_item(item).map(|()| annotations)
            });
            match outcome {
                Ok(annotations) => {
                    report.output.items += 1;
                    report.output.annotations += annotations;
                }
                Err(err) if options.strict || err.is_fatal() => return Err(err),
                Err(err) => {
                    log::warn!("skipping item {index}: {err}");
                    report.add(ConversionIssue::item_failed(err.item().cloned(), &err).at(index));
                }
            }
        }
        report.output.categories = dataset.categories.len();
        report.sort_issues();

        log::info!(
            "imported {} item(s) in {} subset(s), {} failed",
            dataset.len(),
            dataset.subsets.len(),
            report.error_count()
        );
        Ok((dataset, report))
    }

    /// Writes every item with the converter registered as `format`.
    ///
    /// # Errors
    /// See [`export_items`].
    pub fn export(
        &self,
        root: &Path,
        format: &str,
        registry: &FormatRegistry,
        options: &ExportOptions,
    ) -> Result<ConversionReport, LabelbridgeError> {
        let plugin = registry.lookup(format)?;
        let items: Vec<&DatasetItem> = self.items().collect();
        export_items(plugin, &self.categories, &items, root, options)
    }

    /// Builds a dataset sharing this one's label table.
    fn derived(&self, items: impl IntoIterator<Item = DatasetItem>) -> Self {
        let mut subsets: BTreeMap<String, Subset> = BTreeMap::new();
        for item in items {
            subsets
                .entry(item.subset.clone())
                .or_insert_with(|| Subset::new(item.subset.clone()))
                .items
                .insert(item.id.clone(), item);
        }
        Self {
            categories: self.categories.clone(),
            subsets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Annotation;

    fn dataset() -> Dataset {
        let mut dataset = Dataset::with_categories(LabelCategories::from_names(["car"]).unwrap());
        dataset
            .add_item(DatasetItem::new("b", "train").with_annotations(vec![Annotation::label(0u64, 0u32)]))
            .unwrap();
        dataset.add_item(DatasetItem::new("a", "train")).unwrap();
        dataset.add_item(DatasetItem::new("a", "val")).unwrap();
        dataset
    }

    #[test]
    fn items_are_ordered_by_subset_then_id() {
        let dataset = dataset();
        let order: Vec<(&str, &str)> = dataset
            .items()
            .map(|item| (item.subset.as_str(), item.id.as_str()))
            .collect();
        assert_eq!(order, vec![("train", "a"), ("train", "b"), ("val", "a")]);
        assert_eq!(dataset.subset_names(), vec!["train", "val"]);
        assert_eq!(dataset.annotation_count(), 1);
    }

    #[test]
    fn duplicate_items_are_rejected() {
        let mut dataset = dataset();
        let err = dataset.add_item(DatasetItem::new("a", "val")).unwrap_err();
        assert!(matches!(err, LabelbridgeError::DuplicateItem { .. }));
    }

    #[test]
    fn unknown_category_ids_are_rejected() {
        let mut dataset = dataset();
        let item = DatasetItem::new("c", "train").with_annotations(vec![Annotation::label(0u64, 4u32)]);
        let err = dataset.add_item(item).unwrap_err();
        assert!(matches!(
            err,
            LabelbridgeError::CategoryUnresolved { item: Some(_), .. }
        ));
    }

    #[test]
    fn removing_the_last_item_drops_the_subset() {
        let mut dataset = dataset();
        assert!(dataset.remove_item("val", "a").is_some());
        assert!(dataset.subset("val").is_none());
        assert!(dataset.remove_item("val", "a").is_none());
    }

    #[test]
    fn named_format_must_match_the_directory() {
        let temp = tempfile::tempdir().unwrap();
        let err = Dataset::import(
            temp.path(),
            Some("ade20k"),
            FormatRegistry::builtin(),
            &ImportOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LabelbridgeError::StructureInvalid { .. }));
    }
}
