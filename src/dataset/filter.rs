//! Item and annotation filtering.
//!
//! Filters never touch the source dataset; they return a new one that
//! shares the label table, so category ids stay valid.

use std::collections::HashSet;

use super::Dataset;
use crate::error::LabelbridgeError;
use crate::ir::{Annotation, CategoryId, DatasetItem};

/// What a predicate is applied to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum FilterMode {
    /// Keep or drop whole items; annotations are untouched.
    #[default]
    Items,
    /// Keep or drop annotations; every item is kept.
    Annotations,
    /// Filter annotations, then drop items left without any.
    ItemsAndAnnotations,
}

impl Dataset {
    /// Items for which `keep` holds.
    pub fn filter_items(&self, keep: impl Fn(&DatasetItem) -> bool) -> Dataset {
        self.derived(self.items().filter(|item| keep(item)).cloned())
    }

    /// Annotations for which `keep` holds; with `remove_empty`, items left
    /// without annotations are dropped too.
    pub fn filter_annotations(
        &self,
        keep: impl Fn(&DatasetItem, &Annotation) -> bool,
        remove_empty: bool,
    ) -> Dataset {
        let items = self.items().filter_map(|item| {
            let annotations: Vec<Annotation> = item
                .annotations
                .iter()
                .filter(|ann| keep(item, ann))
                .cloned()
                .collect();
            if remove_empty && annotations.is_empty() {
                return None;
            }
            let mut kept = item.clone();
            kept.annotations = annotations;
            Some(kept)
        });
        self.derived(items)
    }

    /// Applies one predicate in the given mode.
    ///
    /// `keep` receives `None` for the annotation in [`FilterMode::Items`].
    pub fn filter(
        &self,
        mode: FilterMode,
        keep: impl Fn(&DatasetItem, Option<&Annotation>) -> bool,
    ) -> Dataset {
        match mode {
            FilterMode::Items => self.filter_items(|item| keep(item, None)),
            FilterMode::Annotations => self.filter_annotations(|item, ann| keep(item, Some(ann)), false),
            FilterMode::ItemsAndAnnotations => {
                self.filter_annotations(|item, ann| keep(item, Some(ann)), true)
            }
        }
    }

    /// Keeps what refers to the named labels.
    ///
    /// In [`FilterMode::Items`] an item is kept if any annotation has one
    /// of the labels.
    ///
    /// # Errors
    /// Every name must be in the label table.
    pub fn filter_by_labels(&self, names: &[&str], mode: FilterMode) -> Result<Dataset, LabelbridgeError> {
        let mut selected: HashSet<CategoryId> = HashSet::with_capacity(names.len());
        for name in names {
            let id = self
                .categories
                .find(name)
                .ok_or_else(|| LabelbridgeError::CategoryUnresolved {
                    reference: format!("label '{name}'"),
                    item: None,
                })?;
            selected.insert(id);
        }

        let has_label = |ann: &Annotation| ann.label.is_some_and(|label| selected.contains(&label));
        Ok(match mode {
            FilterMode::Items => self.filter_items(|item| item.annotations.iter().any(|ann| has_label(ann))),
            FilterMode::Annotations => self.filter_annotations(|_, ann| has_label(ann), false),
            FilterMode::ItemsAndAnnotations => self.filter_annotations(|_, ann| has_label(ann), true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::LabelCategories;

    fn dataset() -> Dataset {
        let mut dataset =
            Dataset::with_categories(LabelCategories::from_names(["car", "person"]).unwrap());
        dataset
            .add_item(DatasetItem::new("a", "train").with_annotations(vec![
                Annotation::label(0u64, 0u32),
                Annotation::label(1u64, 1u32),
            ]))
            .unwrap();
        dataset
            .add_item(
                DatasetItem::new("b", "train").with_annotations(vec![Annotation::label(0u64, 1u32)]),
            )
            .unwrap();
        dataset.add_item(DatasetItem::new("c", "val")).unwrap();
        dataset
    }

    #[test]
    fn filters_leave_the_source_untouched() {
        let source = dataset();
        let before = source.clone();
        let filtered = source.filter_items(|item| item.subset == "val");
        assert_eq!(filtered.len(), 1);
        assert_eq!(source, before);
        assert_eq!(filtered.categories(), source.categories());
    }

    #[test]
    fn annotation_filter_modes() {
        let source = dataset();
        let is_car = |_: &DatasetItem, ann: Option<&Annotation>| {
            ann.is_some_and(|ann| ann.label == Some(CategoryId::new(0)))
        };

        let kept = source.filter(FilterMode::Annotations, is_car);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept.annotation_count(), 1);

        let pruned = source.filter(FilterMode::ItemsAndAnnotations, is_car);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned.get("train", "a").unwrap().annotations.len(), 1);
    }

    #[test]
    fn label_filter_resolves_names() {
        let source = dataset();
        let items = source.filter_by_labels(&["person"], FilterMode::Items).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items.annotation_count(), 3);

        let err = source.filter_by_labels(&["bus"], FilterMode::Items).unwrap_err();
        assert!(matches!(err, LabelbridgeError::CategoryUnresolved { .. }));
    }
}
