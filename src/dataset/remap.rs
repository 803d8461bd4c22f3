//! Label renaming and removal.

use std::collections::BTreeMap;

use super::Dataset;
use crate::error::LabelbridgeError;
use crate::ir::{AnnotationKind, CategoryId, LabelCategories, LabelCategory};

/// What happens to labels the mapping does not mention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RemapDefault {
    #[default]
    Keep,
    Delete,
}

impl Dataset {
    /// Returns a copy of this dataset with labels renamed or deleted and
    /// every item reference rewritten. The receiver is left unchanged.
    ///
    /// `mapping` maps an old name to a new name, or to `None` to delete
    /// it. Several labels may map to one name and are merged. Annotations
    /// with a deleted label are removed; part owners with a deleted label
    /// are cleared.
    ///
    /// # Errors
    /// Only table construction can fail, which a valid mapping never
    /// triggers.
    pub fn remap_labels(
        &self,
        mapping: &BTreeMap<String, Option<String>>,
        default: RemapDefault,
    ) -> Result<Dataset, LabelbridgeError> {
        let mut table = LabelCategories::new();
        let mut translation: Vec<Option<CategoryId>> = Vec::with_capacity(self.categories.len());

        for (_, label) in self.categories.iter() {
            let target = match mapping.get(&label.name) {
                Some(target) => target.clone(),
                None => match default {
                    RemapDefault::Keep => Some(label.name.clone()),
                    RemapDefault::Delete => None,
                },
            };
            let id = match target {
                Some(name) => Some(match table.find(&name) {
                    Some(id) => id,
                    None => table.add(LabelCategory {
                        parent: label.parent.clone(),
                        name,
                    })?,
                }),
                None => None,
            };
            translation.push(id);
        }

        let translate = |id: CategoryId| translation.get(id.index()).copied().flatten();
        let mut removed = 0usize;
        let items: Vec<_> = self
            .items()
            .map(|item| {
                let mut item = item.clone();
                let before = item.annotations.len();
                item.annotations.retain(|ann| ann.label.map_or(true, |id| translate(id).is_some()));
                removed += before - item.annotations.len();

                for ann in &mut item.annotations {
                    ann.label = ann.label.and_then(translate);
                    if let AnnotationKind::PartMask { owner, .. } = &mut ann.kind {
                        *owner = owner.and_then(|mut key| {
                            key.label = translate(key.label)?;
                            Some(key)
                        });
                    }
                }
                item
            })
            .collect();

        log::info!(
            "remapped {} label(s) to {}, removed {removed} annotation(s)",
            self.categories.len(),
            table.len()
        );
        let mut remapped = self.derived(items);
        remapped.categories = table;
        Ok(remapped)
    }
}
