//! The label table shared by every item of a dataset.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

use super::ids::CategoryId;
use crate::error::LabelbridgeError;

/// One label definition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelCategory {
    pub name: String,

    /// Optional parent label name for hierarchical taxonomies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl LabelCategory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
        }
    }

    pub fn with_parent(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
        }
    }
}

/// Ordered, append-only label table; the position of a label is its
/// [`CategoryId`].
///
/// Names are unique. Items refer to labels only by id, so a dataset owns
/// exactly one table and is the only place it changes.
#[derive(Clone, Debug, Default)]
pub struct LabelCategories {
    labels: Vec<LabelCategory>,
    by_name: HashMap<String, CategoryId>,
}

impl LabelCategories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from names in order.
    ///
    /// # Errors
    /// Fails on the first duplicate name.
    pub fn from_names<I, S>(names: I) -> Result<Self, LabelbridgeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::new();
        for name in names {
            table.add(LabelCategory::new(name))?;
        }
        Ok(table)
    }

    /// Appends a label and returns its id.
    ///
    /// # Errors
    /// Returns [`LabelbridgeError::InvalidAnnotation`] when the name is
    /// already present.
    pub fn add(&mut self, label: LabelCategory) -> Result<CategoryId, LabelbridgeError> {
        if self.by_name.contains_key(&label.name) {
            return Err(LabelbridgeError::InvalidAnnotation(format!(
                "duplicate label name '{}'",
                label.name
            )));
        }
        let id = CategoryId::new(self.labels.len() as u32);
        self.by_name.insert(label.name.clone(), id);
        self.labels.push(label);
        Ok(id)
    }

    /// Returns the id for `name`, appending it if missing.
    pub fn find_or_add(&mut self, name: &str) -> CategoryId {
        if let Some(id) = self.find(name) {
            return id;
        }
        let id = CategoryId::new(self.labels.len() as u32);
        self.by_name.insert(name.to_string(), id);
        self.labels.push(LabelCategory::new(name));
        id
    }

    pub fn find(&self, name: &str) -> Option<CategoryId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: CategoryId) -> Option<&LabelCategory> {
        self.labels.get(id.index())
    }

    /// Label name for `id`.
    ///
    /// # Errors
    /// Returns [`LabelbridgeError::CategoryUnresolved`] for ids past the end
    /// of the table.
    pub fn name(&self, id: CategoryId) -> Result<&str, LabelbridgeError> {
        self.get(id)
            .map(|label| label.name.as_str())
            .ok_or_else(|| LabelbridgeError::CategoryUnresolved {
                reference: format!("category id {id} (table has {} labels)", self.len()),
                item: None,
            })
    }

    pub fn contains(&self, id: CategoryId) -> bool {
        id.index() < self.labels.len()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CategoryId, &LabelCategory)> {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, label)| (CategoryId::new(i as u32), label))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|label| label.name.as_str())
    }
}

impl PartialEq for LabelCategories {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Serialize for LabelCategories {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.labels.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LabelCategories {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let labels = Vec::<LabelCategory>::deserialize(deserializer)?;
        let mut table = LabelCategories::new();
        for label in labels {
            table.add(label).map_err(serde::de::Error::custom)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_insertion_order() {
        let table = LabelCategories::from_names(["wall", "car", "wheel"]).unwrap();
        assert_eq!(table.find("wall"), Some(CategoryId(0)));
        assert_eq!(table.find("wheel"), Some(CategoryId(2)));
        assert_eq!(table.name(CategoryId(1)).unwrap(), "car");
        assert_eq!(table.names().collect::<Vec<_>>(), ["wall", "car", "wheel"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut table = LabelCategories::new();
        table.add(LabelCategory::new("car")).unwrap();
        assert!(table.add(LabelCategory::new("car")).is_err());
        assert_eq!(table.find_or_add("car"), CategoryId(0));
        assert_eq!(table.find_or_add("bus"), CategoryId(1));
    }

    #[test]
    fn unknown_id_is_unresolved() {
        let table = LabelCategories::from_names(["a"]).unwrap();
        let err = table.name(CategoryId(4)).unwrap_err();
        assert!(matches!(err, LabelbridgeError::CategoryUnresolved { .. }));
    }

    #[test]
    fn deserialization_rejects_duplicates() {
        let ok: LabelCategories =
            serde_json::from_str(r#"[{"name":"a"},{"name":"b","parent":"a"}]"#).unwrap();
        assert_eq!(ok.get(CategoryId(1)).unwrap().parent.as_deref(), Some("a"));
        assert!(serde_json::from_str::<LabelCategories>(r#"[{"name":"a"},{"name":"a"}]"#).is_err());
    }
}
