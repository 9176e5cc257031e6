//! Types shared between the sync engine and connector implementations.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Normalize an attribute name for storage and lookup.
///
/// Attribute names are compared case-insensitively everywhere; normalization
/// happens at every insert and lookup rather than relying on a
/// case-insensitive container.
pub fn normalize_attribute(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// A multi-valued attribute map: attribute name to value list.
///
/// Duplicate values are collapsed on insert and attribute names are stored
/// lower-cased. Value order is preserved but carries no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    attributes: HashMap<String, Vec<String>>,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self {
            attributes: HashMap::new(),
        }
    }

    /// Set the values for an attribute, collapsing duplicates.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        let values: Vec<String> = values.into_iter().unique().collect();
        self.attributes.insert(normalize_attribute(name), values);
    }

    /// Builder-style variant of [`Dataset::set`].
    pub fn with(mut self, name: &str, values: &[&str]) -> Self {
        self.set(name, values.iter().map(|v| (*v).to_string()).collect());
        self
    }

    /// Add a single value to an attribute, ignoring duplicates.
    pub fn add_value(&mut self, name: &str, value: String) {
        let entry = self
            .attributes
            .entry(normalize_attribute(name))
            .or_default();
        if !entry.contains(&value) {
            entry.push(value);
        }
    }

    /// Get the value list for an attribute, if present.
    pub fn values_of(&self, name: &str) -> Option<&[String]> {
        self.attributes
            .get(&normalize_attribute(name))
            .map(|v| v.as_slice())
    }

    /// Get a cloned value list for an attribute, empty when absent.
    pub fn values_cloned(&self, name: &str) -> Vec<String> {
        self.values_of(name).map(|v| v.to_vec()).unwrap_or_default()
    }

    /// Check whether the attribute carries at least one value.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.values_of(name).is_some_and(|v| !v.is_empty())
    }

    /// Remove an attribute and return its values.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.attributes.remove(&normalize_attribute(name))
    }
}

/// One fetched entry from a source or destination repository.
///
/// The main identifier is the opaque key used for pivot matching (a
/// distinguished name, a primary key). Records are built by connector
/// fetches and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Opaque main identifier of the entry in its repository.
    pub main_id: String,
    /// All fetched attributes.
    pub attributes: Dataset,
}

impl Record {
    /// Create a record from its identifier and attributes.
    pub fn new(main_id: impl Into<String>, attributes: Dataset) -> Self {
        Self {
            main_id: main_id.into(),
            attributes,
        }
    }
}

/// The business key of one reconciliation unit plus the small set of pivot
/// attributes needed to re-locate the same logical entry in the other
/// repository without a full fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotId {
    /// Business key of the entry.
    pub id: String,
    /// Pivot attributes used for cross-repository matching.
    pub pivot: Dataset,
}

impl PivotId {
    /// Create a pivot from its business key and pivot attributes.
    pub fn new(id: impl Into<String>, pivot: Dataset) -> Self {
        Self {
            id: id.into(),
            pivot,
        }
    }
}

/// Classification of the change a reconciliation pass computed for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOperation {
    /// The entry is missing from the destination and must be created.
    Create,
    /// The destination entry exists and needs attribute changes.
    Update,
    /// The destination entry exists under a different identifier.
    Rename,
    /// The destination entry must be removed.
    Delete,
    /// Nothing to do for this entry.
    Noop,
}

impl SyncOperation {
    /// Lower-case name used in logs and configuration keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::Create => "create",
            SyncOperation::Update => "update",
            SyncOperation::Rename => "rename",
            SyncOperation::Delete => "delete",
            SyncOperation::Noop => "noop",
        }
    }
}

impl std::fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a single attribute is modified on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Add the listed values, keeping existing ones.
    Add,
    /// Replace the attribute with exactly the listed values.
    Replace,
    /// Remove the attribute entirely.
    Delete,
}

/// One attribute-level change inside a [`Modification`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Lower-cased attribute name.
    pub attribute: String,
    /// Add, replace or delete.
    pub kind: ChangeKind,
    /// The values carried by the change; empty for a delete.
    pub values: Vec<String>,
}

impl AttributeChange {
    /// Create an attribute change.
    pub fn new(attribute: &str, kind: ChangeKind, values: Vec<String>) -> Self {
        Self {
            attribute: normalize_attribute(attribute),
            kind,
            values,
        }
    }
}

/// The minimal set of changes computed for one entry, consumed by the
/// destination connector's `apply`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    /// Operation classification for the entry.
    pub operation: SyncOperation,
    /// Identifier the operation targets in the destination.
    pub main_id: String,
    /// New destination identifier, set only for renames.
    pub new_id: Option<String>,
    /// Ordered attribute-level changes.
    pub changes: Vec<AttributeChange>,
}

impl Modification {
    /// Create a modification.
    pub fn new(operation: SyncOperation, main_id: impl Into<String>) -> Self {
        Self {
            operation,
            main_id: main_id.into(),
            new_id: None,
            changes: Vec::new(),
        }
    }

    /// A no-op modification for an entry that needs nothing.
    pub fn noop(main_id: impl Into<String>) -> Self {
        Self::new(SyncOperation::Noop, main_id)
    }

    /// Check whether this modification carries no work.
    pub fn is_noop(&self) -> bool {
        self.operation == SyncOperation::Noop
    }
}

/// Errors raised by connector implementations.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("apply rejected: {0}")]
    ApplyRejected(String),

    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_normalizes_names_and_collapses_duplicates() {
        let mut ds = Dataset::new();
        ds.set("Mail", vec!["a@x".to_string(), "a@x".to_string(), "b@x".to_string()]);
        assert_eq!(
            ds.values_of("MAIL"),
            Some(&["a@x".to_string(), "b@x".to_string()][..])
        );
        ds.add_value("mail", "a@x".to_string());
        assert_eq!(ds.values_of("mail").map(<[String]>::len), Some(2));
    }

    #[test]
    fn dataset_has_attribute_ignores_empty_lists() {
        let mut ds = Dataset::new();
        ds.set("cn", vec![]);
        assert!(!ds.has_attribute("cn"));
        ds.add_value("cn", "User".to_string());
        assert!(ds.has_attribute("CN"));
    }

    #[test]
    fn operation_names_are_stable() {
        assert_eq!(SyncOperation::Create.to_string(), "create");
        assert_eq!(SyncOperation::Noop.as_str(), "noop");
    }
}
