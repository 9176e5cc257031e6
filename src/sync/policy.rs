//! Per-task synchronization policy store.
//!
//! Holds the attribute-level reconciliation rules: which side wins per
//! attribute (keep/force/merge), fallback and seed values, the destination
//! write allow-list, per-operation condition expressions and the destination
//! identifier expression. Built once at task start-up from raw configuration
//! entries, immutable afterwards and shared read-only by all workers.
//!
//! Loading is deliberately forgiving: unknown policy letters, oversized
//! delimiters and malformed keys are logged and skipped so a partially
//! broken configuration still starts the task.

use crate::connector::{SyncOperation, normalize_attribute};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

const DEFAULT_DELIMITER: &str = ";";
const DEFAULT_CONDITION: &str = "true";

/// Which side wins for one attribute during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeAction {
    /// Destination wins: never overwrite an existing destination value.
    Keep,
    /// Source wins: the destination is set to exactly the source values.
    Force,
    /// Union: source values are added, destination values are never removed.
    Merge,
}

impl AttributeAction {
    /// Parse the single-letter configuration form (K/F/M, case-insensitive).
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim() {
            "K" | "k" => Some(AttributeAction::Keep),
            "F" | "f" => Some(AttributeAction::Force),
            "M" | "m" => Some(AttributeAction::Merge),
            _ => None,
        }
    }
}

/// Closed set of policy implementations selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Every attribute is forced from the source; per-attribute entries are
    /// ignored.
    ForceOnly,
    /// Full per-attribute rules parsed from raw entries.
    #[default]
    PropertiesBased,
}

/// The per-task policy store.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    default_action: AttributeAction,
    attribute_actions: HashMap<String, AttributeAction>,
    default_values: HashMap<String, Vec<String>>,
    create_values: HashMap<String, Vec<String>>,
    force_values: HashMap<String, Vec<String>>,
    write_attributes: Vec<String>,
    conditions: HashMap<SyncOperation, String>,
    dn_expression: Option<String>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            default_action: AttributeAction::Force,
            attribute_actions: HashMap::new(),
            default_values: HashMap::new(),
            create_values: HashMap::new(),
            force_values: HashMap::new(),
            write_attributes: Vec::new(),
            conditions: HashMap::new(),
            dn_expression: None,
        }
    }
}

/// Raw string values gathered during parsing, split at finalize time once
/// the per-attribute delimiter is known.
#[derive(Default)]
struct RawValues {
    default_values: HashMap<String, String>,
    create_values: HashMap<String, String>,
    force_values: HashMap<String, String>,
    delimiters: HashMap<String, String>,
}

impl SyncPolicy {
    /// Build a policy of the given kind from raw `(key, value)` entries.
    ///
    /// The explicit factory replaces any global policy registry: the set of
    /// policy implementations is closed and selected here.
    pub fn build(
        kind: PolicyKind,
        entries: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        match kind {
            PolicyKind::PropertiesBased => Self::from_entries(entries),
            PolicyKind::ForceOnly => Self::from_entries(entries.into_iter().filter(|(key, _)| {
                key == "write_attributes" || key == "dn" || key.starts_with("condition.")
            })),
        }
    }

    /// Parse raw entries into a policy.
    ///
    /// Recognized keys: `default_action`, `write_attributes`, `dn`,
    /// `condition.<operation>` and the two-part `<attribute>.<setting>` form
    /// with settings `action`, `default_value`, `create_value`,
    /// `force_value` and `delimiter`. Anything else is logged and skipped.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let mut policy = SyncPolicy::default();
        let mut raw = RawValues::default();

        for (key, value) in entries {
            let key = key.trim();
            match key {
                "default_action" => match AttributeAction::from_letter(&value) {
                    Some(action) => policy.default_action = action,
                    None => warn!("unknown policy letter `{}` for default_action, skipping", value),
                },
                "write_attributes" => {
                    policy.write_attributes = value
                        .split([',', ' '])
                        .filter(|s| !s.is_empty())
                        .map(normalize_attribute)
                        .collect();
                }
                "dn" => {
                    if !value.trim().is_empty() {
                        policy.dn_expression = Some(value);
                    }
                }
                _ if key.starts_with("condition.") => {
                    Self::parse_condition(&mut policy, key, value);
                }
                _ => Self::parse_attribute_entry(&mut policy, &mut raw, key, value),
            }
        }

        policy.finalize(raw);
        policy
    }

    fn parse_condition(policy: &mut SyncPolicy, key: &str, value: String) {
        let operation = match &key["condition.".len()..] {
            "create" => SyncOperation::Create,
            "update" => SyncOperation::Update,
            "delete" => SyncOperation::Delete,
            "rename" => SyncOperation::Rename,
            other => {
                warn!("unknown condition operation `{}`, skipping", other);
                return;
            }
        };
        if value.trim().is_empty() {
            warn!("empty condition for {}, keeping default", operation);
            return;
        }
        policy.conditions.insert(operation, value);
    }

    fn parse_attribute_entry(
        policy: &mut SyncPolicy,
        raw: &mut RawValues,
        key: &str,
        value: String,
    ) {
        let mut parts = key.splitn(2, '.');
        let (Some(attribute), Some(setting)) = (parts.next(), parts.next()) else {
            warn!("malformed policy key `{}`, skipping", key);
            return;
        };
        if attribute.is_empty() || setting.is_empty() || setting.contains('.') {
            warn!("malformed policy key `{}`, skipping", key);
            return;
        }
        let attribute = normalize_attribute(attribute);
        match setting {
            "action" => match AttributeAction::from_letter(&value) {
                Some(action) => {
                    policy.attribute_actions.insert(attribute, action);
                }
                None => warn!(
                    "unknown policy letter `{}` for attribute {}, skipping",
                    value, attribute
                ),
            },
            "default_value" => {
                raw.default_values.insert(attribute, value);
            }
            "create_value" => {
                raw.create_values.insert(attribute, value);
            }
            "force_value" => {
                raw.force_values.insert(attribute, value);
            }
            "delimiter" => {
                if value.chars().count() > 1 {
                    warn!(
                        "delimiter `{}` for attribute {} is longer than one character, skipping",
                        value, attribute
                    );
                } else if !value.is_empty() {
                    raw.delimiters.insert(attribute, value);
                }
            }
            other => warn!("unknown policy setting `{}.{}`, skipping", attribute, other),
        }
    }

    /// Split raw value strings with their delimiter and apply the
    /// create-from-default fallback.
    fn finalize(&mut self, raw: RawValues) {
        let split = |attribute: &str, value: &str| -> Vec<String> {
            let delimiter = raw
                .delimiters
                .get(attribute)
                .map(String::as_str)
                .unwrap_or(DEFAULT_DELIMITER);
            value.split(delimiter).map(str::to_string).collect()
        };

        for (attribute, value) in &raw.default_values {
            self.default_values
                .insert(attribute.clone(), split(attribute, value));
        }
        for (attribute, value) in &raw.create_values {
            self.create_values
                .insert(attribute.clone(), split(attribute, value));
        }
        for (attribute, value) in &raw.force_values {
            self.force_values
                .insert(attribute.clone(), split(attribute, value));
        }

        // A configured default value stands in for an absent create value.
        for (attribute, values) in &self.default_values {
            self.create_values
                .entry(attribute.clone())
                .or_insert_with(|| values.clone());
        }

        if self.write_attributes.is_empty() {
            warn!("no write attributes configured, destination will never be written");
        }
    }

    /// Resolve the action for an attribute, falling back to the default.
    pub fn action_for(&self, attribute: &str) -> AttributeAction {
        self.attribute_actions
            .get(&normalize_attribute(attribute))
            .copied()
            .unwrap_or(self.default_action)
    }

    /// Fallback values for an attribute, as an independent copy.
    pub fn default_values_of(&self, attribute: &str) -> Option<Vec<String>> {
        self.default_values
            .get(&normalize_attribute(attribute))
            .cloned()
    }

    /// Seed values used when creating an entry, as an independent copy.
    pub fn create_values_of(&self, attribute: &str) -> Option<Vec<String>> {
        self.create_values
            .get(&normalize_attribute(attribute))
            .cloned()
    }

    /// Values forced when the source has none, as an independent copy.
    pub fn force_values_of(&self, attribute: &str) -> Option<Vec<String>> {
        self.force_values
            .get(&normalize_attribute(attribute))
            .cloned()
    }

    /// Attributes ever permitted to be written to the destination.
    pub fn write_attributes(&self) -> &[String] {
        &self.write_attributes
    }

    /// Condition expression for an operation; never empty.
    pub fn condition_for(&self, operation: SyncOperation) -> &str {
        self.conditions
            .get(&operation)
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONDITION)
    }

    /// Expression producing the destination identifier for new entries.
    pub fn dn_expression(&self) -> Option<&str> {
        self.dn_expression.as_deref()
    }
}
