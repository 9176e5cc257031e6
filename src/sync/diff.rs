//! Diff engine: computes the minimal modification for one entry.
//!
//! Pure comparison logic, no I/O. Given the task policy, the source record
//! and the optional destination record, it classifies the operation and
//! produces the attribute-level changes the destination connector must
//! apply. The destination identifier for new or renamed entries is computed
//! by the caller from the policy's dn expression and passed in, which keeps
//! this module free of the evaluator dependency.

use crate::connector::{
    AttributeChange, ChangeKind, Modification, Record, SyncOperation,
};
use crate::sync::policy::{AttributeAction, SyncPolicy};
use itertools::Itertools;
use std::collections::HashSet;

/// Compare a source record against an optional destination record.
///
/// `target_id` is the destination identifier produced from the policy's dn
/// expression, when one is configured. Absent source with present
/// destination classifies a delete; this path is only reached from the
/// clean orchestrator.
pub fn compute(
    policy: &SyncPolicy,
    source: Option<&Record>,
    destination: Option<&Record>,
    target_id: Option<&str>,
) -> Modification {
    match (source, destination) {
        (None, Some(dest)) => Modification::new(SyncOperation::Delete, dest.main_id.clone()),
        (None, None) => Modification::noop(""),
        (Some(src), None) => create(policy, src, target_id),
        (Some(src), Some(dest)) => update(policy, src, dest, target_id),
    }
}

/// Drop empty-string values and collapse duplicates, preserving order.
///
/// A value list holding only empty strings counts as "no value": empty
/// attributes are never written to the destination.
fn filtered(values: &[String]) -> Vec<String> {
    values
        .iter()
        .filter(|v| !v.is_empty())
        .unique()
        .cloned()
        .collect()
}

/// Order-insensitive equality on exact string values.
fn same_values(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let set: HashSet<&String> = a.iter().collect();
    b.iter().all(|v| set.contains(v))
}

fn create(policy: &SyncPolicy, source: &Record, target_id: Option<&str>) -> Modification {
    let main_id = target_id.unwrap_or(&source.main_id).to_string();
    let mut modification = Modification::new(SyncOperation::Create, main_id);

    for attribute in policy.write_attributes() {
        let mut values = filtered(&source.attributes.values_cloned(attribute));
        if values.is_empty() {
            values = filtered(&policy.create_values_of(attribute).unwrap_or_default());
        }
        if !values.is_empty() {
            modification
                .changes
                .push(AttributeChange::new(attribute, ChangeKind::Add, values));
        }
    }

    if modification.changes.is_empty() {
        modification.operation = SyncOperation::Noop;
    }
    modification
}

fn update(
    policy: &SyncPolicy,
    source: &Record,
    destination: &Record,
    target_id: Option<&str>,
) -> Modification {
    let renamed = target_id.is_some_and(|t| t != destination.main_id);
    let mut modification = Modification::new(SyncOperation::Update, destination.main_id.clone());

    for attribute in policy.write_attributes() {
        let src_values = filtered(&source.attributes.values_cloned(attribute));
        let dst_values = filtered(&destination.attributes.values_cloned(attribute));

        let change = match policy.action_for(attribute) {
            AttributeAction::Keep => keep_change(policy, attribute, src_values, &dst_values),
            AttributeAction::Force => force_change(policy, attribute, src_values, &dst_values),
            AttributeAction::Merge => merge_change(policy, attribute, src_values, &dst_values),
        };
        if let Some(change) = change {
            modification.changes.push(change);
        }
    }

    if renamed {
        modification.operation = SyncOperation::Rename;
        modification.new_id = target_id.map(str::to_string);
    } else if modification.changes.is_empty() {
        modification.operation = SyncOperation::Noop;
    }
    modification
}

/// Fill an attribute the destination holds no value for: source first, then
/// the configured default, then the create seed.
fn empty_destination_fill(
    policy: &SyncPolicy,
    attribute: &str,
    src_values: Vec<String>,
) -> Option<AttributeChange> {
    let mut values = src_values;
    if values.is_empty() {
        values = filtered(&policy.default_values_of(attribute).unwrap_or_default());
    }
    if values.is_empty() {
        values = filtered(&policy.create_values_of(attribute).unwrap_or_default());
    }
    if values.is_empty() {
        return None;
    }
    Some(AttributeChange::new(attribute, ChangeKind::Add, values))
}

/// Keep: the destination wins whenever it already holds a value.
fn keep_change(
    policy: &SyncPolicy,
    attribute: &str,
    src_values: Vec<String>,
    dst_values: &[String],
) -> Option<AttributeChange> {
    if !dst_values.is_empty() {
        return None;
    }
    empty_destination_fill(policy, attribute, src_values)
}

/// Force: the destination becomes exactly the source list; the configured
/// force values seed the list when the source has none.
fn force_change(
    policy: &SyncPolicy,
    attribute: &str,
    src_values: Vec<String>,
    dst_values: &[String],
) -> Option<AttributeChange> {
    let mut wanted = src_values;
    if wanted.is_empty() {
        wanted = filtered(&policy.force_values_of(attribute).unwrap_or_default());
    }
    if same_values(&wanted, dst_values) {
        return None;
    }
    if wanted.is_empty() {
        if dst_values.is_empty() {
            return None;
        }
        return Some(AttributeChange::new(attribute, ChangeKind::Delete, vec![]));
    }
    Some(AttributeChange::new(attribute, ChangeKind::Replace, wanted))
}

/// Merge: add the source values missing from the destination; never remove
/// a destination-only value.
fn merge_change(
    policy: &SyncPolicy,
    attribute: &str,
    src_values: Vec<String>,
    dst_values: &[String],
) -> Option<AttributeChange> {
    if dst_values.is_empty() {
        return empty_destination_fill(policy, attribute, src_values);
    }
    let current: HashSet<&String> = dst_values.iter().collect();
    let new_values: Vec<String> = src_values
        .into_iter()
        .filter(|v| !current.contains(v))
        .collect();
    if new_values.is_empty() {
        return None;
    }
    Some(AttributeChange::new(attribute, ChangeKind::Add, new_values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Dataset;

    fn policy(pairs: &[(&str, &str)]) -> SyncPolicy {
        SyncPolicy::from_entries(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string())),
        )
    }

    fn record(main_id: &str, attrs: &[(&str, &[&str])]) -> Record {
        let mut ds = Dataset::new();
        for (name, values) in attrs {
            ds.set(name, values.iter().map(|v| (*v).to_string()).collect());
        }
        Record::new(main_id, ds)
    }

    fn change_for<'a>(m: &'a Modification, attr: &str) -> Option<&'a AttributeChange> {
        m.changes.iter().find(|c| c.attribute == attr)
    }

    #[test]
    fn absent_destination_classifies_create_with_seed_values() {
        let policy = policy(&[
            ("write_attributes", "mail, cn"),
            ("mail.create_value", "u@example.com"),
        ]);
        let source = record("uid=u", &[("cn", &["User"])]);
        let m = compute(&policy, Some(&source), None, None);
        assert_eq!(m.operation, SyncOperation::Create);
        let mail = change_for(&m, "mail").unwrap();
        assert_eq!(mail.kind, ChangeKind::Add);
        assert_eq!(mail.values, vec!["u@example.com".to_string()]);
        assert_eq!(change_for(&m, "cn").unwrap().values, vec!["User".to_string()]);
    }

    #[test]
    fn keep_never_overwrites_an_existing_destination_value() {
        let policy = policy(&[("write_attributes", "cn"), ("cn.action", "K")]);
        let source = record("uid=u", &[("cn", &["New"])]);
        let destination = record("uid=u", &[("cn", &["Old"])]);
        let m = compute(&policy, Some(&source), Some(&destination), None);
        assert_eq!(m.operation, SyncOperation::Noop);
        assert!(m.changes.is_empty());
    }

    #[test]
    fn keep_fills_an_empty_destination_from_source_or_defaults() {
        let policy = policy(&[
            ("write_attributes", "cn, mail"),
            ("cn.action", "K"),
            ("mail.action", "K"),
            ("mail.default_value", "fallback@example.com"),
        ]);
        let source = record("uid=u", &[("cn", &["User"])]);
        let destination = record("uid=u", &[]);
        let m = compute(&policy, Some(&source), Some(&destination), None);
        assert_eq!(m.operation, SyncOperation::Update);
        assert_eq!(change_for(&m, "cn").unwrap().values, vec!["User".to_string()]);
        assert_eq!(
            change_for(&m, "mail").unwrap().values,
            vec!["fallback@example.com".to_string()]
        );
    }

    #[test]
    fn force_replaces_with_the_full_source_list() {
        let policy = policy(&[("write_attributes", "sn")]);
        let source = record("uid=u", &[("sn", &["Doe", "Smith"])]);
        let destination = record("uid=u", &[("sn", &["Doe"])]);
        let m = compute(&policy, Some(&source), Some(&destination), None);
        assert_eq!(m.operation, SyncOperation::Update);
        let sn = change_for(&m, "sn").unwrap();
        assert_eq!(sn.kind, ChangeKind::Replace);
        assert_eq!(sn.values, vec!["Doe".to_string(), "Smith".to_string()]);
    }

    #[test]
    fn force_emits_delete_when_the_source_list_becomes_empty() {
        let policy = policy(&[("write_attributes", "sn")]);
        let source = record("uid=u", &[]);
        let destination = record("uid=u", &[("sn", &["Doe"])]);
        let m = compute(&policy, Some(&source), Some(&destination), None);
        let sn = change_for(&m, "sn").unwrap();
        assert_eq!(sn.kind, ChangeKind::Delete);
        assert!(sn.values.is_empty());
    }

    #[test]
    fn empty_string_values_are_never_written() {
        let policy = policy(&[("write_attributes", "sn")]);
        // regression scenario: a source carrying sn=[""] must not produce a write
        let source = record("uid=u", &[("sn", &[""])]);
        let m = compute(&policy, Some(&source), None, None);
        assert_eq!(m.operation, SyncOperation::Noop);

        let destination = record("uid=u", &[]);
        let m = compute(&policy, Some(&source), Some(&destination), None);
        assert_eq!(m.operation, SyncOperation::Noop);
    }

    #[test]
    fn merge_adds_only_the_new_values() {
        let policy = policy(&[("write_attributes", "mail"), ("mail.action", "M")]);
        let source = record("uid=u", &[("mail", &["a", "b"])]);
        let destination = record("uid=u", &[("mail", &["a"])]);
        let m = compute(&policy, Some(&source), Some(&destination), None);
        let mail = change_for(&m, "mail").unwrap();
        assert_eq!(mail.kind, ChangeKind::Add);
        assert_eq!(mail.values, vec!["b".to_string()]);
    }

    #[test]
    fn merge_never_removes_a_destination_only_value() {
        let policy = policy(&[("write_attributes", "mail"), ("mail.action", "M")]);
        let source = record("uid=u", &[("mail", &["a"])]);
        let destination = record("uid=u", &[("mail", &["a", "legacy"])]);
        let m = compute(&policy, Some(&source), Some(&destination), None);
        assert_eq!(m.operation, SyncOperation::Noop);
    }

    #[test]
    fn attributes_outside_the_allow_list_are_never_emitted() {
        let policy = policy(&[("write_attributes", "cn")]);
        let source = record("uid=u", &[("cn", &["User"]), ("secret", &["x"])]);
        let m = compute(&policy, Some(&source), None, None);
        assert!(change_for(&m, "secret").is_none());
        assert!(change_for(&m, "cn").is_some());
    }

    #[test]
    fn identical_records_classify_noop() {
        let policy = policy(&[("write_attributes", "cn, sn")]);
        let source = record("uid=u", &[("cn", &["User"]), ("sn", &["Doe"])]);
        let destination = record("uid=u", &[("cn", &["User"]), ("sn", &["Doe"])]);
        let m = compute(&policy, Some(&source), Some(&destination), None);
        assert!(m.is_noop());
    }

    #[test]
    fn force_ignores_value_order() {
        let policy = policy(&[("write_attributes", "member")]);
        let source = record("g", &[("member", &["a", "b"])]);
        let destination = record("g", &[("member", &["b", "a"])]);
        let m = compute(&policy, Some(&source), Some(&destination), None);
        assert!(m.is_noop());
    }

    #[test]
    fn differing_target_id_classifies_rename() {
        let policy = policy(&[("write_attributes", "cn")]);
        let source = record("uid=u", &[("cn", &["New Name"])]);
        let destination = record("cn=Old Name,ou=people", &[("cn", &["Old Name"])]);
        let m = compute(
            &policy,
            Some(&source),
            Some(&destination),
            Some("cn=New Name,ou=people"),
        );
        assert_eq!(m.operation, SyncOperation::Rename);
        assert_eq!(m.main_id, "cn=Old Name,ou=people");
        assert_eq!(m.new_id.as_deref(), Some("cn=New Name,ou=people"));
        // the attribute change still rides along for after the rename
        assert_eq!(
            change_for(&m, "cn").unwrap().values,
            vec!["New Name".to_string()]
        );
    }

    #[test]
    fn matching_target_id_is_not_a_rename() {
        let policy = policy(&[("write_attributes", "cn")]);
        let source = record("uid=u", &[("cn", &["User"])]);
        let destination = record("uid=u", &[("cn", &["User"])]);
        let m = compute(&policy, Some(&source), Some(&destination), Some("uid=u"));
        assert!(m.is_noop());
    }

    #[test]
    fn absent_source_with_destination_classifies_delete() {
        let policy = policy(&[("write_attributes", "cn")]);
        let destination = record("uid=gone", &[("cn", &["Ghost"])]);
        let m = compute(&policy, None, Some(&destination), None);
        assert_eq!(m.operation, SyncOperation::Delete);
        assert_eq!(m.main_id, "uid=gone");
        assert!(m.changes.is_empty());
    }
}
