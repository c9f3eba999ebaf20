//! Primary-row before/after diffs
//!
//! Each environment's diff is computed against its own snapshot, then the
//! two diffs are compared after normalization (ids and timestamps never
//! agree across databases).

use crate::normalize::{ArrayOrder, Normalizer};
use crate::Finding;
use parity_model::MismatchBucket;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Columns ignored by default when diffing rows
pub const DEFAULT_VOLATILE_COLUMNS: &[&str] = &[
    "updated_at",
    "created_at",
    "last_seen_at",
    "search_vector",
    "password_hash",
];

/// One changed column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnChange {
    pub before: Value,
    pub after: Value,
}

/// What happened to the primary row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowDelta {
    /// No row before or after
    Absent,
    Unchanged,
    Inserted,
    Deleted,
    Changed { columns: BTreeMap<String, ColumnChange> },
}

impl RowDelta {
    /// Changed column names (empty unless [`RowDelta::Changed`])
    #[must_use]
    pub fn columns(&self) -> BTreeSet<&str> {
        match self {
            Self::Changed { columns } => columns.keys().map(String::as_str).collect(),
            _ => BTreeSet::new(),
        }
    }
}

/// Diff one environment's row snapshots, skipping `ignored` columns
#[must_use]
pub fn row_delta(
    before: Option<&Map<String, Value>>,
    after: Option<&Map<String, Value>>,
    ignored: &BTreeSet<String>,
) -> RowDelta {
    match (before, after) {
        (None, None) => RowDelta::Absent,
        (None, Some(_)) => RowDelta::Inserted,
        (Some(_), None) => RowDelta::Deleted,
        (Some(before), Some(after)) => {
            let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
            let columns: BTreeMap<String, ColumnChange> = keys
                .into_iter()
                .filter(|k| !ignored.contains(k.as_str()))
                .filter_map(|k| {
                    let b = before.get(k).cloned().unwrap_or(Value::Null);
                    let a = after.get(k).cloned().unwrap_or(Value::Null);
                    (a != b).then(|| (k.clone(), ColumnChange { before: b, after: a }))
                })
                .collect();
            if columns.is_empty() {
                RowDelta::Unchanged
            } else {
                RowDelta::Changed { columns }
            }
        }
    }
}

/// Column names are kept as they are; only their values are normalized
fn normalized(normalizer: &Normalizer, delta: &RowDelta) -> Value {
    match delta {
        RowDelta::Changed { columns } => {
            let columns: Map<String, Value> = columns
                .iter()
                .map(|(name, change)| {
                    let change = json!({
                        "before": normalizer.normalize(&change.before, ArrayOrder::Ignore),
                        "after": normalizer.normalize(&change.after, ArrayOrder::Ignore),
                    });
                    (name.clone(), change)
                })
                .collect();
            json!({ "kind": "changed", "columns": columns })
        }
        other => serde_json::to_value(other).unwrap_or(Value::Null),
    }
}

/// Compare the two environments' row deltas
#[must_use]
pub fn compare_row_deltas(
    normalizer: &Normalizer,
    legacy: &RowDelta,
    candidate: &RowDelta,
) -> Option<Finding> {
    let l = normalized(normalizer, legacy);
    let c = normalized(normalizer, candidate);
    if l == c {
        return None;
    }
    let columns: BTreeSet<&str> = legacy.columns().union(&candidate.columns()).copied().collect();
    Some(Finding::new(MismatchBucket::Row, l, c).with_detail(json!({ "columns": columns })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn ignored() -> BTreeSet<String> {
        DEFAULT_VOLATILE_COLUMNS.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn changed_columns_only() {
        let before = row(json!({ "status": "pending", "amount": 10, "updated_at": "a" }));
        let after = row(json!({ "status": "cancelled", "amount": 10, "updated_at": "b" }));
        let delta = row_delta(Some(&before), Some(&after), &ignored());
        assert_eq!(delta.columns().into_iter().collect::<Vec<_>>(), vec!["status"]);
        assert_eq!(row_delta(Some(&before), Some(&before), &ignored()), RowDelta::Unchanged);
    }

    #[test]
    fn presence_transitions() {
        let r = row(json!({ "id": 1 }));
        assert_eq!(row_delta(None, Some(&r), &ignored()), RowDelta::Inserted);
        assert_eq!(row_delta(Some(&r), None, &ignored()), RowDelta::Deleted);
        assert_eq!(row_delta(None, None, &ignored()), RowDelta::Absent);
    }

    #[test]
    fn cross_environment_ids_are_normalized() {
        let n = Normalizer::default();
        let l = row_delta(
            Some(&row(json!({ "refund_id": null }))),
            Some(&row(json!({ "refund_id": "0f8fad5b-d9cb-469f-a165-70867728950e" }))),
            &ignored(),
        );
        let c = row_delta(
            Some(&row(json!({ "refund_id": null }))),
            Some(&row(json!({ "refund_id": "7c9e6679-7425-40de-944b-e07fc1f90ae7" }))),
            &ignored(),
        );
        assert!(compare_row_deltas(&n, &l, &c).is_none());
    }

    #[test]
    fn identifier_columns_still_count_in_row_deltas() {
        let n = Normalizer::default();
        let before = row(json!({ "refund_id": null }));
        let l = row_delta(
            Some(&before),
            Some(&row(json!({ "refund_id": "0f8fad5b-d9cb-469f-a165-70867728950e" }))),
            &ignored(),
        );
        let c = row_delta(Some(&before), Some(&before), &ignored());
        let finding = compare_row_deltas(&n, &l, &c).unwrap();
        assert_eq!(finding.detail.unwrap()["columns"], json!(["refund_id"]));
    }

    #[test]
    fn password_hashes_never_differ() {
        let n = Normalizer::default();
        let before = row(json!({ "email": "a@b.c", "password_hash": "$2b$10$aaaa" }));
        let l = row_delta(
            Some(&before),
            Some(&row(json!({ "email": "a@b.c", "password_hash": "$2b$10$bbbb" }))),
            &ignored(),
        );
        let c = row_delta(
            Some(&before),
            Some(&row(json!({ "email": "a@b.c", "password_hash": "$2b$10$cccc" }))),
            &ignored(),
        );
        assert_eq!(l, RowDelta::Unchanged);
        assert!(compare_row_deltas(&n, &l, &c).is_none());
    }

    #[test]
    fn differing_deltas_name_columns() {
        let n = Normalizer::default();
        let before = row(json!({ "status": "pending", "notes": "x" }));
        let l = row_delta(Some(&before), Some(&row(json!({ "status": "cancelled", "notes": "x" }))), &ignored());
        let c = row_delta(Some(&before), Some(&row(json!({ "status": "pending", "notes": "y" }))), &ignored());
        let finding = compare_row_deltas(&n, &l, &c).unwrap();
        assert_eq!(finding.bucket, MismatchBucket::Row);
        assert_eq!(finding.detail.unwrap()["columns"], json!(["notes", "status"]));
    }
}
