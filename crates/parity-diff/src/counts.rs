//! Table row-count deltas

use crate::Finding;
use parity_model::MismatchBucket;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Row counts by table
pub type TableCounts = BTreeMap<String, i64>;

/// Non-zero per-table deltas; a table missing on one side counts as zero
#[must_use]
pub fn table_deltas(before: &TableCounts, after: &TableCounts) -> TableCounts {
    let tables: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    tables
        .into_iter()
        .filter_map(|t| {
            let delta = after.get(t).copied().unwrap_or(0) - before.get(t).copied().unwrap_or(0);
            (delta != 0).then(|| (t.clone(), delta))
        })
        .collect()
}

/// Compare the environments' deltas; `phase` names the window compared
#[must_use]
pub fn compare_deltas(phase: &str, legacy: &TableCounts, candidate: &TableCounts) -> Option<Finding> {
    if legacy == candidate {
        return None;
    }
    let tables: Vec<&String> = legacy
        .keys()
        .chain(candidate.keys())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .filter(|t| legacy.get(*t) != candidate.get(*t))
        .collect();
    Some(
        Finding::new(MismatchBucket::Db, to_value(legacy), to_value(candidate))
            .with_detail(json!({ "phase": phase, "tables": tables })),
    )
}

fn to_value(counts: &TableCounts) -> Value {
    Value::Object(counts.iter().map(|(k, v)| (k.clone(), json!(v))).collect())
}
