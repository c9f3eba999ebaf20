//! Value-tree corruption
//!
//! Applies one [`MutationOp`] to a sample. The operator set is closed; every
//! corruption is addressed by an explicit [`FieldPath`] so the same
//! corruption reproduces in both environments.

use crate::error::{SynthError, SynthResult};
use crate::rules::INVALID_ID;
use parity_model::{FieldPath, MutationOp};
use serde_json::{json, Value};

/// Apply `op` to `value` in place
///
/// # Errors
///
/// Returns [`SynthError::TargetNotFound`] when the addressed path is absent
/// and [`SynthError::Inapplicable`] when a range endpoint is missing.
pub fn apply(op: &MutationOp, value: &mut Value) -> SynthResult<()> {
    match op {
        MutationOp::DeleteKey { path } => {
            path.remove(value)
                .ok_or_else(|| SynthError::TargetNotFound(path.clone()))?;
        }
        MutationOp::Retype { path } => {
            let slot = target(path, value)?;
            *slot = retyped(slot);
        }
        MutationOp::InvalidId { path } => {
            let slot = target(path, value)?;
            *slot = match slot {
                Value::Array(items) if !items.is_empty() => {
                    Value::Array(vec![Value::String(INVALID_ID.to_string()); items.len()])
                }
                _ => Value::String(INVALID_ID.to_string()),
            };
        }
        MutationOp::Negate { path } => {
            let slot = target(path, value)?;
            *slot = negated(slot);
        }
        MutationOp::InvertRange { start, end } => {
            let a = start
                .get(value)
                .cloned()
                .ok_or_else(|| SynthError::TargetNotFound(start.clone()))?;
            let b = end
                .get(value)
                .cloned()
                .ok_or_else(|| SynthError::inapplicable("invert_range", end, "range end missing"))?;
            start.set(value, b)?;
            end.set(value, a)?;
        }
        MutationOp::Replace { path, value: new } => {
            path.set(value, new.clone())?;
        }
    }
    Ok(())
}

/// Apply `op` to a copy of `value`
///
/// # Errors
///
/// Same conditions as [`apply`].
pub fn applied(op: &MutationOp, value: &Value) -> SynthResult<Value> {
    let mut out = value.clone();
    apply(op, &mut out)?;
    Ok(out)
}

fn target<'v>(path: &FieldPath, value: &'v mut Value) -> SynthResult<&'v mut Value> {
    path.get_mut(value)
        .ok_or_else(|| SynthError::TargetNotFound(path.clone()))
}

/// Value of a different JSON type
#[must_use]
pub fn retyped(value: &Value) -> Value {
    match value {
        Value::String(_) => json!(12345),
        Value::Number(_) => json!("not-a-number"),
        Value::Bool(_) => json!("not-a-boolean"),
        Value::Array(_) => json!("not-an-array"),
        Value::Object(_) => json!("not-an-object"),
        Value::Null => json!(12345),
    }
}

/// Valid JSON whose top-level type differs from the sample's
#[must_use]
pub fn wrong_top_level(sample: &Value) -> Value {
    match sample {
        Value::Array(_) => json!({ "unexpected": true }),
        _ => json!([sample.clone()]),
    }
}

fn negated(value: &Value) -> Value {
    match value.as_f64() {
        Some(n) if n.fract() == 0.0 => {
            #[allow(clippy::cast_possible_truncation)]
            let whole = n.abs().max(1.0) as i64;
            json!(-whole)
        }
        Some(n) => json!(-n.abs()),
        None => json!(-1),
    }
}

/// Every field of a query sample replaced by garbage of the wrong type
#[must_use]
pub fn garbled_query(sample: &Value) -> Value {
    match sample {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), retyped(v)))
                .collect(),
        ),
        other => retyped(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Value {
        json!({
            "clientId": "00000000-0000-4000-8000-000000000001",
            "seats": 2,
            "price": 9.5,
            "window": { "from": "a", "to": "b" },
            "tags": ["x"],
        })
    }

    fn p(s: &str) -> FieldPath {
        s.parse().unwrap()
    }

    #[test]
    fn delete_key_removes_nested() {
        let out = applied(&MutationOp::DeleteKey { path: p("window.from") }, &sample()).unwrap();
        assert_eq!(out["window"], json!({ "to": "b" }));
    }

    #[test]
    fn delete_missing_key_fails() {
        let err = applied(&MutationOp::DeleteKey { path: p("nope") }, &sample()).unwrap_err();
        assert!(matches!(err, SynthError::TargetNotFound(_)));
    }

    #[test]
    fn retype_changes_json_type() {
        let out = applied(&MutationOp::Retype { path: p("seats") }, &sample()).unwrap();
        assert_eq!(out["seats"], json!("not-a-number"));
        let out = applied(&MutationOp::Retype { path: p("tags") }, &sample()).unwrap();
        assert!(out["tags"].is_string());
    }

    #[test]
    fn invalid_id_and_negate() {
        let out = applied(&MutationOp::InvalidId { path: p("clientId") }, &sample()).unwrap();
        assert_eq!(out["clientId"], json!(INVALID_ID));
        let out = applied(&MutationOp::Negate { path: p("seats") }, &sample()).unwrap();
        assert_eq!(out["seats"], json!(-2));
        let out = applied(&MutationOp::Negate { path: p("price") }, &sample()).unwrap();
        assert_eq!(out["price"], json!(-9.5));
    }

    #[test]
    fn invert_range_swaps() {
        let op = MutationOp::InvertRange {
            start: p("window.from"),
            end: p("window.to"),
        };
        let out = applied(&op, &sample()).unwrap();
        assert_eq!(out["window"], json!({ "from": "b", "to": "a" }));
    }

    #[test]
    fn replace_sets_value() {
        let op = MutationOp::Replace {
            path: p("page"),
            value: json!(0),
        };
        let out = applied(&op, &sample()).unwrap();
        assert_eq!(out["page"], json!(0));
    }

    #[test]
    fn top_level_and_query_garbling() {
        assert!(wrong_top_level(&sample()).is_array());
        assert!(wrong_top_level(&json!([])).is_object());
        let q = garbled_query(&json!({ "limit": 10, "status": "open" }));
        assert_eq!(q, json!({ "limit": "not-a-number", "status": 12345 }));
    }
}
