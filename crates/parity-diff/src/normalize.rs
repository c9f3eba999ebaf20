//! Response normalization
//!
//! Two servers never agree on generated identifiers, clocks or request ids,
//! so bodies are compared after normalization:
//!
//! - object keys sorted, volatile keys elided
//! - UUID-shaped strings → [`UUID_PLACEHOLDER`]
//! - ISO-date-shaped strings → [`DATE_PLACEHOLDER`]
//! - whole floats folded to integers
//! - array order optionally ignored (elements sorted by canonical form)
//!
//! Error bodies are reduced further to their *shape*: every scalar becomes
//! its JSON type name. Normalization is idempotent.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Replacement for UUID-shaped strings
pub const UUID_PLACEHOLDER: &str = "<uuid>";

/// Replacement for ISO-date-shaped strings
pub const DATE_PLACEHOLDER: &str = "<date>";

/// Keys whose values differ between any two runs
///
/// A leading `*` matches any key ending with the rest (`*_id` elides
/// `client_id`).
pub const DEFAULT_VOLATILE_KEYS: &[&str] = &[
    "id",
    "*_id",
    "*Id",
    "password",
    "passwordHash",
    "password_hash",
    "createdAt",
    "updatedAt",
    "deletedAt",
    "created_at",
    "updated_at",
    "deleted_at",
    "timestamp",
    "requestId",
    "request_id",
    "traceId",
    "token",
    "accessToken",
    "refreshToken",
    "expiresAt",
    "expires_at",
    "etag",
];

static UUID_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").ok()
});

static DATE_RE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}(:?\d{2})?)?)?$").ok()
});

/// Whether array element order takes part in the comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOrder {
    Ignore,
    Preserve,
}

/// Placeholder for a volatile-looking scalar string
#[must_use]
pub fn scalar_placeholder(s: &str) -> Option<&'static str> {
    if UUID_RE.as_ref().is_some_and(|re| re.is_match(s)) {
        return Some(UUID_PLACEHOLDER);
    }
    if DATE_RE.as_ref().is_some_and(|re| re.is_match(s)) {
        return Some(DATE_PLACEHOLDER);
    }
    None
}

/// JSON type name of a value
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Key-sorted compact serialization, independent of map implementation
#[must_use]
pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Body normalizer configured with the volatile key deny-list
#[derive(Debug, Clone)]
pub struct Normalizer {
    volatile_keys: BTreeSet<String>,
    volatile_suffixes: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_VOLATILE_KEYS.iter().copied())
    }
}

impl Normalizer {
    /// Normalizer eliding exactly `volatile_keys` (and `*suffix` patterns)
    pub fn new<I, S>(volatile_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys = BTreeSet::new();
        let mut suffixes = Vec::new();
        for key in volatile_keys {
            let key: String = key.into();
            match key.strip_prefix('*') {
                Some(suffix) if !suffix.is_empty() => suffixes.push(suffix.to_string()),
                _ => {
                    keys.insert(key);
                }
            }
        }
        Self {
            volatile_keys: keys,
            volatile_suffixes: suffixes,
        }
    }

    /// True when `key` is elided
    #[must_use]
    pub fn is_volatile(&self, key: &str) -> bool {
        self.volatile_keys.contains(key)
            || self
                .volatile_suffixes
                .iter()
                .any(|suffix| key.len() > suffix.len() && key.ends_with(suffix.as_str()))
    }

    /// Normalized copy of a response body
    #[must_use]
    pub fn normalize(&self, value: &Value, order: ArrayOrder) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.normalize_object(map, |v| self.normalize(v, order))),
            Value::Array(items) => {
                let items: Vec<Value> = items.iter().map(|v| self.normalize(v, order)).collect();
                Value::Array(match order {
                    ArrayOrder::Preserve => items,
                    ArrayOrder::Ignore => sorted(items),
                })
            }
            Value::String(s) => scalar_placeholder(s).map_or_else(|| value.clone(), |p| Value::String(p.to_string())),
            Value::Number(n) => match n.as_f64() {
                Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                    #[allow(clippy::cast_possible_truncation)]
                    let whole = f as i64;
                    Value::from(whole)
                }
                _ => value.clone(),
            },
            Value::Bool(_) | Value::Null => value.clone(),
        }
    }

    /// Type-only shape of an error body
    ///
    /// Scalars become their type name; `null` stays distinct from missing
    /// keys. Arrays keep their length and order.
    #[must_use]
    pub fn error_shape(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.normalize_object(map, |v| self.error_shape(v))),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.error_shape(v)).collect()),
            scalar => Value::String(type_name(scalar).to_string()),
        }
    }

    fn normalize_object(&self, map: &Map<String, Value>, each: impl Fn(&Value) -> Value) -> Map<String, Value> {
        let mut keys: Vec<&String> = map.keys().filter(|k| !self.is_volatile(k)).collect();
        keys.sort();
        keys.into_iter().map(|k| (k.clone(), each(&map[k]))).collect()
    }
}

fn sorted(mut items: Vec<Value>) -> Vec<Value> {
    items.sort_by_cached_key(canonical);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn placeholders() {
        assert_eq!(scalar_placeholder("0f8fad5b-d9cb-469f-a165-70867728950e"), Some(UUID_PLACEHOLDER));
        assert_eq!(scalar_placeholder("2030-01-01T10:00:00.000Z"), Some(DATE_PLACEHOLDER));
        assert_eq!(scalar_placeholder("2030-01-01"), Some(DATE_PLACEHOLDER));
        assert_eq!(scalar_placeholder("2030-01-01 10:00:00+00"), Some(DATE_PLACEHOLDER));
        assert_eq!(scalar_placeholder("Test"), None);
    }

    #[test]
    fn normalize_elides_and_sorts() {
        let n = Normalizer::default();
        let body = json!({
            "id": "0f8fad5b-d9cb-469f-a165-70867728950e",
            "createdAt": "2030-01-01T10:00:00.000Z",
            "items": [{ "n": 2 }, { "n": 1.0 }],
            "name": "Yoga",
        });
        assert_eq!(
            n.normalize(&body, ArrayOrder::Ignore),
            json!({ "items": [{ "n": 1 }, { "n": 2 }], "name": "Yoga" })
        );
        assert_eq!(
            n.normalize(&body, ArrayOrder::Preserve)["items"],
            json!([{ "n": 2 }, { "n": 1 }])
        );
    }

    #[test]
    fn error_shape_keeps_types_only() {
        let n = Normalizer::default();
        let a = json!({ "error": "Not found", "code": 404, "details": [{ "path": "x" }], "hint": null });
        let b = json!({ "error": "Missing", "code": 410, "details": [{ "path": "y" }], "hint": null });
        assert_eq!(n.error_shape(&a), n.error_shape(&b));
        assert_eq!(
            n.error_shape(&a),
            json!({ "code": "number", "details": [{ "path": "string" }], "error": "string", "hint": "null" })
        );
        let c = json!({ "error": "Missing", "hint": "try again" });
        assert_ne!(n.error_shape(&a), n.error_shape(&c));
    }

    #[test]
    fn canonical_is_key_order_independent() {
        let a: Value = serde_json::from_str(r#"{"b":1,"a":[true,null]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a":[true,null],"b":1}"#).unwrap();
        assert_eq!(canonical(&a), canonical(&b));
        assert_eq!(canonical(&a), r#"{"a":[true,null],"b":1}"#);
    }

    #[test]
    fn suffix_patterns_elide_identifier_keys() {
        let n = Normalizer::default();
        for key in ["id", "client_id", "serviceId", "password", "password_hash"] {
            assert!(n.is_volatile(key), "{key}");
        }
        for key in ["paid", "valid", "name", "_id"] {
            assert!(!n.is_volatile(key), "{key}");
        }
        let custom = Normalizer::new(["*_ref", "*"]);
        assert!(custom.is_volatile("order_ref"));
        assert!(custom.is_volatile("*"));
        assert!(!custom.is_volatile("name"));
    }

    #[test]
    fn custom_volatile_keys() {
        let n = Normalizer::new(["version"]);
        assert_eq!(n.normalize(&json!({ "version": 3, "createdAt": 1 }), ArrayOrder::Ignore), json!({ "createdAt": 1 }));
    }
}
