//! Sample and requirement synthesis
//!
//! Turns the reduced [`SchemaShape`] of a body or query into a
//! [`RequestShape`]: one representative value tree plus the field paths
//! later stages corrupt (identifiers, numbers, time ranges).
//!
//! Sampling is deterministic. The same shape always yields the same tree,
//! so both environments receive byte-identical requests.

use crate::rules::{self, Placeholder};
use parity_model::{
    ExtractedRoute, FieldPath, NumberShape, RequestShape, RouteDescriptor, SchemaShape,
    StringFormat, StringShape, TimeRangePair,
};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};

/// Nesting guard for recursive shapes
const MAX_SAMPLE_DEPTH: usize = 16;

/// Build the route descriptor for an extracted route
#[must_use]
pub fn describe(route: &ExtractedRoute) -> RouteDescriptor {
    RouteDescriptor {
        method: route.method,
        path_template: route.path_template.clone(),
        auth: route.auth,
        body: route.body.as_ref().map(synthesize),
        query: route.query.as_ref().map(synthesize),
        multipart_fields: route.multipart_fields.clone(),
        source: route.source.clone(),
    }
}

/// Synthesize the request shape for one schema
#[must_use]
pub fn synthesize(shape: &SchemaShape) -> RequestShape {
    let sample = sample_value(shape, None, 0);
    let required_keys: BTreeSet<String> = shape.required_keys().into_iter().collect();
    let mut classes = FieldClasses::default();
    classes.walk(&sample, &FieldPath::root());
    RequestShape {
        sample,
        required_keys,
        identifier_paths: classes.identifiers,
        numeric_paths: classes.numerics,
        time_ranges: classes.time_ranges,
    }
}

/// Representative value for `shape`, named `name` in its parent
#[must_use]
pub fn sample_value(shape: &SchemaShape, name: Option<&str>, depth: usize) -> Value {
    if depth > MAX_SAMPLE_DEPTH {
        return Value::Null;
    }
    match shape {
        SchemaShape::Object { fields } => {
            let mut map = Map::new();
            for field in fields {
                map.insert(
                    field.name.clone(),
                    sample_value(&field.shape, Some(&field.name), depth + 1),
                );
            }
            Value::Object(map)
        }
        SchemaShape::Array { item } => Value::Array(vec![sample_value(item, name, depth + 1)]),
        SchemaShape::Tuple { items } => Value::Array(
            items
                .iter()
                .map(|i| sample_value(i, name, depth + 1))
                .collect(),
        ),
        SchemaShape::Literal { value } => value.clone(),
        SchemaShape::Union { variants } => variants
            .iter()
            .find(|v| !matches!(v, SchemaShape::Null))
            .or_else(|| variants.first())
            .map_or(Value::Null, |v| sample_value(v, name, depth + 1)),
        SchemaShape::String(s) => sample_string(s, name),
        SchemaShape::Number(n) => sample_number(n),
        SchemaShape::Boolean => Value::Bool(true),
        SchemaShape::Null => Value::Null,
        SchemaShape::Unknown => name.map_or(Placeholder::Text, rules::placeholder_for).value(),
    }
}

fn sample_string(shape: &StringShape, name: Option<&str>) -> Value {
    let by_name = name.map_or(Placeholder::Text, rules::placeholder_for);
    let placeholder = match shape.format {
        Some(StringFormat::Uuid) => Placeholder::Identifier,
        Some(StringFormat::Email) => Placeholder::Email,
        // datetimes keep the start/end distinction of the name
        Some(StringFormat::DateTime) => match by_name {
            Placeholder::End => Placeholder::End,
            _ => Placeholder::Start,
        },
        Some(StringFormat::Date) => Placeholder::Date,
        Some(StringFormat::Url) => Placeholder::Url,
        Some(StringFormat::Phone) => Placeholder::Phone,
        None => by_name,
    };
    let Value::String(mut text) = placeholder.value() else {
        return Value::Null;
    };
    if shape.format.is_none() {
        if let Some(min) = shape.min_len {
            while text.chars().count() < min {
                text.push('x');
            }
        }
        if let Some(max) = shape.max_len {
            text = text.chars().take(max).collect();
        }
    }
    Value::String(text)
}

fn sample_number(shape: &NumberShape) -> Value {
    let mut n = 1.0_f64;
    if let Some(min) = shape.min {
        n = n.max(min);
    }
    if let Some(max) = shape.max {
        n = n.min(max);
    }
    if shape.integer {
        n = n.ceil();
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        #[allow(clippy::cast_possible_truncation)]
        let whole = n as i64;
        return Value::from(whole);
    }
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

/// Classified paths, deduplicated by string form
#[derive(Debug, Default)]
struct FieldClasses {
    seen: HashSet<String>,
    identifiers: Vec<FieldPath>,
    numerics: Vec<FieldPath>,
    time_ranges: Vec<TimeRangePair>,
}

impl FieldClasses {
    fn walk(&mut self, value: &Value, at: &FieldPath) {
        match value {
            Value::Object(map) => {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                for (start, end) in rules::time_range_pairs(&keys) {
                    let pair = TimeRangePair {
                        start: at.child(start),
                        end: at.child(end),
                    };
                    if self.seen.insert(format!("range:{}", pair.start)) {
                        self.time_ranges.push(pair);
                    }
                }
                for (key, child) in map {
                    let path = at.child(key.as_str());
                    self.classify(key, child, &path);
                    self.walk(child, &path);
                }
            }
            // one element stands for the whole array
            Value::Array(items) => {
                if let Some(first) = items.first() {
                    self.walk(first, &at.index(0));
                }
            }
            _ => {}
        }
    }

    fn classify(&mut self, key: &str, value: &Value, path: &FieldPath) {
        let is_scalar_id = matches!(value, Value::String(_))
            || matches!(value, Value::Array(items) if items.first().is_some_and(Value::is_string));
        if rules::is_identifier_name(key) && is_scalar_id {
            if self.seen.insert(format!("id:{path}")) {
                self.identifiers.push(path.clone());
            }
            return;
        }
        if value.is_number() || (rules::is_numeric_name(key) && !value.is_object() && !value.is_array()) {
            if self.seen.insert(format!("num:{path}")) {
                self.numerics.push(path.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_model::{FieldShape, HttpMethod};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn booking() -> SchemaShape {
        SchemaShape::Object {
            fields: vec![
                FieldShape::required("sessionId", SchemaShape::formatted(StringFormat::Uuid)),
                FieldShape::required("startTime", SchemaShape::formatted(StringFormat::DateTime)),
                FieldShape::required("endTime", SchemaShape::formatted(StringFormat::DateTime)),
                FieldShape::optional("notes", SchemaShape::Unknown),
                FieldShape::optional(
                    "seats",
                    SchemaShape::Number(NumberShape {
                        min: Some(1.0),
                        max: Some(10.0),
                        integer: true,
                    }),
                ),
                FieldShape::required(
                    "guests",
                    SchemaShape::Array {
                        item: Box::new(SchemaShape::Object {
                            fields: vec![FieldShape::required("email", SchemaShape::Unknown)],
                        }),
                    },
                ),
            ],
        }
    }

    #[test]
    fn samples_follow_formats_and_names() {
        let shape = synthesize(&booking());
        assert_eq!(
            shape.sample,
            json!({
                "sessionId": rules::SAMPLE_ID,
                "startTime": rules::SAMPLE_START,
                "endTime": rules::SAMPLE_END,
                "notes": "Test",
                "seats": 1,
                "guests": [{ "email": rules::SAMPLE_EMAIL }],
            })
        );
        assert_eq!(
            shape.required_keys.into_iter().collect::<Vec<_>>(),
            vec!["endTime", "guests", "sessionId", "startTime"]
        );
    }

    #[test]
    fn classifies_paths() {
        let shape = synthesize(&booking());
        let ids: Vec<String> = shape.identifier_paths.iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["sessionId"]);
        let nums: Vec<String> = shape.numeric_paths.iter().map(ToString::to_string).collect();
        assert_eq!(nums, vec!["seats"]);
        assert_eq!(shape.time_ranges.len(), 1);
        assert_eq!(shape.time_ranges[0].start.to_string(), "startTime");
        assert_eq!(shape.time_ranges[0].end.to_string(), "endTime");
    }

    #[test]
    fn string_bounds_are_respected() {
        let s = SchemaShape::String(StringShape {
            format: None,
            min_len: Some(8),
            max_len: Some(10),
        });
        assert_eq!(sample_value(&s, Some("title"), 0), json!("Testxxxx"));
        let short = SchemaShape::String(StringShape {
            format: None,
            min_len: None,
            max_len: Some(2),
        });
        assert_eq!(sample_value(&short, Some("code"), 0), json!("Te"));
    }

    #[test]
    fn number_bounds_are_respected() {
        let n = SchemaShape::Number(NumberShape {
            min: Some(2.5),
            max: None,
            integer: false,
        });
        assert_eq!(sample_value(&n, None, 0), json!(2.5));
        let negative = SchemaShape::Number(NumberShape {
            min: None,
            max: Some(-3.0),
            integer: true,
        });
        assert_eq!(sample_value(&negative, None, 0), json!(-3));
    }

    #[test]
    fn union_prefers_non_null() {
        let u = SchemaShape::Union {
            variants: vec![SchemaShape::Null, SchemaShape::Boolean],
        };
        assert_eq!(sample_value(&u, None, 0), json!(true));
    }

    #[test]
    fn describe_copies_route_metadata() {
        let mut route = ExtractedRoute::new(HttpMethod::Post, "/api/bookings");
        route.body = Some(booking());
        let descriptor = describe(&route);
        assert_eq!(descriptor.key(), "POST /api/bookings");
        assert!(descriptor.body.is_some());
        assert!(descriptor.query.is_none());
    }

    #[test]
    fn identifier_arrays_are_identifier_paths() {
        let shape = SchemaShape::Object {
            fields: vec![FieldShape::required(
                "clientIds",
                SchemaShape::Array {
                    item: Box::new(SchemaShape::formatted(StringFormat::Uuid)),
                },
            )],
        };
        let out = synthesize(&shape);
        let ids: Vec<String> = out.identifier_paths.iter().map(ToString::to_string).collect();
        assert_eq!(ids, vec!["clientIds"]);
    }
}
