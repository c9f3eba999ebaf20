//! Reduced request-schema shapes
//!
//! Extractors reduce whatever validation DSL the reference server uses into
//! this closed set of shapes. Anything they cannot reduce becomes
//! [`SchemaShape::Unknown`], which the sample synthesizer fills with a
//! name-sniffed placeholder.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Known string formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringFormat {
    Uuid,
    Email,
    DateTime,
    Date,
    Url,
    Phone,
}

/// String constraints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringShape {
    pub format: Option<StringFormat>,
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
}

/// Numeric constraints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumberShape {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub integer: bool,
}

/// Object member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldShape {
    pub name: String,
    pub shape: SchemaShape,
    /// Optional, nullish or defaulted members are not required
    pub optional: bool,
}

impl FieldShape {
    /// Required member
    #[must_use]
    pub fn required(name: impl Into<String>, shape: SchemaShape) -> Self {
        Self {
            name: name.into(),
            shape,
            optional: false,
        }
    }

    /// Optional member
    #[must_use]
    pub fn optional(name: impl Into<String>, shape: SchemaShape) -> Self {
        Self {
            name: name.into(),
            shape,
            optional: true,
        }
    }
}

/// Reduced schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaShape {
    Object { fields: Vec<FieldShape> },
    Array { item: Box<SchemaShape> },
    Tuple { items: Vec<SchemaShape> },
    Literal { value: Value },
    Union { variants: Vec<SchemaShape> },
    String(StringShape),
    Number(NumberShape),
    Boolean,
    Null,
    Unknown,
}

impl SchemaShape {
    /// Plain string
    #[inline]
    #[must_use]
    pub fn string() -> Self {
        Self::String(StringShape::default())
    }

    /// String with a format
    #[inline]
    #[must_use]
    pub fn formatted(format: StringFormat) -> Self {
        Self::String(StringShape {
            format: Some(format),
            ..StringShape::default()
        })
    }

    /// Plain number
    #[inline]
    #[must_use]
    pub fn number() -> Self {
        Self::Number(NumberShape::default())
    }

    /// Object from members
    #[inline]
    #[must_use]
    pub fn object(fields: Vec<FieldShape>) -> Self {
        Self::Object { fields }
    }

    /// Top-level keys that must be present
    #[must_use]
    pub fn required_keys(&self) -> Vec<String> {
        match self {
            Self::Object { fields } => fields
                .iter()
                .filter(|f| !f.optional)
                .map(|f| f.name.clone())
                .collect(),
            // Keys every variant requires
            Self::Union { variants } => {
                let mut iter = variants.iter().map(SchemaShape::required_keys);
                let Some(first) = iter.next() else {
                    return Vec::new();
                };
                iter.fold(first, |acc, keys| {
                    acc.into_iter().filter(|k| keys.contains(k)).collect()
                })
            }
            _ => Vec::new(),
        }
    }

    /// Mark every member optional (`.partial()`)
    #[must_use]
    pub fn into_partial(self) -> Self {
        match self {
            Self::Object { fields } => Self::Object {
                fields: fields
                    .into_iter()
                    .map(|f| FieldShape {
                        optional: true,
                        ..f
                    })
                    .collect(),
            },
            other => other,
        }
    }

    /// Mark every member required (`.required()`)
    #[must_use]
    pub fn into_required(self) -> Self {
        match self {
            Self::Object { fields } => Self::Object {
                fields: fields
                    .into_iter()
                    .map(|f| FieldShape {
                        optional: false,
                        ..f
                    })
                    .collect(),
            },
            other => other,
        }
    }

    /// Append or replace members (`.extend()` / `.merge()`)
    #[must_use]
    pub fn extended(self, extra: Vec<FieldShape>) -> Self {
        match self {
            Self::Object { mut fields } => {
                for field in extra {
                    if let Some(existing) = fields.iter_mut().find(|f| f.name == field.name) {
                        *existing = field;
                    } else {
                        fields.push(field);
                    }
                }
                Self::Object { fields }
            }
            Self::Unknown => Self::Object { fields: extra },
            other => other,
        }
    }

    /// Keep only the named members (`.pick()`), or drop them (`.omit()`)
    #[must_use]
    pub fn filtered(self, names: &[String], keep: bool) -> Self {
        match self {
            Self::Object { fields } => Self::Object {
                fields: fields
                    .into_iter()
                    .filter(|f| names.contains(&f.name) == keep)
                    .collect(),
            },
            other => other,
        }
    }

    /// True when the shape accepts JSON objects
    #[must_use]
    pub fn is_object(&self) -> bool {
        match self {
            Self::Object { .. } => true,
            Self::Union { variants } => variants.iter().any(SchemaShape::is_object),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking() -> SchemaShape {
        SchemaShape::object(vec![
            FieldShape::required("sessionId", SchemaShape::formatted(StringFormat::Uuid)),
            FieldShape::required("clientId", SchemaShape::formatted(StringFormat::Uuid)),
            FieldShape::optional("note", SchemaShape::string()),
        ])
    }

    #[test]
    fn required_keys_skip_optional() {
        assert_eq!(booking().required_keys(), vec!["sessionId", "clientId"]);
    }

    #[test]
    fn partial_clears_required() {
        assert!(booking().into_partial().required_keys().is_empty());
        assert_eq!(booking().into_partial().into_required().required_keys().len(), 3);
    }

    #[test]
    fn union_requires_intersection() {
        let union = SchemaShape::Union {
            variants: vec![
                booking(),
                SchemaShape::object(vec![FieldShape::required(
                    "sessionId",
                    SchemaShape::string(),
                )]),
            ],
        };
        assert_eq!(union.required_keys(), vec!["sessionId"]);
    }

    #[test]
    fn extend_replaces_existing() {
        let extended = booking().extended(vec![FieldShape::optional("clientId", SchemaShape::string())]);
        assert_eq!(extended.required_keys(), vec!["sessionId"]);
    }

    #[test]
    fn pick_and_omit() {
        let names = vec!["note".to_string()];
        assert_eq!(booking().filtered(&names, false).required_keys().len(), 2);
        match booking().filtered(&names, true) {
            SchemaShape::Object { fields } => assert_eq!(fields.len(), 1),
            other => panic!("expected object, got {other:?}"),
        }
    }
}
