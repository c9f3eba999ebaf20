//! Schema-combinator reduction
//!
//! Reduces validation-schema expressions to [`SchemaShape`]. Three dialects
//! are recognized:
//!
//! - zod chains (`z.object({...}).partial()`, `z.string().uuid().optional()`)
//! - TypeBox constructors (`Type.Object({...})`, `Type.Optional(...)`)
//! - JSON-schema object literals (`{ type: 'object', properties, required }`)
//!
//! Anything else reduces to [`SchemaShape::Unknown`].

use crate::ir::Expr;
use crate::resolve::Resolver;
use parity_model::{FieldShape, NumberShape, SchemaShape, StringFormat, StringShape};
use serde_json::Value;

const MAX_REDUCE_DEPTH: usize = 48;

/// Shape plus whether the value may be omitted
#[derive(Debug, Clone, PartialEq)]
pub struct Reduced {
    pub shape: SchemaShape,
    pub optional: bool,
}

impl Reduced {
    fn required(shape: SchemaShape) -> Self {
        Self {
            shape,
            optional: false,
        }
    }

    fn unknown() -> Self {
        Self::required(SchemaShape::Unknown)
    }

    fn map(self, f: impl FnOnce(SchemaShape) -> SchemaShape) -> Self {
        Self {
            shape: f(self.shape),
            optional: self.optional,
        }
    }
}

/// Reduces schema expressions through a resolver
#[derive(Debug, Clone, Copy)]
pub struct SchemaReducer<'a> {
    resolver: Resolver<'a>,
}

impl<'a> SchemaReducer<'a> {
    /// Reducer resolving identifiers through `resolver`
    #[must_use]
    pub fn new(resolver: Resolver<'a>) -> Self {
        Self { resolver }
    }

    /// Reduce to a shape
    #[must_use]
    pub fn reduce(&self, expr: &Expr) -> SchemaShape {
        self.reduce_at(expr, 0).shape
    }

    /// Reduce keeping the optional marker
    #[must_use]
    pub fn reduce_field(&self, expr: &Expr) -> Reduced {
        self.reduce_at(expr, 0)
    }

    /// True when `expr` looks like a schema in any known dialect
    #[must_use]
    pub fn is_schema(&self, expr: &Expr) -> bool {
        !matches!(self.reduce(expr), SchemaShape::Unknown)
    }

    fn reduce_at(&self, expr: &Expr, depth: usize) -> Reduced {
        if depth > MAX_REDUCE_DEPTH {
            return Reduced::unknown();
        }
        let next = depth + 1;
        let expr = self.resolver.resolve(expr);
        match &expr {
            Expr::Call { callee, args } => match callee.as_ref() {
                Expr::Member { object, property } if is_zod_namespace(object) => {
                    self.zod_constructor(property, args, next)
                }
                Expr::Member { object, property } if is_typebox_namespace(object) => {
                    self.typebox_constructor(property, args, next)
                }
                Expr::Member { object, property } => {
                    let base = self.reduce_at(object, next);
                    self.zod_modifier(base, property, args, next)
                }
                _ => Reduced::unknown(),
            },
            // `Schema.shape` and `Schema.shape.field`
            Expr::Member { object, property } if property == "shape" => self.reduce_at(object, next),
            Expr::Member { object, property } => match object.as_ref() {
                Expr::Member {
                    object: inner,
                    property: shape,
                } if shape == "shape" => match self.reduce_at(inner, next).shape {
                    SchemaShape::Object { fields } => fields
                        .into_iter()
                        .find(|f| f.name == *property)
                        .map_or_else(Reduced::unknown, |f| Reduced {
                            shape: f.shape,
                            optional: f.optional,
                        }),
                    _ => Reduced::unknown(),
                },
                _ => Reduced::unknown(),
            },
            Expr::Object(_) => self.json_schema(&expr, next),
            _ => Reduced::unknown(),
        }
    }

    fn object_fields(&self, expr: &Expr, depth: usize) -> Vec<FieldShape> {
        let Some(props) = self.resolver.flatten_object(expr) else {
            // `.extend(Other.shape)` passes a shape reference
            return match self.reduce_at(expr, depth).shape {
                SchemaShape::Object { fields } => fields,
                _ => Vec::new(),
            };
        };
        props
            .into_iter()
            .map(|(name, value)| {
                let reduced = self.reduce_at(&value, depth);
                FieldShape {
                    name,
                    shape: reduced.shape,
                    optional: reduced.optional,
                }
            })
            .collect()
    }

    fn list(&self, expr: Option<&Expr>, depth: usize) -> Vec<SchemaShape> {
        match expr.map(|e| self.resolver.resolve(e)) {
            Some(Expr::Array(items)) => items.iter().map(|i| self.reduce_at(i, depth).shape).collect(),
            _ => Vec::new(),
        }
    }

    fn zod_constructor(&self, name: &str, args: &[Expr], depth: usize) -> Reduced {
        let first = args.first();
        let shape = match name {
            "object" | "strictObject" | "looseObject" => {
                SchemaShape::object(first.map(|a| self.object_fields(a, depth)).unwrap_or_default())
            }
            "string" => SchemaShape::string(),
            "number" | "bigint" => SchemaShape::number(),
            "int" => SchemaShape::Number(NumberShape {
                integer: true,
                ..NumberShape::default()
            }),
            "boolean" => SchemaShape::Boolean,
            "date" | "datetime" => SchemaShape::formatted(StringFormat::DateTime),
            "email" => SchemaShape::formatted(StringFormat::Email),
            "uuid" | "guid" => SchemaShape::formatted(StringFormat::Uuid),
            "url" => SchemaShape::formatted(StringFormat::Url),
            "e164" => SchemaShape::formatted(StringFormat::Phone),
            "literal" => first
                .map(|a| self.resolver.resolve(a))
                .and_then(|a| literal_value(&a))
                .map_or(SchemaShape::Unknown, |value| SchemaShape::Literal { value }),
            "enum" => self.enum_shape(first),
            "nativeEnum" => SchemaShape::string(),
            "array" => SchemaShape::Array {
                item: Box::new(first.map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape)),
            },
            "tuple" => SchemaShape::Tuple {
                items: self.list(first, depth),
            },
            "union" => SchemaShape::Union {
                variants: self.list(first, depth),
            },
            "discriminatedUnion" => SchemaShape::Union {
                variants: self.list(args.get(1), depth),
            },
            "intersection" => {
                let left = first.map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape);
                let right = args
                    .get(1)
                    .map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape);
                merge_objects(left, right)
            }
            "record" | "map" => SchemaShape::object(Vec::new()),
            "null" => SchemaShape::Null,
            "undefined" | "void" => {
                return Reduced {
                    shape: SchemaShape::Null,
                    optional: true,
                }
            }
            "optional" | "nullish" => {
                return Reduced {
                    shape: first.map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape),
                    optional: true,
                }
            }
            "nullable" => return first.map_or_else(Reduced::unknown, |a| self.reduce_at(a, depth)),
            "preprocess" => {
                return args
                    .get(1)
                    .map_or_else(Reduced::unknown, |a| self.reduce_at(a, depth))
            }
            _ => SchemaShape::Unknown,
        };
        Reduced::required(shape)
    }

    fn enum_shape(&self, arg: Option<&Expr>) -> SchemaShape {
        match arg.map(|a| self.resolver.resolve(a)) {
            Some(Expr::Array(items)) => {
                let variants: Vec<_> = items
                    .iter()
                    .filter_map(|i| self.resolver.resolve_str(i))
                    .map(|s| SchemaShape::Literal {
                        value: Value::String(s),
                    })
                    .collect();
                if variants.is_empty() {
                    SchemaShape::string()
                } else {
                    SchemaShape::Union { variants }
                }
            }
            _ => SchemaShape::string(),
        }
    }

    fn zod_modifier(&self, base: Reduced, name: &str, args: &[Expr], depth: usize) -> Reduced {
        let number_arg = args
            .first()
            .and_then(|a| self.resolver.resolve(a).as_num());
        match name {
            "optional" | "nullish" | "default" | "catch" | "prefault" => Reduced {
                shape: base.shape,
                optional: true,
            },
            "uuid" | "guid" => base.map(|s| with_format(s, StringFormat::Uuid)),
            "email" => base.map(|s| with_format(s, StringFormat::Email)),
            "url" => base.map(|s| with_format(s, StringFormat::Url)),
            "datetime" => base.map(|s| with_format(s, StringFormat::DateTime)),
            "date" => base.map(|s| with_format(s, StringFormat::Date)),
            "min" | "gte" | "nonempty" | "length" | "max" | "lte" | "gt" | "lt" | "positive"
            | "nonnegative" | "negative" | "nonpositive" | "int" => {
                base.map(|s| with_bound(s, name, number_arg))
            }
            "partial" | "deepPartial" => {
                let names = args.first().map(|a| self.mask_names(a));
                base.map(|s| match names {
                    Some(names) if !names.is_empty() => set_optional(s, &names, true),
                    _ => s.into_partial(),
                })
            }
            "required" => {
                let names = args.first().map(|a| self.mask_names(a));
                base.map(|s| match names {
                    Some(names) if !names.is_empty() => set_optional(s, &names, false),
                    _ => s.into_required(),
                })
            }
            "extend" | "safeExtend" => {
                let extra = args
                    .first()
                    .map(|a| self.object_fields(a, depth))
                    .unwrap_or_default();
                base.map(|s| s.extended(extra))
            }
            "merge" | "and" => {
                let other = args
                    .first()
                    .map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape);
                base.map(|s| merge_objects(s, other))
            }
            "pick" | "omit" => {
                let names = args.first().map(|a| self.mask_names(a)).unwrap_or_default();
                let keep = name == "pick";
                base.map(|s| s.filtered(&names, keep))
            }
            "array" => base.map(|s| SchemaShape::Array { item: Box::new(s) }),
            "or" => {
                let other = args
                    .first()
                    .map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape);
                base.map(|s| SchemaShape::Union {
                    variants: vec![s, other],
                })
            }
            // refinements, transforms, pipes and metadata keep the input shape
            _ => base,
        }
    }

    /// Keys of a `{ a: true, b: true }` mask
    fn mask_names(&self, expr: &Expr) -> Vec<String> {
        self.resolver
            .flatten_object(expr)
            .unwrap_or_default()
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    fn typebox_constructor(&self, name: &str, args: &[Expr], depth: usize) -> Reduced {
        let first = args.first();
        let options = |idx: usize| {
            args.get(idx)
                .and_then(|a| self.resolver.flatten_object(a))
                .unwrap_or_default()
        };
        let shape = match name {
            "Object" => SchemaShape::object(first.map(|a| self.object_fields(a, depth)).unwrap_or_default()),
            "String" => self.json_string(&options(0)),
            "Number" | "Integer" => self.json_number(&options(0), name == "Integer"),
            "Boolean" => SchemaShape::Boolean,
            "Null" => SchemaShape::Null,
            "Array" => SchemaShape::Array {
                item: Box::new(first.map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape)),
            },
            "Tuple" => SchemaShape::Tuple {
                items: self.list(first, depth),
            },
            "Union" => SchemaShape::Union {
                variants: self.list(first, depth),
            },
            "Literal" => first
                .map(|a| self.resolver.resolve(a))
                .and_then(|a| literal_value(&a))
                .map_or(SchemaShape::Unknown, |value| SchemaShape::Literal { value }),
            "Partial" => first.map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape.into_partial()),
            "Required" => first.map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape.into_required()),
            "Optional" => {
                return Reduced {
                    shape: first.map_or(SchemaShape::Unknown, |a| self.reduce_at(a, depth).shape),
                    optional: true,
                }
            }
            "Record" => SchemaShape::object(Vec::new()),
            _ => SchemaShape::Unknown,
        };
        Reduced::required(shape)
    }

    fn json_schema(&self, expr: &Expr, depth: usize) -> Reduced {
        let Some(props) = self.resolver.flatten_object(expr) else {
            return Reduced::unknown();
        };
        let get = |key: &str| {
            props
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| self.resolver.resolve(v))
        };
        let type_name = match get("type") {
            Some(Expr::Str(t)) => Some(t),
            Some(Expr::Array(items)) => items
                .iter()
                .filter_map(Expr::as_str)
                .find(|t| *t != "null")
                .map(str::to_string),
            _ => None,
        };
        if let Some(Expr::Array(values)) = get("enum") {
            let variants = values
                .iter()
                .filter_map(literal_value)
                .map(|value| SchemaShape::Literal { value })
                .collect();
            return Reduced::required(SchemaShape::Union { variants });
        }
        if let Some(value) = get("const").as_ref().and_then(literal_value) {
            return Reduced::required(SchemaShape::Literal { value });
        }
        for key in ["oneOf", "anyOf"] {
            if let Some(list) = get(key) {
                return Reduced::required(SchemaShape::Union {
                    variants: self.list(Some(&list), depth),
                });
            }
        }
        let shape = match type_name.as_deref() {
            Some("object") | None if get("properties").is_some() => {
                let required: Vec<String> = match get("required") {
                    Some(Expr::Array(items)) => items.iter().filter_map(|i| self.resolver.resolve_str(i)).collect(),
                    _ => Vec::new(),
                };
                let fields = get("properties")
                    .and_then(|p| self.resolver.flatten_object(&p))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(name, value)| {
                        let shape = self.reduce_at(&value, depth).shape;
                        let optional = !required.contains(&name);
                        FieldShape {
                            name,
                            shape,
                            optional,
                        }
                    })
                    .collect();
                SchemaShape::object(fields)
            }
            Some("object") => SchemaShape::object(Vec::new()),
            Some("string") => self.json_string(&props),
            Some("integer") => self.json_number(&props, true),
            Some("number") => self.json_number(&props, false),
            Some("boolean") => SchemaShape::Boolean,
            Some("null") => SchemaShape::Null,
            Some("array") => SchemaShape::Array {
                item: Box::new(get("items").map_or(SchemaShape::Unknown, |i| self.reduce_at(&i, depth).shape)),
            },
            _ => SchemaShape::Unknown,
        };
        Reduced::required(shape)
    }

    fn json_string(&self, props: &[(String, Expr)]) -> SchemaShape {
        let get_num = |key: &str| {
            props
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| self.resolver.resolve(v).as_num())
        };
        let format = props
            .iter()
            .find(|(k, _)| k == "format")
            .and_then(|(_, v)| self.resolver.resolve_str(v))
            .and_then(|f| match f.as_str() {
                "uuid" => Some(StringFormat::Uuid),
                "email" => Some(StringFormat::Email),
                "date-time" => Some(StringFormat::DateTime),
                "date" => Some(StringFormat::Date),
                "uri" | "url" => Some(StringFormat::Url),
                _ => None,
            });
        SchemaShape::String(StringShape {
            format,
            min_len: get_num("minLength").map(to_len),
            max_len: get_num("maxLength").map(to_len),
        })
    }

    fn json_number(&self, props: &[(String, Expr)], integer: bool) -> SchemaShape {
        let get_num = |key: &str| {
            props
                .iter()
                .find(|(k, _)| k == key)
                .and_then(|(_, v)| self.resolver.resolve(v).as_num())
        };
        SchemaShape::Number(NumberShape {
            min: get_num("minimum").or_else(|| get_num("exclusiveMinimum").map(|n| n + 1.0)),
            max: get_num("maximum").or_else(|| get_num("exclusiveMaximum").map(|n| n - 1.0)),
            integer,
        })
    }
}

fn is_zod_namespace(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(name) => name == "z" || name == "zod",
        // z.coerce.number(), z.iso.datetime()
        Expr::Member { object, property } => {
            matches!(property.as_str(), "coerce" | "iso" | "string_format") && is_zod_namespace(object)
        }
        _ => false,
    }
}

fn is_typebox_namespace(expr: &Expr) -> bool {
    matches!(expr, Expr::Ident(name) if name == "Type" || name == "T")
}

fn literal_value(expr: &Expr) -> Option<Value> {
    match expr {
        Expr::Str(s) => Some(Value::String(s.clone())),
        Expr::Num(n) => serde_json::Number::from_f64(*n).map(|num| {
            if n.fract() == 0.0 && n.abs() < 9.0e15 {
                #[allow(clippy::cast_possible_truncation)]
                let int = *n as i64;
                Value::from(int)
            } else {
                Value::Number(num)
            }
        }),
        Expr::Bool(b) => Some(Value::Bool(*b)),
        Expr::Null => Some(Value::Null),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_len(n: f64) -> usize {
    n.max(0.0) as usize
}

fn with_format(shape: SchemaShape, format: StringFormat) -> SchemaShape {
    match shape {
        SchemaShape::String(s) => SchemaShape::String(StringShape {
            format: Some(format),
            ..s
        }),
        SchemaShape::Unknown => SchemaShape::formatted(format),
        other => other,
    }
}

fn with_bound(shape: SchemaShape, name: &str, arg: Option<f64>) -> SchemaShape {
    match shape {
        SchemaShape::String(mut s) => {
            match (name, arg) {
                ("min" | "gte", Some(n)) => s.min_len = Some(to_len(n)),
                ("max" | "lte", Some(n)) => s.max_len = Some(to_len(n)),
                ("length", Some(n)) => {
                    s.min_len = Some(to_len(n));
                    s.max_len = Some(to_len(n));
                }
                ("nonempty", _) => s.min_len = Some(s.min_len.unwrap_or(0).max(1)),
                _ => {}
            }
            SchemaShape::String(s)
        }
        SchemaShape::Number(mut n) => {
            match (name, arg) {
                ("min" | "gte", Some(v)) => n.min = Some(v),
                ("gt", Some(v)) => n.min = Some(v + 1.0),
                ("max" | "lte", Some(v)) => n.max = Some(v),
                ("lt", Some(v)) => n.max = Some(v - 1.0),
                ("positive", _) => n.min = Some(1.0),
                ("nonnegative", _) => n.min = Some(0.0),
                ("negative", _) => n.max = Some(-1.0),
                ("nonpositive", _) => n.max = Some(0.0),
                ("int", _) => n.integer = true,
                _ => {}
            }
            SchemaShape::Number(n)
        }
        other => other,
    }
}

fn set_optional(shape: SchemaShape, names: &[String], optional: bool) -> SchemaShape {
    match shape {
        SchemaShape::Object { fields } => SchemaShape::Object {
            fields: fields
                .into_iter()
                .map(|f| {
                    if names.contains(&f.name) {
                        FieldShape { optional, ..f }
                    } else {
                        f
                    }
                })
                .collect(),
        },
        other => other,
    }
}

fn merge_objects(left: SchemaShape, right: SchemaShape) -> SchemaShape {
    match right {
        SchemaShape::Object { fields } => left.extended(fields),
        _ => left,
    }
}
