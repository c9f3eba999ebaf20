//! Owned expression IR
//!
//! Tree-sitter nodes borrow the source and the tree, which makes them awkward
//! to keep around across files. Everything the extractor needs is lowered
//! into [`Expr`] once, then resolved and reduced without touching the syntax
//! tree again.
//!
//! Lowering is lossy on purpose: any construct that cannot contribute a path,
//! a schema or an auth marker becomes [`Expr::Other`].

use tree_sitter::Node;

/// Nesting guard for pathological sources
const MAX_LOWER_DEPTH: usize = 256;

/// Lowered expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    /// `object.property` or `object['property']`
    Member {
        object: Box<Expr>,
        property: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Object(Vec<Prop>),
    Array(Vec<Expr>),
    /// Template literal or string concatenation, resolved lazily
    Concat(Vec<Expr>),
    /// Function value with every call found anywhere in its body
    Function {
        name: Option<String>,
        calls: Vec<Expr>,
    },
    Other,
}

/// Object literal member
#[derive(Debug, Clone, PartialEq)]
pub enum Prop {
    KeyValue(String, Expr),
    Spread(Expr),
}

impl Expr {
    /// Identifier helper
    #[must_use]
    pub fn ident(name: &str) -> Self {
        Self::Ident(name.to_string())
    }

    /// String literal content
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric literal
    #[inline]
    #[must_use]
    pub fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Own (non-spread) property of an object literal; later keys win
    #[must_use]
    pub fn own_property(&self, key: &str) -> Option<&Expr> {
        let Self::Object(props) = self else {
            return None;
        };
        props.iter().rev().find_map(|p| match p {
            Prop::KeyValue(k, v) if k == key => Some(v),
            _ => None,
        })
    }

    /// Name a callee or middleware is known by: the identifier, or the last
    /// property of a member chain
    #[must_use]
    pub fn callee_name(&self) -> Option<&str> {
        match self {
            Self::Ident(name) => Some(name),
            Self::Member { property, .. } => Some(property),
            Self::Call { callee, .. } => callee.callee_name(),
            _ => None,
        }
    }

    /// True for `Function`
    #[inline]
    #[must_use]
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function { .. })
    }
}

/// How far function bodies are scanned while lowering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyScan {
    /// Collect calls inside function bodies
    Calls,
    /// Leave function bodies empty
    Skip,
}

/// Lowers tree-sitter nodes of one source file
#[derive(Debug, Clone, Copy)]
pub struct Lowering<'s> {
    src: &'s [u8],
}

impl<'s> Lowering<'s> {
    /// Lowering over `src`
    #[must_use]
    pub fn new(src: &'s str) -> Self {
        Self {
            src: src.as_bytes(),
        }
    }

    /// Raw source text of a node
    #[must_use]
    pub fn text(&self, node: Node<'_>) -> &'s str {
        node.utf8_text(self.src).unwrap_or_default()
    }

    /// Lower an expression node, scanning function bodies one level deep
    #[must_use]
    pub fn lower(&self, node: Node<'_>) -> Expr {
        self.lower_at(node, BodyScan::Calls, 0)
    }

    fn lower_at(&self, node: Node<'_>, scan: BodyScan, depth: usize) -> Expr {
        if depth > MAX_LOWER_DEPTH {
            return Expr::Other;
        }
        let next = depth + 1;
        match node.kind() {
            "string" => Expr::Str(unquote(self.text(node))),
            "template_string" => self.lower_template(node, scan, next),
            "number" => parse_number(self.text(node)).map_or(Expr::Other, Expr::Num),
            "true" => Expr::Bool(true),
            "false" => Expr::Bool(false),
            "null" => Expr::Null,
            "undefined" => Expr::Undefined,
            "identifier" | "property_identifier" | "shorthand_property_identifier" | "this" => {
                Expr::Ident(self.text(node).to_string())
            }
            "member_expression" => {
                let object = node
                    .child_by_field_name("object")
                    .map_or(Expr::Other, |n| self.lower_at(n, scan, next));
                let property = node
                    .child_by_field_name("property")
                    .map(|n| self.text(n).to_string())
                    .unwrap_or_default();
                Expr::Member {
                    object: Box::new(object),
                    property,
                }
            }
            "subscript_expression" => {
                let object = node
                    .child_by_field_name("object")
                    .map_or(Expr::Other, |n| self.lower_at(n, scan, next));
                let index = node
                    .child_by_field_name("index")
                    .map_or(Expr::Other, |n| self.lower_at(n, scan, next));
                match index {
                    Expr::Str(property) => Expr::Member {
                        object: Box::new(object),
                        property,
                    },
                    Expr::Num(n) => Expr::Member {
                        object: Box::new(object),
                        property: format_index(n),
                    },
                    _ => Expr::Other,
                }
            }
            "call_expression" | "new_expression" => {
                let callee_field = if node.kind() == "call_expression" {
                    "function"
                } else {
                    "constructor"
                };
                let Some(callee) = node.child_by_field_name(callee_field) else {
                    return Expr::Other;
                };
                let args = node
                    .child_by_field_name("arguments")
                    .map(|a| self.lower_children(a, scan, next))
                    .unwrap_or_default();
                Expr::Call {
                    callee: Box::new(self.lower_at(callee, scan, next)),
                    args,
                }
            }
            "await_expression"
            | "parenthesized_expression"
            | "as_expression"
            | "satisfies_expression"
            | "non_null_expression" => {
                first_named(node).map_or(Expr::Other, |n| self.lower_at(n, scan, next))
            }
            "type_assertion" => {
                last_named(node).map_or(Expr::Other, |n| self.lower_at(n, scan, next))
            }
            "unary_expression" => {
                let op = node
                    .child_by_field_name("operator")
                    .map(|n| self.text(n))
                    .unwrap_or_default();
                let arg = node
                    .child_by_field_name("argument")
                    .map_or(Expr::Other, |n| self.lower_at(n, scan, next));
                match (op, arg) {
                    ("-", Expr::Num(n)) => Expr::Num(-n),
                    ("+", Expr::Num(n)) => Expr::Num(n),
                    _ => Expr::Other,
                }
            }
            "binary_expression" => {
                let op = node
                    .child_by_field_name("operator")
                    .map(|n| self.text(n))
                    .unwrap_or_default();
                if op != "+" {
                    return Expr::Other;
                }
                let left = node
                    .child_by_field_name("left")
                    .map_or(Expr::Other, |n| self.lower_at(n, scan, next));
                let right = node
                    .child_by_field_name("right")
                    .map_or(Expr::Other, |n| self.lower_at(n, scan, next));
                Expr::Concat(vec![left, right])
            }
            "object" => self.lower_object(node, scan, next),
            "array" => Expr::Array(self.lower_children(node, scan, next)),
            "spread_element" => {
                first_named(node).map_or(Expr::Other, |n| self.lower_at(n, scan, next))
            }
            "arrow_function"
            | "function_expression"
            | "function"
            | "function_declaration"
            | "generator_function"
            | "generator_function_declaration"
            | "method_definition" => self.lower_function(node, scan),
            _ => Expr::Other,
        }
    }

    fn lower_children(&self, node: Node<'_>, scan: BodyScan, depth: usize) -> Vec<Expr> {
        let mut cursor = node.walk();
        let lowered = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() != "comment")
            .map(|c| self.lower_at(c, scan, depth))
            .collect();
        lowered
    }

    fn lower_object(&self, node: Node<'_>, scan: BodyScan, depth: usize) -> Expr {
        let mut props = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "pair" => {
                    let key = child
                        .child_by_field_name("key")
                        .and_then(|k| self.property_key(k, scan, depth));
                    let value = child
                        .child_by_field_name("value")
                        .map_or(Expr::Other, |v| self.lower_at(v, scan, depth));
                    if let Some(key) = key {
                        props.push(Prop::KeyValue(key, value));
                    }
                }
                "shorthand_property_identifier" => {
                    let name = self.text(child).to_string();
                    props.push(Prop::KeyValue(name.clone(), Expr::Ident(name)));
                }
                "spread_element" => {
                    if let Some(inner) = first_named(child) {
                        props.push(Prop::Spread(self.lower_at(inner, scan, depth)));
                    }
                }
                "method_definition" => {
                    if let Some(key) = child
                        .child_by_field_name("name")
                        .and_then(|k| self.property_key(k, scan, depth))
                    {
                        props.push(Prop::KeyValue(key, self.lower_function(child, scan)));
                    }
                }
                _ => {}
            }
        }
        Expr::Object(props)
    }

    fn property_key(&self, key: Node<'_>, scan: BodyScan, depth: usize) -> Option<String> {
        match key.kind() {
            "property_identifier" | "identifier" | "private_property_identifier" => {
                Some(self.text(key).to_string())
            }
            "string" => Some(unquote(self.text(key))),
            "number" => Some(self.text(key).to_string()),
            "computed_property_name" => match first_named(key).map(|n| self.lower_at(n, scan, depth)) {
                Some(Expr::Str(s)) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    fn lower_template(&self, node: Node<'_>, scan: BodyScan, depth: usize) -> Expr {
        let start = node.start_byte() + 1;
        let end = node.end_byte().saturating_sub(1).max(start);
        let mut parts = Vec::new();
        let mut pos = start;
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            if child.kind() != "template_substitution" {
                continue;
            }
            if child.start_byte() > pos {
                parts.push(Expr::Str(self.slice(pos, child.start_byte())));
            }
            parts.push(first_named(child).map_or(Expr::Other, |n| self.lower_at(n, scan, depth)));
            pos = child.end_byte();
        }
        if end > pos {
            parts.push(Expr::Str(self.slice(pos, end)));
        }
        match parts.as_slice() {
            [] => Expr::Str(String::new()),
            [Expr::Str(s)] => Expr::Str(s.clone()),
            _ => Expr::Concat(parts),
        }
    }

    fn slice(&self, from: usize, to: usize) -> String {
        self.src
            .get(from..to)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_default()
    }

    fn lower_function(&self, node: Node<'_>, scan: BodyScan) -> Expr {
        let name = node
            .child_by_field_name("name")
            .map(|n| self.text(n).to_string());
        let calls = match (scan, node.child_by_field_name("body")) {
            (BodyScan::Calls, Some(body)) => {
                let mut calls = Vec::new();
                self.collect_calls(body, &mut calls);
                calls
            }
            _ => Vec::new(),
        };
        Expr::Function { name, calls }
    }

    /// Every call expression under `node`, lowered without descending into
    /// nested function bodies
    fn collect_calls(&self, node: Node<'_>, out: &mut Vec<Expr>) {
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if current.kind() == "call_expression" {
                out.push(self.lower_at(current, BodyScan::Skip, 0));
            }
            let mut cursor = current.walk();
            // reversed so calls come out in source order
            let children: Vec<_> = current.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }
}

/// First named child that is not a comment
pub(crate) fn first_named(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .find(|c| c.kind() != "comment");
    found
}

/// Last named child that is not a comment
pub(crate) fn last_named(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .filter(|c| c.kind() != "comment")
        .last();
    found
}

/// Strip surrounding quotes and the common escapes
fn unquote(raw: &str) -> String {
    let inner = if raw.len() >= 2 {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };
    inner
        .replace("\\'", "'")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

fn parse_number(raw: &str) -> Option<f64> {
    let cleaned = raw.replace('_', "");
    if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        #[allow(clippy::cast_precision_loss)]
        return i64::from_str_radix(hex, 16).ok().map(|n| n as f64);
    }
    cleaned.trim_end_matches('n').parse().ok()
}

fn format_index(n: f64) -> String {
    if n.fract() == 0.0 && n >= 0.0 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}
