//! Identifier resolution
//!
//! Route options and schemas are often built through local variables or a
//! shared configuration map:
//!
//! ```text
//! const schemas = { create: z.object({...}) };
//! const opts = { schema: { body: schemas.create } };
//! fastify.post('/bookings', opts, handler);
//! ```
//!
//! [`Resolver`] follows identifier-to-initializer chains and property access
//! into object literals. Each chain is followed with its own "seen" set, so a
//! cycle (`const a = b; const b = a;`) resolves to [`Expr::Other`] instead
//! of looping.

use crate::ir::{Expr, Prop};
use std::collections::{HashMap, HashSet};

/// Hard limit on chain length, independent of cycle detection
const MAX_RESOLVE_DEPTH: usize = 32;

/// Name to initializer table
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    by_name: HashMap<String, Expr>,
}

impl Bindings {
    /// Empty table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`; the first binding of a name wins
    pub fn bind(&mut self, name: impl Into<String>, init: Expr) {
        self.by_name.entry(name.into()).or_insert(init);
    }

    /// Initializer of `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.by_name.get(name)
    }

    /// Merge another table; existing names are kept
    pub fn absorb(&mut self, other: &Self) {
        for (name, init) in &other.by_name {
            self.by_name
                .entry(name.clone())
                .or_insert_with(|| init.clone());
        }
    }

    /// Number of names
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// True when empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

/// Resolves expressions against a file scope, then the global scope
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    local: &'a Bindings,
    global: &'a Bindings,
}

impl<'a> Resolver<'a> {
    /// Resolver over two scopes
    #[must_use]
    pub fn new(local: &'a Bindings, global: &'a Bindings) -> Self {
        Self { local, global }
    }

    /// Follow identifiers and property access until a non-reference value
    ///
    /// Unresolvable references are returned as-is (`z`, `fastify`, ...).
    #[must_use]
    pub fn resolve(&self, expr: &Expr) -> Expr {
        let mut seen = HashSet::new();
        self.resolve_inner(expr, &mut seen, 0)
    }

    /// Resolve to a string, concatenating template parts
    #[must_use]
    pub fn resolve_str(&self, expr: &Expr) -> Option<String> {
        match self.resolve(expr) {
            Expr::Str(s) => Some(s),
            _ => None,
        }
    }

    fn lookup(&self, name: &str) -> Option<&'a Expr> {
        self.local.get(name).or_else(|| self.global.get(name))
    }

    fn resolve_inner(&self, expr: &Expr, seen: &mut HashSet<String>, depth: usize) -> Expr {
        if depth > MAX_RESOLVE_DEPTH {
            return Expr::Other;
        }
        match expr {
            Expr::Ident(name) => {
                let Some(init) = self.lookup(name) else {
                    return expr.clone();
                };
                if !seen.insert(name.clone()) {
                    return Expr::Other;
                }
                self.resolve_inner(init, seen, depth + 1)
            }
            Expr::Member { object, property } => {
                let base = self.resolve_inner(object, seen, depth + 1);
                match self.property_of(&base, property, seen, depth + 1) {
                    Some(value) => self.resolve_inner(&value, seen, depth + 1),
                    None => Expr::Member {
                        object: Box::new(base),
                        property: property.clone(),
                    },
                }
            }
            Expr::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    match self.resolve_inner(part, seen, depth + 1) {
                        Expr::Str(s) => out.push_str(&s),
                        Expr::Num(n) => out.push_str(&n.to_string()),
                        _ => return Expr::Other,
                    }
                }
                Expr::Str(out)
            }
            other => other.clone(),
        }
    }

    /// Property `key` of a resolved object or array, following spreads
    fn property_of(
        &self,
        base: &Expr,
        key: &str,
        seen: &mut HashSet<String>,
        depth: usize,
    ) -> Option<Expr> {
        if depth > MAX_RESOLVE_DEPTH {
            return None;
        }
        match base {
            Expr::Object(props) => {
                for prop in props.iter().rev() {
                    match prop {
                        Prop::KeyValue(k, v) if k == key => return Some(v.clone()),
                        Prop::Spread(inner) => {
                            let spread = self.resolve_inner(inner, seen, depth + 1);
                            if let Some(found) = self.property_of(&spread, key, seen, depth + 1) {
                                return Some(found);
                            }
                        }
                        Prop::KeyValue(..) => {}
                    }
                }
                None
            }
            Expr::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            _ => None,
        }
    }

    /// Resolved object literal with spreads flattened, later keys winning
    #[must_use]
    pub fn flatten_object(&self, expr: &Expr) -> Option<Vec<(String, Expr)>> {
        let mut seen = HashSet::new();
        self.flatten_inner(expr, &mut seen, 0)
    }

    fn flatten_inner(
        &self,
        expr: &Expr,
        seen: &mut HashSet<String>,
        depth: usize,
    ) -> Option<Vec<(String, Expr)>> {
        if depth > MAX_RESOLVE_DEPTH {
            return None;
        }
        let Expr::Object(props) = self.resolve_inner(expr, seen, depth + 1) else {
            return None;
        };
        let mut out: Vec<(String, Expr)> = Vec::new();
        for prop in props {
            match prop {
                Prop::KeyValue(k, v) => upsert(&mut out, k, v),
                Prop::Spread(inner) => {
                    for (k, v) in self.flatten_inner(&inner, seen, depth + 1).unwrap_or_default() {
                        upsert(&mut out, k, v);
                    }
                }
            }
        }
        Some(out)
    }
}

fn upsert(out: &mut Vec<(String, Expr)>, key: String, value: Expr) {
    if let Some(slot) = out.iter_mut().find(|(k, _)| *k == key) {
        slot.1 = value;
    } else {
        out.push((key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn member(object: Expr, property: &str) -> Expr {
        Expr::Member {
            object: Box::new(object),
            property: property.to_string(),
        }
    }

    #[test]
    fn follows_identifier_chain() {
        let mut local = Bindings::new();
        local.bind("a", Expr::ident("b"));
        local.bind("b", Expr::Str("/clients".into()));
        let global = Bindings::new();
        let r = Resolver::new(&local, &global);
        assert_eq!(r.resolve_str(&Expr::ident("a")), Some("/clients".into()));
    }

    #[test]
    fn cycle_resolves_to_other() {
        let mut local = Bindings::new();
        local.bind("a", Expr::ident("b"));
        local.bind("b", Expr::ident("a"));
        let global = Bindings::new();
        let r = Resolver::new(&local, &global);
        assert_eq!(r.resolve(&Expr::ident("a")), Expr::Other);
    }

    #[test]
    fn property_access_into_config_map() {
        let mut global = Bindings::new();
        global.bind(
            "paths",
            Expr::Object(vec![Prop::KeyValue(
                "bookings".into(),
                Expr::Object(vec![Prop::KeyValue("list".into(), Expr::Str("/bookings".into()))]),
            )]),
        );
        let local = Bindings::new();
        let r = Resolver::new(&local, &global);
        let expr = member(member(Expr::ident("paths"), "bookings"), "list");
        assert_eq!(r.resolve_str(&expr), Some("/bookings".into()));
    }

    #[test]
    fn spread_properties_are_searched() {
        let mut local = Bindings::new();
        local.bind(
            "base",
            Expr::Object(vec![Prop::KeyValue("prefix".into(), Expr::Str("/api".into()))]),
        );
        local.bind(
            "cfg",
            Expr::Object(vec![
                Prop::Spread(Expr::ident("base")),
                Prop::KeyValue("x".into(), Expr::Num(1.0)),
            ]),
        );
        let global = Bindings::new();
        let r = Resolver::new(&local, &global);
        assert_eq!(
            r.resolve_str(&member(Expr::ident("cfg"), "prefix")),
            Some("/api".into())
        );
        let flat = r.flatten_object(&Expr::ident("cfg")).unwrap();
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn local_scope_shadows_global() {
        let mut local = Bindings::new();
        local.bind("p", Expr::Str("/local".into()));
        let mut global = Bindings::new();
        global.bind("p", Expr::Str("/global".into()));
        let r = Resolver::new(&local, &global);
        assert_eq!(r.resolve_str(&Expr::ident("p")), Some("/local".into()));
    }

    #[test]
    fn concat_resolves_parts() {
        let mut local = Bindings::new();
        local.bind("BASE", Expr::Str("/api".into()));
        let global = Bindings::new();
        let r = Resolver::new(&local, &global);
        let expr = Expr::Concat(vec![Expr::ident("BASE"), Expr::Str("/items".into())]);
        assert_eq!(r.resolve_str(&expr), Some("/api/items".into()));
        let unresolved = Expr::Concat(vec![Expr::ident("nope"), Expr::Str("/x".into())]);
        assert_eq!(r.resolve_str(&unresolved), None);
    }
}
