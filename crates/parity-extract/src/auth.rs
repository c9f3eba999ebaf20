//! Auth classification from middleware names
//!
//! A route's guards show up as identifiers (`requireOwner`), member
//! properties (`fastify.authenticate`), calls (`requireRole('client')`) or
//! config values (`config: { auth: 'owner' }`). Each guard is one *unit*;
//! a unit counts as auth evidence when one of its names carries a marker,
//! and the role words found anywhere in the unit decide who it admits.

use crate::ir::{Expr, Prop};
use crate::resolve::Resolver;
use parity_model::AuthClassification;

/// Substrings that mark a name as an auth guard
const MARKERS: &[&str] = &[
    "auth", "require", "role", "guard", "only", "verify", "protect", "session", "token",
    "ensure", "logged", "jwt", "permission",
];

/// Role words and who they admit, checked in order
const ROLES: &[(&str, AuthClassification)] = &[
    ("owner", AuthClassification::Owner),
    ("admin", AuthClassification::Owner),
    ("trainer", AuthClassification::Owner),
    ("staff", AuthClassification::Owner),
    ("coach", AuthClassification::Owner),
    ("client", AuthClassification::Dependent),
    ("customer", AuthClassification::Dependent),
    ("member", AuthClassification::Dependent),
    ("dependent", AuthClassification::Dependent),
];

/// Values of `config.auth` meaning "no auth"
const PUBLIC_VALUES: &[&str] = &["public", "none", "anonymous", "optional"];

/// Name-based auth classifier
#[derive(Debug, Clone, Copy)]
pub struct AuthRules<'a> {
    resolver: Resolver<'a>,
}

impl<'a> AuthRules<'a> {
    /// Rules resolving identifiers through `resolver`
    #[must_use]
    pub fn new(resolver: Resolver<'a>) -> Self {
        Self { resolver }
    }

    /// Classify one guard unit; `None` when it carries no auth evidence
    #[must_use]
    pub fn classify_unit(&self, unit: &Expr) -> Option<AuthClassification> {
        let mut names = Vec::new();
        self.collect_names(unit, &mut names, 0);
        let is_guard = names.iter().any(|n| {
            let lower = n.to_ascii_lowercase();
            MARKERS.iter().any(|m| lower.contains(m))
        });
        if !is_guard {
            return None;
        }
        Some(roles_in(&names).unwrap_or(AuthClassification::Either))
    }

    /// Classify a list of stacked units; each guard narrows the route
    #[must_use]
    pub fn classify_units<'e>(&self, units: impl IntoIterator<Item = &'e Expr>) -> AuthClassification {
        units
            .into_iter()
            .filter_map(|u| self.classify_unit(u))
            .fold(AuthClassification::Public, AuthClassification::restrict)
    }

    /// Classify a `config.auth`-style value
    #[must_use]
    pub fn classify_config_value(&self, value: &Expr) -> AuthClassification {
        match self.resolver.resolve(value) {
            Expr::Bool(true) => AuthClassification::Either,
            Expr::Str(s) if PUBLIC_VALUES.contains(&s.to_ascii_lowercase().as_str()) => {
                AuthClassification::Public
            }
            Expr::Str(s) => roles_in(&[s]).unwrap_or(AuthClassification::Either),
            Expr::Array(items) => {
                let names: Vec<String> = items
                    .iter()
                    .filter_map(|i| self.resolver.resolve_str(i))
                    .collect();
                if names.is_empty() {
                    AuthClassification::Public
                } else {
                    roles_in(&names).unwrap_or(AuthClassification::Either)
                }
            }
            _ => AuthClassification::Public,
        }
    }

    fn collect_names(&self, expr: &Expr, out: &mut Vec<String>, depth: usize) {
        if depth > 8 {
            return;
        }
        match expr {
            Expr::Ident(name) => {
                out.push(name.clone());
                // `const ownerOnly = requireRole('owner')`
                let resolved = self.resolver.resolve(expr);
                if resolved != *expr {
                    self.collect_names(&resolved, out, depth + 1);
                }
            }
            Expr::Str(s) => out.push(s.clone()),
            Expr::Member { object, property } => {
                out.push(property.clone());
                self.collect_names(object, out, depth + 1);
            }
            // module specifiers are not guard names
            Expr::Call { callee, .. }
                if matches!(callee.as_ref(), Expr::Ident(n) if n == "require" || n == "import") => {}
            Expr::Call { callee, args } => {
                self.collect_names(callee, out, depth + 1);
                for arg in args {
                    self.collect_names(arg, out, depth + 1);
                }
            }
            Expr::Array(items) => {
                for item in items {
                    self.collect_names(item, out, depth + 1);
                }
            }
            Expr::Object(props) => {
                for prop in props {
                    match prop {
                        Prop::KeyValue(_, v) | Prop::Spread(v) => self.collect_names(v, out, depth + 1),
                    }
                }
            }
            Expr::Function { name: Some(name), .. } => out.push(name.clone()),
            _ => {}
        }
    }
}

/// Merge of every role word found in `names`
fn roles_in(names: &[String]) -> Option<AuthClassification> {
    let mut found: Option<AuthClassification> = None;
    for name in names {
        let lower = name.to_ascii_lowercase();
        for (word, class) in ROLES {
            if lower.contains(word) {
                found = Some(found.map_or(*class, |f| f.merge(*class)));
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::Bindings;

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: Box::new(Expr::ident(name)),
            args,
        }
    }

    fn with_rules<T>(f: impl FnOnce(AuthRules<'_>) -> T) -> T {
        let mut local = Bindings::new();
        local.bind("ownerOnly", call("requireRole", vec![Expr::Str("owner".into())]));
        let global = Bindings::new();
        f(AuthRules::new(Resolver::new(&local, &global)))
    }

    #[test]
    fn plain_authenticate_admits_either() {
        with_rules(|rules| {
            let unit = Expr::Member {
                object: Box::new(Expr::ident("fastify")),
                property: "authenticate".into(),
            };
            assert_eq!(rules.classify_unit(&unit), Some(AuthClassification::Either));
        });
    }

    #[test]
    fn role_words_decide() {
        with_rules(|rules| {
            assert_eq!(
                rules.classify_unit(&Expr::ident("requireOwner")),
                Some(AuthClassification::Owner)
            );
            assert_eq!(
                rules.classify_unit(&call("requireRole", vec![Expr::Str("client".into())])),
                Some(AuthClassification::Dependent)
            );
            assert_eq!(
                rules.classify_unit(&call(
                    "requireRole",
                    vec![Expr::Str("owner".into()), Expr::Str("client".into())]
                )),
                Some(AuthClassification::Either)
            );
        });
    }

    #[test]
    fn resolved_middleware_is_classified() {
        with_rules(|rules| {
            assert_eq!(
                rules.classify_unit(&Expr::ident("ownerOnly")),
                Some(AuthClassification::Owner)
            );
        });
    }

    #[test]
    fn non_guards_are_ignored() {
        with_rules(|rules| {
            assert_eq!(rules.classify_unit(&Expr::ident("rateLimit")), None);
            assert_eq!(
                rules.classify_units([&Expr::ident("rateLimit"), &Expr::ident("logRequest")]),
                AuthClassification::Public
            );
            assert_eq!(
                rules.classify_units([&Expr::ident("authenticate"), &Expr::ident("requireOwner")]),
                AuthClassification::Owner
            );
        });
    }

    #[test]
    fn require_calls_are_not_evidence() {
        with_rules(|rules| {
            let unit = Expr::Member {
                object: Box::new(call("require", vec![Expr::Str("./controllers".into())])),
                property: "getClient".into(),
            };
            assert_eq!(rules.classify_unit(&unit), None);
        });
    }

    #[test]
    fn config_values() {
        with_rules(|rules| {
            assert_eq!(
                rules.classify_config_value(&Expr::Str("public".into())),
                AuthClassification::Public
            );
            assert_eq!(
                rules.classify_config_value(&Expr::Str("trainer".into())),
                AuthClassification::Owner
            );
            assert_eq!(rules.classify_config_value(&Expr::Bool(true)), AuthClassification::Either);
        });
    }
}
