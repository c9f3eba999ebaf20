//! Fixture seeding
//!
//! Two actor pairs exist in every environment. Their organization, users and
//! profiles are inserted directly with deterministic identifiers, so the same
//! ids (and therefore the same tokens) are valid on both sides.
//!
//! Everything a route addresses beyond the actors is created lazily through
//! the API itself, in dependency order, the first time a scenario needs it:
//!
//! ```text
//! booking ─depends─► session ─► session_series ─► product
//!    │
//!    └─ POST /api/bookings {"sessionId": "{session}"}  ──► id remembered
//! ```
//!
//! Created identifiers are server-generated and differ between environments;
//! each environment keeps its own [`EnvFixtures`].

use crate::cache::SchemaCache;
use crate::config::{FixtureConfig, HarnessConfig, ResourceConfig, SeedRequest};
use crate::db::{self, sql_literal, RowScope};
use crate::environment::Environment;
use crate::error::{HarnessError, HarnessResult, SeedError};
use crate::executor::{self, PreparedRequest, RequestBody};
use crate::tokens::TokenBook;
use parity_model::{ActorPair, FixtureState, ResponseBody, RouteDescriptor};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tokio_postgres::Client;
use tracing::{debug, info};
use uuid::Uuid;

/// Namespace of deterministic fixture identifiers
const ID_NAMESPACE: Uuid = Uuid::NAMESPACE_OID;

fn fixture_id(pair: ActorPair, role: &str) -> String {
    Uuid::new_v5(&ID_NAMESPACE, format!("route-parity:{}:{role}", pair.tag()).as_bytes()).to_string()
}

/// Actor identifiers of `pair`, identical in every environment and run
#[must_use]
pub fn baseline_state(pair: ActorPair) -> FixtureState {
    let tag = pair.tag();
    FixtureState {
        organization_id: fixture_id(pair, "organization"),
        owner_id: fixture_id(pair, "owner"),
        owner_user_id: fixture_id(pair, "owner-user"),
        dependent_id: fixture_id(pair, "dependent"),
        dependent_user_id: fixture_id(pair, "dependent-user"),
        owner_email: format!("owner.{tag}@parity.test"),
        dependent_email: format!("client.{tag}@parity.test"),
        resource_ids: BTreeMap::new(),
    }
}

/// Replace `{placeholder}`s of a fixture statement with quoted literals
#[must_use]
pub fn expand(template: &str, state: &FixtureState, password_hash: &str, label: &str) -> String {
    let values = [
        ("organization_id", state.organization_id.as_str()),
        ("owner_id", state.owner_id.as_str()),
        ("owner_user_id", state.owner_user_id.as_str()),
        ("dependent_id", state.dependent_id.as_str()),
        ("dependent_user_id", state.dependent_user_id.as_str()),
        ("owner_email", state.owner_email.as_str()),
        ("dependent_email", state.dependent_email.as_str()),
        ("password_hash", password_hash),
        ("label", label),
    ];
    let mut out = template.to_string();
    for (name, value) in values {
        out = out.replace(&format!("{{{name}}}"), &sql_literal(&json!(value)));
    }
    out
}

/// Insert the actor graph of `pair`
///
/// # Errors
/// Returns [`SeedError::Actors`] on the first failing statement.
pub async fn insert_actors(
    client: &Client,
    fixtures: &FixtureConfig,
    state: &FixtureState,
    pair: ActorPair,
) -> Result<(), SeedError> {
    let label = format!("Parity {pair}");
    let script = fixtures
        .statements
        .iter()
        .map(|s| expand(s, state, &fixtures.password_hash, &label))
        .collect::<Vec<_>>()
        .join(";\n");
    client.batch_execute(&script).await.map_err(|source| SeedError::Actors {
        pair: pair.to_string(),
        source,
    })?;
    debug!(%pair, statements = fixtures.statements.len(), "actors inserted");
    Ok(())
}

/// Fixture states of both pairs in one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFixtures {
    pub a: FixtureState,
    pub b: FixtureState,
}

impl EnvFixtures {
    /// Baseline actors, nothing seeded yet
    #[must_use]
    pub fn baseline() -> Self {
        Self {
            a: baseline_state(ActorPair::A),
            b: baseline_state(ActorPair::B),
        }
    }

    /// State of one pair
    #[must_use]
    pub fn get(&self, pair: ActorPair) -> &FixtureState {
        match pair {
            ActorPair::A => &self.a,
            ActorPair::B => &self.b,
        }
    }

    /// Mutable state of one pair
    pub fn get_mut(&mut self, pair: ActorPair) -> &mut FixtureState {
        match pair {
            ActorPair::A => &mut self.a,
            ActorPair::B => &mut self.b,
        }
    }

    /// Forget a seeded resource in both pairs
    pub fn forget(&mut self, key: &str) {
        self.a.forget(key);
        self.b.forget(key);
    }

    /// Drop every seeded resource, keeping the actors
    pub fn reset(&mut self) {
        self.a.resource_ids.clear();
        self.b.resource_ids.clear();
    }
}

/// Insert both actor pairs into one environment
///
/// # Errors
/// Returns [`SeedError::Actors`] when an insertion fails.
pub async fn seed_actors(env: &Environment, fixtures: &FixtureConfig) -> Result<EnvFixtures, SeedError> {
    let state = EnvFixtures::baseline();
    insert_actors(&env.db, fixtures, &state.a, ActorPair::A).await?;
    insert_actors(&env.db, fixtures, &state.b, ActorPair::B).await?;
    info!(side = %env.side, "actor pairs inserted");
    Ok(state)
}

/// `key` and everything it depends on, dependencies first
///
/// # Errors
/// Returns [`SeedError::UnknownResource`] for unconfigured keys and
/// [`SeedError::Cycle`] when dependencies loop.
pub fn seed_order(config: &HarnessConfig, key: &str) -> Result<Vec<String>, SeedError> {
    fn visit(
        config: &HarnessConfig,
        key: &str,
        visiting: &mut BTreeSet<String>,
        order: &mut Vec<String>,
    ) -> Result<(), SeedError> {
        if order.iter().any(|k| k == key) {
            return Ok(());
        }
        if !visiting.insert(key.to_string()) {
            return Err(SeedError::Cycle(key.to_string()));
        }
        let resource = config
            .resources
            .get(key)
            .ok_or_else(|| SeedError::UnknownResource(key.to_string()))?;
        for dep in &resource.depends_on {
            visit(config, dep, visiting, order)?;
        }
        visiting.remove(key);
        order.push(key.to_string());
        Ok(())
    }

    let mut order = Vec::new();
    visit(config, key, &mut BTreeSet::new(), &mut order)?;
    Ok(order)
}

/// Resources a route's requests refer to
///
/// Path parameters first, then identifier fields of the body and query.
#[must_use]
pub fn resources_for_route(config: &HarnessConfig, route: &RouteDescriptor) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut push = |key: Option<&str>| {
        if let Some(key) = key {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
    };
    for param in route.path_params() {
        push(executor::param_resource(config, &route.path_template, param));
    }
    for shape in [&route.body, &route.query].into_iter().flatten() {
        for path in &shape.identifier_paths {
            push(path.leaf_key().and_then(|leaf| config.resource_for_param(leaf)));
        }
    }
    keys
}

/// Most recently created row of `resource` within the pair's organization
///
/// # Errors
/// Propagates catalog and query failures.
pub async fn live_lookup(
    env: &Environment,
    cache: &SchemaCache,
    resource: &ResourceConfig,
    state: &FixtureState,
) -> HarnessResult<Option<String>> {
    let profile = cache.profile(&resource.table).await?;
    let Some(profile) = profile.as_ref() else {
        return Ok(None);
    };
    let organization = resource
        .organization_column
        .as_deref()
        .filter(|c| profile.column(c).is_some())
        .map(|c| (c, state.organization_id.as_str()));
    let created_column = ["created_at", "createdAt"].into_iter().find(|c| profile.column(c).is_some());
    let scope = RowScope {
        organization,
        created_column,
    };
    Ok(db::latest_id(&env.db, &resource.table, scope).await?)
}

/// Replace `"{key}"` strings with already-known identifiers
#[must_use]
pub fn substitute_ids(value: &Value, state: &FixtureState) -> Value {
    match value {
        Value::String(s) => s
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .and_then(|key| state.lookup(key))
            .map_or_else(|| value.clone(), |id| json!(id)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_ids(v, state)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_ids(v, state)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// First identifier found at `pointers` in a creation response
#[must_use]
pub fn created_id(body: &Value, pointers: &[String]) -> Option<String> {
    pointers.iter().find_map(|p| match body.pointer(p)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Lazily creates resources through the API
#[derive(Debug, Clone, Copy)]
pub struct Seeder<'a> {
    pub config: &'a HarnessConfig,
    pub http: &'a reqwest::Client,
    pub cache: &'a SchemaCache,
    pub tokens: &'a TokenBook,
    pub timeout: Duration,
}

impl Seeder<'_> {
    /// Make sure `key` and its dependencies exist for `pair`; returns its id
    ///
    /// # Errors
    /// Fails when a creation request is rejected or no identifier can be
    /// found.
    pub async fn ensure(
        &self,
        env: &Environment,
        fixtures: &mut EnvFixtures,
        pair: ActorPair,
        key: &str,
    ) -> Result<String, SeedError> {
        if let Some(id) = fixtures.get(pair).lookup(key) {
            return Ok(id.to_string());
        }
        let mut last = None;
        for step in seed_order(self.config, key)? {
            if let Some(id) = fixtures.get(pair).lookup(&step) {
                last = Some(id.to_string());
                continue;
            }
            let id = self.seed_one(env, fixtures.get(pair), pair, &step).await?;
            fixtures.get_mut(pair).remember(step.as_str(), id.as_str());
            last = Some(id);
        }
        last.ok_or_else(|| SeedError::NoIdentifier(key.to_string()))
    }

    /// [`Seeder::ensure`] for several keys
    ///
    /// # Errors
    /// Stops at the first failure.
    pub async fn ensure_all(
        &self,
        env: &Environment,
        fixtures: &mut EnvFixtures,
        pair: ActorPair,
        keys: &[String],
    ) -> Result<(), SeedError> {
        for key in keys {
            self.ensure(env, fixtures, pair, key).await?;
        }
        Ok(())
    }

    async fn seed_one(
        &self,
        env: &Environment,
        state: &FixtureState,
        pair: ActorPair,
        key: &str,
    ) -> Result<String, SeedError> {
        let resource = self
            .config
            .resources
            .get(key)
            .ok_or_else(|| SeedError::UnknownResource(key.to_string()))?;
        if let Some(id) = resource.fixture.as_deref().and_then(|f| state.lookup(f)) {
            return Ok(id.to_string());
        }
        if let Some(seed) = &resource.seed {
            if let Some(id) = self.create(env, state, pair, key, seed).await? {
                debug!(side = %env.side, %pair, resource = key, id = %id, "seeded");
                return Ok(id);
            }
        }
        let found = live_lookup(env, self.cache, resource, state)
            .await
            .map_err(|err| match err {
                HarnessError::Database(source) => SeedError::Lookup {
                    resource: key.to_string(),
                    source,
                },
                _ => SeedError::NoIdentifier(key.to_string()),
            })?;
        found.ok_or_else(|| SeedError::NoIdentifier(key.to_string()))
    }

    /// Send the creation request; `None` when the response carries no id
    async fn create(
        &self,
        env: &Environment,
        state: &FixtureState,
        pair: ActorPair,
        key: &str,
        seed: &SeedRequest,
    ) -> Result<Option<String>, SeedError> {
        let request_error = |source| SeedError::Request {
            resource: key.to_string(),
            source,
        };
        let path = executor::fill_path(&seed.path, |param| {
            executor::param_resource(self.config, &seed.path, param)
                .and_then(|resource| state.lookup(resource))
                .map(ToString::to_string)
        })
        .map_err(request_error)?;
        let token = self
            .tokens
            .get(pair, seed.actor)
            .map(|t| t.valid.clone())
            .ok_or_else(|| SeedError::NoIdentifier(format!("{key} (no token for {:?})", seed.actor)))?;
        let mut request = PreparedRequest::new(seed.method, path).with_bearer(&token);
        if seed.method.has_body() {
            request = request.with_body(RequestBody::Json(substitute_ids(&seed.body, state)));
        }
        let observation = executor::send(self.http, env, &request, self.timeout)
            .await
            .map_err(request_error)?;
        if !observation.status.is_success() {
            return Err(SeedError::Rejected {
                resource: key.to_string(),
                status: observation.status.to_value().to_string(),
            });
        }
        Ok(match &observation.body {
            ResponseBody::Json(body) => created_id(body, &seed.id_pointers),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_model::{AuthClassification, HttpMethod};
    use parity_synth::sample::describe;
    use parity_test_utils::booking_shape;
    use pretty_assertions::assert_eq;

    #[test]
    fn baseline_ids_are_deterministic_and_distinct() {
        let a = baseline_state(ActorPair::A);
        assert_eq!(a, baseline_state(ActorPair::A));
        let b = baseline_state(ActorPair::B);
        assert_ne!(a.organization_id, b.organization_id);
        assert_ne!(a.owner_id, a.dependent_id);
        assert!(Uuid::parse_str(&a.owner_user_id).is_ok());
        assert_eq!(b.dependent_email, "client.b@parity.test");
    }

    #[test]
    fn statements_expand_to_literals() {
        let state = baseline_state(ActorPair::A);
        let sql = expand(
            "INSERT INTO organizations (id, name) VALUES ({organization_id}, {label})",
            &state,
            "hash",
            "Parity A's org",
        );
        assert_eq!(
            sql,
            format!(
                "INSERT INTO organizations (id, name) VALUES ('{}', 'Parity A''s org')",
                state.organization_id
            )
        );
    }

    #[test]
    fn seed_order_puts_dependencies_first() {
        let config = HarnessConfig::builtin().unwrap();
        assert_eq!(
            seed_order(&config, "booking").unwrap(),
            vec!["product", "session_series", "session", "booking"]
        );
        assert_eq!(
            seed_order(&config, "sale_line_item").unwrap(),
            vec!["client", "sale", "product", "sale_line_item"]
        );
        assert!(matches!(seed_order(&config, "widget"), Err(SeedError::UnknownResource(_))));
    }

    #[test]
    fn seed_order_detects_cycles() {
        let mut config = HarnessConfig::default();
        for (key, dep) in [("a", "b"), ("b", "a")] {
            config.resources.insert(
                key.into(),
                ResourceConfig {
                    table: format!("{key}s"),
                    depends_on: vec![dep.into()],
                    ..ResourceConfig::default()
                },
            );
        }
        assert!(matches!(seed_order(&config, "a"), Err(SeedError::Cycle(_))));
    }

    #[test]
    fn route_resources_cover_params_and_body() {
        let config = HarnessConfig::builtin().unwrap();
        let mut extracted = parity_model::ExtractedRoute::new(HttpMethod::Post, "/api/sales/:saleId/items");
        extracted.auth = AuthClassification::Owner;
        extracted.body = Some(parity_model::SchemaShape::Object {
            fields: vec![parity_model::FieldShape::required(
                "productId",
                parity_model::SchemaShape::formatted(parity_model::StringFormat::Uuid),
            )],
        });
        let route = describe(&extracted);
        assert_eq!(resources_for_route(&config, &route), vec!["sale", "product"]);

        let mut booking = parity_model::ExtractedRoute::new(HttpMethod::Post, "/api/bookings");
        booking.body = Some(booking_shape());
        assert_eq!(resources_for_route(&config, &describe(&booking)), vec!["session"]);
    }

    #[test]
    fn placeholders_resolve_from_state() {
        let mut state = baseline_state(ActorPair::A);
        state.remember("session", "s-1");
        let body = json!({ "sessionId": "{session}", "nested": ["{dependent}"], "keep": "{unknown}", "n": 1 });
        assert_eq!(
            substitute_ids(&body, &state),
            json!({ "sessionId": "s-1", "nested": [state.dependent_id], "keep": "{unknown}", "n": 1 })
        );
    }

    #[test]
    fn created_id_follows_pointers() {
        let pointers = vec!["/id".to_string(), "/data/id".to_string()];
        assert_eq!(created_id(&json!({ "data": { "id": "x" } }), &pointers), Some("x".into()));
        assert_eq!(created_id(&json!({ "id": 42 }), &pointers), Some("42".into()));
        assert_eq!(created_id(&json!({ "id": "" }), &pointers), None);
    }

    #[test]
    fn fixtures_forget_in_both_pairs() {
        let mut fixtures = EnvFixtures::baseline();
        fixtures.a.remember("booking", "1");
        fixtures.b.remember("booking", "2");
        fixtures.forget("booking");
        assert_eq!(fixtures.get(ActorPair::A).lookup("booking"), None);
        assert_eq!(fixtures.get(ActorPair::B).lookup("booking"), None);
        fixtures.get_mut(ActorPair::A).remember("sale", "3");
        fixtures.reset();
        assert!(fixtures.a.resource_ids.is_empty());
    }
}
