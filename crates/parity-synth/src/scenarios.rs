//! Scenario matrix synthesis
//!
//! Expands one [`RouteDescriptor`] into its named scenarios. The name is the
//! synthesis key: a scenario whose name is already present is discarded, so
//! names are unique per route regardless of what the shapes contain.
//!
//! ```text
//! ok
//! auth.*        secured routes
//! params.*      routes with :params
//! query.*       routes with a query schema
//! body.*        routes with a body schema (multipart.* for uploads)
//! signature.*   webhook routes (on top of their query.* and body.*), plus webhook.repeat
//! action.repeat / create.repeat
//! state.*       one per DB variant of the primary resource
//! ```

use crate::rules::{self, WebhookProvider};
use indexmap::IndexMap;
use parity_model::{
    AuthClassification, AuthMode, BodyMode, DbVariant, FieldPath, MultipartMode, MutationOp,
    ParamMode, QueryMode, RequestShape, RouteDescriptor, RouteKind, ScenarioDescriptor,
    SignatureMode, StateMode,
};
use serde_json::{json, Value};
use tracing::debug;

/// Deliveries for repeat scenarios
pub const REPEAT_DELIVERIES: u32 = 2;

/// Pagination edge cases: name suffix and value
const PAGE_EDGES: &[(&str, i64)] = &[
    ("page_zero", 0),
    ("page_negative", -1),
    ("page_huge", 1_000_000),
];

/// Ordered, name-keyed scenario set of one route
#[derive(Debug, Clone, Default)]
pub struct ScenarioMatrix {
    scenarios: IndexMap<String, ScenarioDescriptor>,
}

impl ScenarioMatrix {
    /// Empty matrix
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scenario; returns false when the name was already taken
    pub fn push(&mut self, scenario: ScenarioDescriptor) -> bool {
        if self.scenarios.contains_key(&scenario.name) {
            debug!(scenario = %scenario.name, "duplicate scenario discarded");
            return false;
        }
        self.scenarios.insert(scenario.name.clone(), scenario);
        true
    }

    /// Scenario by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ScenarioDescriptor> {
        self.scenarios.get(name)
    }

    /// Scenarios in synthesis order
    pub fn iter(&self) -> impl Iterator<Item = &ScenarioDescriptor> {
        self.scenarios.values()
    }

    /// Names in synthesis order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    /// Keep only scenarios matching `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&ScenarioDescriptor) -> bool) {
        self.scenarios.retain(|_, s| keep(s));
    }

    /// Number of scenarios
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    /// True when empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Scenarios in synthesis order
    #[must_use]
    pub fn into_vec(self) -> Vec<ScenarioDescriptor> {
        self.scenarios.into_values().collect()
    }
}

/// Expand a route into its scenario matrix
///
/// `variants` are the DB variants of the route's primary resource; pass an
/// empty slice when no live metadata is available.
#[must_use]
pub fn synthesize(route: &RouteDescriptor, variants: &[DbVariant]) -> ScenarioMatrix {
    let mut matrix = ScenarioMatrix::new();
    matrix.push(ScenarioDescriptor::baseline("ok"));
    let kind = route.kind();

    if route.auth.requires_auth() {
        auth_scenarios(route.auth, &mut matrix);
    }

    if !route.path_params().is_empty() {
        matrix.push(ScenarioDescriptor::baseline("params.not_found").with_params(ParamMode::NotFound));
        matrix.push(ScenarioDescriptor::baseline("params.invalid").with_params(ParamMode::Malformed));
    }

    if let Some(query) = &route.query {
        query_scenarios(query, &mut matrix);
    }
    if route.is_multipart() {
        multipart_scenarios(&mut matrix);
    } else if let (true, Some(body)) = (route.method.has_body(), &route.body) {
        body_scenarios(body, &mut matrix);
    }
    if kind == RouteKind::Webhook {
        webhook_scenarios(route, &mut matrix);
    }

    match kind {
        RouteKind::Action | RouteKind::Delete => {
            matrix.push(ScenarioDescriptor::baseline("action.repeat").with_repeat(REPEAT_DELIVERIES));
        }
        RouteKind::Create => {
            matrix.push(ScenarioDescriptor::baseline("create.repeat").with_repeat(REPEAT_DELIVERIES));
        }
        RouteKind::Read | RouteKind::Update | RouteKind::Webhook => {}
    }

    for variant in variants {
        matrix.push(
            ScenarioDescriptor::baseline(format!("state.{}", variant.label)).with_variant(variant.clone()),
        );
    }

    debug!(route = %route.key(), scenarios = matrix.len(), "synthesized scenarios");
    matrix
}

fn auth_scenarios(auth: AuthClassification, matrix: &mut ScenarioMatrix) {
    matrix.push(ScenarioDescriptor::baseline("auth.none").with_auth(AuthMode::None));
    matrix.push(ScenarioDescriptor::baseline("auth.invalid").with_auth(AuthMode::Invalid));
    matrix.push(ScenarioDescriptor::baseline("auth.expired").with_auth(AuthMode::Expired));
    // an either-kind route has no wrong actor; its wrong-actor case uses the alternate one
    if auth == AuthClassification::Either {
        matrix.push(ScenarioDescriptor::baseline("auth.alternate_actor").with_auth(AuthMode::AlternateActor));
    } else {
        matrix.push(ScenarioDescriptor::baseline("auth.wrong_actor").with_auth(AuthMode::WrongActor));
    }
    matrix.push(ScenarioDescriptor::baseline("auth.cross_tenant").with_state(StateMode::OtherActor));
}

fn query_scenarios(query: &RequestShape, matrix: &mut ScenarioMatrix) {
    matrix.push(ScenarioDescriptor::baseline("query.missing").with_query(QueryMode::Missing));
    matrix.push(ScenarioDescriptor::baseline("query.invalid").with_query(QueryMode::Invalid));
    for (name, op) in field_mutations("query", query) {
        matrix.push(ScenarioDescriptor::baseline(name).with_query(QueryMode::Mutated { op }));
    }
    if let Value::Object(fields) = &query.sample {
        for field in fields.keys().filter(|k| rules::is_pagination_name(k)) {
            for (edge, value) in PAGE_EDGES {
                let op = MutationOp::Replace {
                    path: FieldPath::key(field.as_str()),
                    value: json!(value),
                };
                matrix.push(
                    ScenarioDescriptor::baseline(format!("query.{edge}.{field}"))
                        .with_query(QueryMode::Mutated { op }),
                );
            }
        }
    }
}

fn body_scenarios(body: &RequestShape, matrix: &mut ScenarioMatrix) {
    matrix.push(ScenarioDescriptor::baseline("body.empty").with_body(BodyMode::Empty));
    matrix.push(ScenarioDescriptor::baseline("body.wrong_type").with_body(BodyMode::WrongTopLevel));
    for key in &body.required_keys {
        let path = FieldPath::key(key.as_str());
        matrix.push(
            ScenarioDescriptor::baseline(format!("body.missing.{key}"))
                .with_body(BodyMode::Mutated { op: MutationOp::DeleteKey { path: path.clone() } }),
        );
        matrix.push(
            ScenarioDescriptor::baseline(format!("body.wrong_type.{key}"))
                .with_body(BodyMode::Mutated { op: MutationOp::Retype { path } }),
        );
    }
    for (name, op) in field_mutations("body", body) {
        matrix.push(ScenarioDescriptor::baseline(name).with_body(BodyMode::Mutated { op }));
    }
}

/// Identifier, numeric and time-range corruptions of one request part
fn field_mutations(part: &str, shape: &RequestShape) -> Vec<(String, MutationOp)> {
    let mut out = Vec::new();
    for path in &shape.identifier_paths {
        out.push((
            format!("{part}.invalid_id.{path}"),
            MutationOp::InvalidId { path: path.clone() },
        ));
    }
    for path in &shape.numeric_paths {
        out.push((
            format!("{part}.negative.{path}"),
            MutationOp::Negate { path: path.clone() },
        ));
    }
    for pair in &shape.time_ranges {
        out.push((
            format!("{part}.inverted_range.{}", pair.start),
            MutationOp::InvertRange {
                start: pair.start.clone(),
                end: pair.end.clone(),
            },
        ));
    }
    out
}

fn multipart_scenarios(matrix: &mut ScenarioMatrix) {
    for (name, variant) in [
        ("multipart.valid", MultipartMode::Valid),
        ("multipart.missing_file", MultipartMode::MissingFile),
        ("multipart.wrong_field", MultipartMode::WrongField),
        ("multipart.empty_file", MultipartMode::EmptyFile),
        ("multipart.wrong_mime", MultipartMode::WrongMime),
    ] {
        matrix.push(ScenarioDescriptor::baseline(name).with_body(BodyMode::Multipart { variant }));
    }
}

fn webhook_scenarios(route: &RouteDescriptor, matrix: &mut ScenarioMatrix) {
    matrix.push(ScenarioDescriptor::baseline("signature.invalid").with_signature(SignatureMode::Invalid));
    matrix.push(ScenarioDescriptor::baseline("signature.missing").with_signature(SignatureMode::Missing));
    if WebhookProvider::detect(&route.path_template).checks_timestamp() {
        matrix.push(ScenarioDescriptor::baseline("signature.expired").with_signature(SignatureMode::Expired));
    }
    matrix.push(ScenarioDescriptor::baseline("webhook.repeat").with_repeat(REPEAT_DELIVERIES));
}
