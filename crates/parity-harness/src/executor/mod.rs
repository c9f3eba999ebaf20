//! Request executor
//!
//! Turns a route and one of its scenarios into a concrete request for one
//! environment, then sends it.
//!
//! ```text
//! RouteDescriptor + ScenarioDescriptor + FixtureState
//!        │ prepare
//!        ▼
//! PreparedRequest { path, query, headers, body } ──send──► Observation
//! ```
//!
//! Identifiers differ between environments (seeded rows get server-generated
//! ids), so a request is prepared separately for each side. Everything else
//! is derived deterministically and is identical on both.

pub mod body;
pub mod signature;

use crate::cache::SchemaCache;
use crate::config::HarnessConfig;
use crate::environment::Environment;
use crate::error::ExecError;
use crate::fixtures::{self, EnvFixtures};
use crate::tokens::TokenBook;
use body::{MultipartSpec, WebhookPayload};
use chrono::{DateTime, Utc};
use parity_model::{
    ActorKind, ActorPair, AuthClassification, AuthMode, BodyMode, FixtureState, HttpMethod, MultipartMode,
    Observation, ObservedStatus, ParamMode, ResponseBody, RouteDescriptor, ScenarioDescriptor, StateMode,
};
use parity_synth::rules::INVALID_ID;
use parity_synth::WebhookProvider;
use reqwest::header::CONTENT_TYPE;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use signature::SignedPayload;
use std::time::Duration;
use tracing::debug;

/// Request payload
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    /// Pre-serialized text, sent byte for byte (signed payloads)
    Raw { content_type: String, text: String },
    Form(Vec<(String, String)>),
    Multipart(MultipartSpec),
}

/// Fully resolved request for one environment
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    /// Path with parameters substituted
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl PreparedRequest {
    /// Request without query, headers or body
    #[must_use]
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::None,
        }
    }

    /// With a bearer token
    #[inline]
    #[must_use]
    pub fn with_bearer(mut self, token: &str) -> Self {
        self.headers.push(("authorization".into(), format!("Bearer {token}")));
        self
    }

    /// With a body
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// JSON view for verbose reports; file contents are summarized
    #[must_use]
    pub fn to_value(&self) -> Value {
        let body = match &self.body {
            RequestBody::None => Value::Null,
            RequestBody::Json(v) => v.clone(),
            RequestBody::Raw { text, .. } => serde_json::from_str(text).unwrap_or_else(|_| json!(text)),
            RequestBody::Form(fields) => json!(fields),
            RequestBody::Multipart(spec) => json!({
                "fields": spec.fields,
                "file": spec.file.as_ref().map(|f| json!({
                    "field": f.field,
                    "fileName": f.file_name,
                    "mime": f.mime,
                    "bytes": f.bytes.len(),
                })),
            }),
        };
        json!({
            "method": self.method.as_str(),
            "path": self.path,
            "query": self.query,
            "headers": self.headers,
            "body": body,
        })
    }
}

/// Run-wide inputs of request preparation
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    pub config: &'a HarnessConfig,
    pub cache: &'a SchemaCache,
    pub tokens: &'a TokenBook,
    /// Identifier sent by `params.not_found`, shared by both environments
    pub not_found_id: &'a str,
    /// Scenario clock (signature timestamps)
    pub now: DateTime<Utc>,
}

/// Actor pair every scenario authenticates as
pub const CALLER: ActorPair = ActorPair::A;

/// Pair whose resources a scenario addresses
#[inline]
#[must_use]
pub fn target_pair(state: StateMode) -> ActorPair {
    match state {
        StateMode::Primary => CALLER,
        StateMode::OtherActor => CALLER.other(),
    }
}

/// Actor kind whose token a scenario presents; `None` for public routes
#[must_use]
pub fn actor_for(auth: AuthClassification, mode: AuthMode) -> Option<ActorKind> {
    let admitted = match auth {
        AuthClassification::Public => return None,
        AuthClassification::Owner | AuthClassification::Either => ActorKind::Owner,
        AuthClassification::Dependent => ActorKind::Dependent,
    };
    Some(match mode {
        AuthMode::WrongActor => admitted.other(),
        AuthMode::AlternateActor => ActorKind::Dependent,
        _ => admitted,
    })
}

/// Resource key a path parameter refers to
///
/// Configured parameter names win; otherwise the literal segment right
/// before `:param` names the collection.
#[must_use]
pub fn param_resource<'c>(config: &'c HarnessConfig, template: &str, param: &str) -> Option<&'c str> {
    if let Some(key) = config.resource_for_param(param) {
        return Some(key);
    }
    let segments: Vec<&str> = template.split('/').collect();
    let position = segments
        .iter()
        .position(|seg| seg.strip_prefix(':').map(|s| s.trim_end_matches('?')) == Some(param))?;
    let collection = segments[..position].iter().rev().find(|s| !s.is_empty() && !s.starts_with(':'))?;
    config.resource_for_segment(collection).map(|(key, _)| key)
}

/// Substitute `:name` placeholders; unresolved names are an error
///
/// # Errors
/// Returns [`ExecError::Build`] naming the first parameter `resolve` cannot
/// answer.
pub fn fill_path(template: &str, mut resolve: impl FnMut(&str) -> Option<String>) -> Result<String, ExecError> {
    let mut out = Vec::new();
    for seg in template.split('/') {
        match seg.strip_prefix(':') {
            Some(param) => {
                let name = param.trim_end_matches('?');
                let id = resolve(name).ok_or_else(|| ExecError::build(format!("no identifier for :{name}")))?;
                out.push(id);
            }
            None => out.push(seg.to_string()),
        }
    }
    Ok(out.join("/"))
}

/// Stable key of a scenario's webhook event
#[must_use]
pub fn event_key(route_key: &str, scenario: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(route_key.as_bytes());
    hasher.update([0]);
    hasher.update(scenario.as_bytes());
    hex::encode(hasher.finalize())[..24].to_string()
}

fn path_matches(template: &str, paths: &[String]) -> bool {
    paths.iter().any(|p| template.ends_with(p.as_str()))
}

/// Build the request `scenario` sends to `env`
///
/// # Errors
/// Fails when an identifier cannot be resolved, a corruption does not apply
/// or a signature cannot be computed.
pub async fn prepare(
    ctx: &ExecContext<'_>,
    env: &Environment,
    fixtures: &EnvFixtures,
    route: &RouteDescriptor,
    scenario: &ScenarioDescriptor,
) -> Result<PreparedRequest, ExecError> {
    let state = fixtures.get(target_pair(scenario.state));
    let path = resolve_path(ctx, env, state, route, scenario.params).await?;
    let mut request = PreparedRequest::new(route.method, path);

    let lookup = |key: &str| {
        ctx.config
            .resource_for_param(key)
            .and_then(|resource| state.lookup(resource))
            .map(ToString::to_string)
    };

    let query_base = route.query.as_ref().map(|shape| {
        let mut sample = shape.sample.clone();
        body::fill_identifiers(&mut sample, &shape.identifier_paths, lookup);
        sample
    });
    if let Some(query) = body::query_value(&scenario.query, query_base)? {
        request.query = body::query_pairs(&query);
    }

    if let Some(kind) = actor_for(route.auth, scenario.auth) {
        let tokens = ctx
            .tokens
            .get(CALLER, kind)
            .ok_or_else(|| ExecError::build(format!("no tokens for {kind:?}")))?;
        if let Some(token) = tokens.for_mode(scenario.auth) {
            request = request.with_bearer(token);
        }
    }

    if route.is_webhook() {
        let sample = route.body.as_ref().map(|shape| {
            let mut value = shape.sample.clone();
            body::fill_identifiers(&mut value, &shape.identifier_paths, lookup);
            value
        });
        return webhook_request(ctx, env, state, route, scenario, sample.as_ref(), request);
    }

    let body = if route.is_multipart() {
        let variant = match &scenario.body {
            BodyMode::Multipart { variant } => *variant,
            _ => MultipartMode::Valid,
        };
        let sample = body::sample_of(route.body.as_ref());
        RequestBody::Multipart(body::multipart_spec(variant, &route.multipart_fields, sample.as_ref()))
    } else if route.method.has_body() {
        let sample = body::sample_of(route.body.as_ref());
        let routes = &ctx.config.routes;
        let base = if path_matches(&route.path_template, &routes.login_paths) {
            body::login_body(sample.as_ref(), state.email(ActorKind::Owner), &ctx.config.fixtures.password)
        } else if path_matches(&route.path_template, &routes.reset_paths) {
            body::reset_body(sample.as_ref(), state.email(ActorKind::Owner))
        } else if let Some(shape) = &route.body {
            let mut value = shape.sample.clone();
            body::fill_identifiers(&mut value, &shape.identifier_paths, lookup);
            value
        } else {
            Value::Null
        };
        if base.is_null() && scenario.body == BodyMode::Sample {
            RequestBody::None
        } else {
            RequestBody::Json(body::json_body(&scenario.body, base)?)
        }
    } else {
        RequestBody::None
    };
    Ok(request.with_body(body))
}

async fn resolve_path(
    ctx: &ExecContext<'_>,
    env: &Environment,
    state: &FixtureState,
    route: &RouteDescriptor,
    mode: ParamMode,
) -> Result<String, ExecError> {
    let template = route.path_template.as_str();
    match mode {
        ParamMode::NotFound => return fill_path(template, |_| Some(ctx.not_found_id.to_string())),
        ParamMode::Malformed => return fill_path(template, |_| Some(INVALID_ID.to_string())),
        ParamMode::Fixture => {}
    }
    let mut ids = Vec::new();
    for param in route.path_params() {
        let key = param_resource(ctx.config, template, param);
        let mut id = key.and_then(|k| state.lookup(k)).map(ToString::to_string);
        if id.is_none() {
            if let Some(resource) = key.and_then(|k| ctx.config.resources.get(k)) {
                id = fixtures::live_lookup(env, ctx.cache, resource, state)
                    .await
                    .map_err(|err| ExecError::build(format!("looking up :{param}: {err}")))?;
            }
        }
        if let Some(id) = id {
            ids.push((param.to_string(), id));
        }
    }
    fill_path(template, |name| {
        ids.iter().find(|(p, _)| p == name).map(|(_, id)| id.clone())
    })
}

/// Provider payload with the scenario's body corruption, signed afterwards
fn webhook_request(
    ctx: &ExecContext<'_>,
    env: &Environment,
    state: &FixtureState,
    route: &RouteDescriptor,
    scenario: &ScenarioDescriptor,
    sample: Option<&Value>,
    mut request: PreparedRequest,
) -> Result<PreparedRequest, ExecError> {
    let provider = WebhookProvider::detect(&route.path_template);
    let config = signature::provider_config(&ctx.config.webhooks, provider);
    let key = event_key(&route.key(), &scenario.name);
    let payload = body::webhook_payload(provider, &key, &state.organization_id);
    let (signed, body) = match body::webhook_body(&scenario.body, payload, sample)? {
        WebhookPayload::Json(value) => {
            let text = value.to_string();
            let header = signature::sign(provider, config, scenario.signature, SignedPayload::Raw(&text), ctx.now)?;
            (
                header,
                RequestBody::Raw {
                    content_type: "application/json".into(),
                    text,
                },
            )
        }
        WebhookPayload::Form(fields) => {
            // the signed URL carries the same query string the request sends
            let url = signed_url(&env.url(&request.path), &request.query)?;
            let header = signature::sign(
                provider,
                config,
                scenario.signature,
                SignedPayload::Form {
                    url: &url,
                    fields: &fields,
                },
                ctx.now,
            )?;
            (header, RequestBody::Form(fields))
        }
    };
    if let Some(header) = signed {
        request.headers.push(header);
    }
    Ok(request.with_body(body))
}

fn signed_url(base: &str, query: &[(String, String)]) -> Result<String, ExecError> {
    if query.is_empty() {
        return Ok(base.to_string());
    }
    reqwest::Url::parse_with_params(base, query)
        .map(String::from)
        .map_err(|err| ExecError::build(format!("webhook url {base}: {err}")))
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn multipart_form(spec: &MultipartSpec) -> Result<reqwest::multipart::Form, ExecError> {
    let mut form = reqwest::multipart::Form::new();
    for (name, value) in &spec.fields {
        form = form.text(name.clone(), value.clone());
    }
    if let Some(file) = &spec.file {
        let part = reqwest::multipart::Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime)?;
        form = form.part(file.field.clone(), part);
    }
    Ok(form)
}

/// Send `request` to `env`
///
/// A request that exceeds `timeout` yields [`Observation::timeout`] rather
/// than an error.
///
/// # Errors
/// Returns [`ExecError::Transport`] for connection failures.
pub async fn send(
    http: &reqwest::Client,
    env: &Environment,
    request: &PreparedRequest,
    timeout: Duration,
) -> Result<Observation, ExecError> {
    let mut builder = http
        .request(reqwest_method(request.method), env.url(&request.path))
        .timeout(timeout);
    if !request.query.is_empty() {
        builder = builder.query(&request.query);
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = match &request.body {
        RequestBody::None => builder,
        RequestBody::Json(value) => builder.json(value),
        RequestBody::Raw { content_type, text } => builder.header(CONTENT_TYPE, content_type.as_str()).body(text.clone()),
        RequestBody::Form(fields) => builder.form(fields),
        RequestBody::Multipart(spec) => builder.multipart(multipart_form(spec)?),
    };

    let response = match builder.send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => return Ok(Observation::timeout()),
        Err(err) => return Err(err.into()),
    };
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let text = match response.text().await {
        Ok(text) => text,
        Err(err) if err.is_timeout() => return Ok(Observation::timeout()),
        Err(err) => return Err(err.into()),
    };
    let body = if text.is_empty() {
        ResponseBody::Empty
    } else {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => ResponseBody::Json(value),
            Err(_) => ResponseBody::Text(text),
        }
    };
    debug!(side = %env.side, method = %request.method, path = %request.path, status, "response");
    Ok(Observation {
        status: ObservedStatus::Code(status),
        body,
        content_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceConfig;
    use pretty_assertions::assert_eq;

    fn config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        for (key, table, segment) in [("sale", "sales", "sales"), ("sale_payment", "sale_payments", "payments")] {
            config.resources.insert(
                key.into(),
                ResourceConfig {
                    table: table.into(),
                    segments: vec![segment.into()],
                    ..ResourceConfig::default()
                },
            );
        }
        config
    }

    #[test]
    fn params_map_to_resources() {
        let config = config();
        let template = "/api/sales/:id/payments/:paymentId";
        assert_eq!(param_resource(&config, template, "id"), Some("sale"));
        assert_eq!(param_resource(&config, template, "paymentId"), Some("sale_payment"));
        assert_eq!(param_resource(&config, "/api/widgets/:id", "id"), None);
    }

    #[test]
    fn path_filling() {
        let path = fill_path("/api/sales/:id/payments/:paymentId?", |p| Some(format!("<{p}>"))).unwrap();
        assert_eq!(path, "/api/sales/<id>/payments/<paymentId>");
        let err = fill_path("/api/sales/:id", |_| None).unwrap_err();
        assert!(err.to_string().contains(":id"));
    }

    #[test]
    fn token_actor_selection() {
        assert_eq!(actor_for(AuthClassification::Public, AuthMode::Valid), None);
        assert_eq!(actor_for(AuthClassification::Owner, AuthMode::Valid), Some(ActorKind::Owner));
        assert_eq!(
            actor_for(AuthClassification::Owner, AuthMode::WrongActor),
            Some(ActorKind::Dependent)
        );
        assert_eq!(
            actor_for(AuthClassification::Dependent, AuthMode::WrongActor),
            Some(ActorKind::Owner)
        );
        assert_eq!(
            actor_for(AuthClassification::Either, AuthMode::AlternateActor),
            Some(ActorKind::Dependent)
        );
    }

    #[test]
    fn cross_tenant_targets_other_pair() {
        assert_eq!(target_pair(StateMode::Primary), ActorPair::A);
        assert_eq!(target_pair(StateMode::OtherActor), ActorPair::B);
    }

    #[test]
    fn signed_urls_include_the_query() {
        assert_eq!(
            signed_url("http://127.0.0.1:4100/api/webhooks/twilio", &[]).unwrap(),
            "http://127.0.0.1:4100/api/webhooks/twilio"
        );
        let query = vec![("accountId".to_string(), "a b".to_string())];
        assert_eq!(
            signed_url("http://127.0.0.1:4100/api/webhooks/twilio", &query).unwrap(),
            "http://127.0.0.1:4100/api/webhooks/twilio?accountId=a+b"
        );
    }

    #[test]
    fn event_keys_are_stable_per_scenario() {
        let a = event_key("POST /api/webhooks/stripe", "ok");
        assert_eq!(a, event_key("POST /api/webhooks/stripe", "ok"));
        assert_ne!(a, event_key("POST /api/webhooks/stripe", "webhook.repeat"));
        assert_eq!(a.len(), 24);
    }

    #[test]
    fn verbose_view_summarizes_files() {
        let request = PreparedRequest::new(HttpMethod::Post, "/api/uploads").with_body(RequestBody::Multipart(
            body::multipart_spec(MultipartMode::Valid, &["avatar".to_string()], None),
        ));
        let value = request.to_value();
        assert_eq!(value["body"]["file"]["bytes"], json!(body::UPLOAD_PNG.len()));
        assert_eq!(value["method"], json!("POST"));
    }
}
