//! Request bodies and query strings
//!
//! Everything here is pure: given a route shape, a scenario mode and a way to
//! resolve identifiers, produce the payload. Identifier resolution differs per
//! environment (seeded ids are server-generated), everything else is
//! identical on both sides.

use crate::error::ExecError;
use parity_model::{BodyMode, FieldPath, MultipartMode, QueryMode, RequestShape};
use parity_synth::{mutation, WebhookProvider};
use serde_json::{json, Map, Value};

/// File name and bytes of the upload sent by valid multipart scenarios
pub const UPLOAD_NAME: &str = "parity.png";

/// Smallest valid PNG (1×1, transparent)
pub const UPLOAD_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// One file part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Multipart payload, rebuilt into a form for every delivery
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultipartSpec {
    /// Text fields
    pub fields: Vec<(String, String)>,
    pub file: Option<FilePart>,
}

/// Webhook payload before signing
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookPayload {
    Json(Value),
    Form(Vec<(String, String)>),
}

/// Replace identifier fields of `value` with ids `resolve` knows
///
/// `resolve` receives the leaf key (`clientId`); unknown keys keep their
/// sample value.
pub fn fill_identifiers(value: &mut Value, paths: &[FieldPath], resolve: impl Fn(&str) -> Option<String>) {
    for path in paths {
        let Some(key) = path.leaf_key().map(ToString::to_string) else {
            continue;
        };
        let Some(id) = resolve(&key) else {
            continue;
        };
        if let Some(slot) = path.get_mut(value) {
            *slot = match slot {
                Value::Array(items) => Value::Array(vec![Value::String(id); items.len().max(1)]),
                _ => Value::String(id),
            };
        }
    }
}

/// Query value for a scenario; `None` sends no query string
///
/// # Errors
/// Returns [`ExecError::Mutation`] when a corruption does not apply.
pub fn query_value(mode: &QueryMode, base: Option<Value>) -> Result<Option<Value>, ExecError> {
    let Some(base) = base else {
        return Ok(None);
    };
    Ok(match mode {
        QueryMode::Sample => Some(base),
        QueryMode::Missing => None,
        QueryMode::Invalid => Some(mutation::garbled_query(&base)),
        QueryMode::Mutated { op } => Some(mutation::applied(op, &base)?),
    })
}

/// Flatten a query object into `key=value` pairs
///
/// Arrays repeat the key; nested objects are sent as JSON text; `null`
/// fields are left out.
#[must_use]
pub fn query_pairs(value: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = value else {
        return Vec::new();
    };
    let mut pairs = Vec::new();
    for (key, v) in map {
        match v {
            Value::Null => {}
            Value::Array(items) => pairs.extend(items.iter().map(|i| (key.clone(), scalar_text(i)))),
            other => pairs.push((key.clone(), scalar_text(other))),
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON body for a non-multipart scenario
///
/// `base` is the (identifier-filled) sample or the output of a specialized
/// builder.
///
/// # Errors
/// Returns [`ExecError::Mutation`] when a corruption does not apply and
/// [`ExecError::Build`] for multipart modes.
pub fn json_body(mode: &BodyMode, base: Value) -> Result<Value, ExecError> {
    match mode {
        BodyMode::Sample => Ok(base),
        BodyMode::Empty => Ok(json!({})),
        BodyMode::WrongTopLevel => Ok(mutation::wrong_top_level(&base)),
        BodyMode::Mutated { op } => Ok(mutation::applied(op, &base)?),
        BodyMode::Multipart { .. } => Err(ExecError::build("multipart mode on a JSON body")),
    }
}

/// Login body: the sample with credential fields overwritten
#[must_use]
pub fn login_body(sample: Option<&Value>, email: &str, password: &str) -> Value {
    let mut body = object_or_empty(sample);
    body.insert("email".into(), json!(email));
    body.insert("password".into(), json!(password));
    Value::Object(body)
}

/// Password-reset body: the sample with the account email overwritten
#[must_use]
pub fn reset_body(sample: Option<&Value>, email: &str) -> Value {
    let mut body = object_or_empty(sample);
    body.insert("email".into(), json!(email));
    Value::Object(body)
}

fn object_or_empty(sample: Option<&Value>) -> Map<String, Value> {
    match sample {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

/// Provider-shaped event payload
///
/// `event_key` makes the event id stable across both environments and across
/// the deliveries of a repeat scenario.
#[must_use]
pub fn webhook_payload(provider: WebhookProvider, event_key: &str, organization_id: &str) -> WebhookPayload {
    let suffix = &event_key[..event_key.len().min(24)];
    match provider {
        WebhookProvider::Stripe => WebhookPayload::Json(json!({
            "id": format!("evt_parity_{suffix}"),
            "object": "event",
            "type": "payment_intent.succeeded",
            "livemode": false,
            "data": {
                "object": {
                    "id": format!("pi_parity_{suffix}"),
                    "object": "payment_intent",
                    "amount": 1000,
                    "currency": "usd",
                    "status": "succeeded",
                    "metadata": { "organizationId": organization_id }
                }
            }
        })),
        WebhookProvider::Twilio => WebhookPayload::Form(vec![
            ("AccountSid".into(), "ACparity".into()),
            ("Body".into(), "STOP".into()),
            ("From".into(), "+15555550100".into()),
            ("MessageSid".into(), format!("SMparity{suffix}")),
            ("To".into(), "+15555550199".into()),
        ]),
        WebhookProvider::Generic => WebhookPayload::Json(json!({
            "id": format!("evt_parity_{suffix}"),
            "type": "parity.test",
            "organizationId": organization_id,
        })),
    }
}

/// Provider payload carrying the body mode of a webhook scenario
///
/// Fields of the route's declared body sample that the provider payload
/// lacks are added first, so corruptions aimed at them have a target. Form
/// payloads are corrupted as a flat object and flattened back.
///
/// # Errors
/// Fails when a corruption does not apply, when a form payload stops being
/// an object, and for upload modes, which a signed webhook cannot carry.
pub fn webhook_body(
    mode: &BodyMode,
    payload: WebhookPayload,
    sample: Option<&Value>,
) -> Result<WebhookPayload, ExecError> {
    if matches!(mode, BodyMode::Multipart { .. }) {
        return Err(ExecError::build("upload scenarios do not apply to signed webhooks"));
    }
    match payload {
        WebhookPayload::Json(mut value) => {
            if let (Value::Object(target), Some(Value::Object(extra))) = (&mut value, sample) {
                for (key, v) in extra {
                    target.entry(key.clone()).or_insert_with(|| v.clone());
                }
            }
            Ok(WebhookPayload::Json(json_body(mode, value)?))
        }
        WebhookPayload::Form(fields) => {
            let mut object: Map<String, Value> =
                fields.into_iter().map(|(k, v)| (k, Value::String(v))).collect();
            if let Some(Value::Object(extra)) = sample {
                for (key, v) in extra {
                    object.entry(key.clone()).or_insert_with(|| v.clone());
                }
            }
            match json_body(mode, Value::Object(object))? {
                value @ Value::Object(_) => Ok(WebhookPayload::Form(query_pairs(&value))),
                _ => Err(ExecError::build("form webhook body must stay an object")),
            }
        }
    }
}

/// Multipart payload for a mode
///
/// Text fields come from the body sample; the file goes under the first
/// declared upload field.
#[must_use]
pub fn multipart_spec(mode: MultipartMode, upload_fields: &[String], sample: Option<&Value>) -> MultipartSpec {
    let fields = sample.map(query_pairs).unwrap_or_default();
    let field = upload_fields.first().cloned().unwrap_or_else(|| "file".into());
    let png = |field: String, bytes: Vec<u8>| FilePart {
        field,
        file_name: UPLOAD_NAME.into(),
        mime: "image/png".into(),
        bytes,
    };
    let file = match mode {
        MultipartMode::Valid => Some(png(field, UPLOAD_PNG.to_vec())),
        MultipartMode::MissingFile => None,
        MultipartMode::WrongField => Some(png("parity_unexpected".into(), UPLOAD_PNG.to_vec())),
        MultipartMode::EmptyFile => Some(png(field, Vec::new())),
        MultipartMode::WrongMime => Some(FilePart {
            field,
            file_name: "parity.exe".into(),
            mime: "application/x-msdownload".into(),
            bytes: b"MZ\x90\x00parity".to_vec(),
        }),
    };
    MultipartSpec { fields, file }
}

/// Sample of a request part, if the route declares one
#[must_use]
pub fn sample_of(shape: Option<&RequestShape>) -> Option<Value> {
    shape.map(|s| s.sample.clone())
}
