//! Response comparison
//!
//! ```text
//! status differs                → status
//! both 2xx, normalized differs  → body
//! both 2xx, only order differs  → order   (order-sensitive routes only)
//! both ≥400, shape differs      → error
//! ```

use crate::normalize::{ArrayOrder, Normalizer};
use crate::Finding;
use parity_model::{MismatchBucket, Observation, ResponseBody};
use serde_json::{json, Value};

fn body_kind(body: &ResponseBody) -> &'static str {
    match body {
        ResponseBody::Json(_) => "json",
        ResponseBody::Text(_) => "text",
        ResponseBody::Empty => "empty",
    }
}

/// Compare the responses of one scenario
#[must_use]
pub fn compare_responses(
    normalizer: &Normalizer,
    legacy: &Observation,
    candidate: &Observation,
    order_sensitive: bool,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    if legacy.status != candidate.status {
        findings.push(Finding::new(
            MismatchBucket::Status,
            legacy.status.to_value(),
            candidate.status.to_value(),
        ));
    }

    if legacy.status.is_success() && candidate.status.is_success() {
        findings.extend(compare_bodies(normalizer, &legacy.body, &candidate.body, order_sensitive));
    } else if legacy.status.is_failure() && candidate.status.is_failure() {
        let l = normalizer.error_shape(&legacy.body.as_value());
        let c = normalizer.error_shape(&candidate.body.as_value());
        if l != c {
            findings.push(Finding::new(MismatchBucket::Error, l, c));
        }
    }
    findings
}

fn compare_bodies(
    normalizer: &Normalizer,
    legacy: &ResponseBody,
    candidate: &ResponseBody,
    order_sensitive: bool,
) -> Option<Finding> {
    let (lk, ck) = (body_kind(legacy), body_kind(candidate));
    let (lv, cv) = (legacy.as_value(), candidate.as_value());
    if lk != ck {
        return Some(
            Finding::new(
                MismatchBucket::Body,
                normalizer.normalize(&lv, ArrayOrder::Ignore),
                normalizer.normalize(&cv, ArrayOrder::Ignore),
            )
            .with_detail(json!({ "legacyKind": lk, "candidateKind": ck })),
        );
    }

    let l = normalizer.normalize(&lv, ArrayOrder::Ignore);
    let c = normalizer.normalize(&cv, ArrayOrder::Ignore);
    if l != c {
        return Some(Finding::new(MismatchBucket::Body, l, c));
    }
    if !order_sensitive {
        return None;
    }
    let l = normalizer.normalize(&lv, ArrayOrder::Preserve);
    let c = normalizer.normalize(&cv, ArrayOrder::Preserve);
    (l != c).then(|| Finding::new(MismatchBucket::Order, l, c))
}

/// Compact report form of an observation
#[must_use]
pub fn observation_value(observation: &Observation) -> Value {
    json!({
        "status": observation.status.to_value(),
        "contentType": observation.content_type,
        "body": observation.body.as_value(),
    })
}
