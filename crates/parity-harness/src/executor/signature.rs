//! Webhook signatures
//!
//! | Provider | Header value |
//! |---|---|
//! | Stripe  | `t=<unix>,v1=<hex hmac-sha256("<unix>.<payload>")>` |
//! | Twilio  | `base64(hmac-sha1(url + k1 + v1 + k2 + v2 ...))`, keys sorted |
//! | Generic | `hex(hmac-sha256(payload))` |
//!
//! Signatures depend only on the payload, the secret, the scenario clock and
//! (for Twilio) the request URL, so both environments receive equivalent
//! headers.

use crate::config::{ProviderConfig, WebhookConfig};
use crate::error::ExecError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use parity_model::SignatureMode;
use parity_synth::WebhookProvider;
use sha1::Sha1;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

/// Age in seconds of the timestamp in an expired signature
pub const EXPIRED_AGE_SECS: i64 = 3600;

/// HMAC-SHA256 of `data`
///
/// # Errors
/// Returns [`ExecError::Signature`] when the key is rejected.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ExecError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| ExecError::Signature(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC-SHA1 of `data`
///
/// # Errors
/// Returns [`ExecError::Signature`] when the key is rejected.
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<Vec<u8>, ExecError> {
    let mut mac = HmacSha1::new_from_slice(key).map_err(|e| ExecError::Signature(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Payload being signed
#[derive(Debug, Clone, Copy)]
pub enum SignedPayload<'a> {
    /// Raw body bytes
    Raw(&'a str),
    /// Form fields, signed with the target URL
    Form { url: &'a str, fields: &'a [(String, String)] },
}

/// Secret and header of a provider
#[must_use]
pub fn provider_config(webhooks: &WebhookConfig, provider: WebhookProvider) -> &ProviderConfig {
    match provider {
        WebhookProvider::Stripe => &webhooks.stripe,
        WebhookProvider::Twilio => &webhooks.twilio,
        WebhookProvider::Generic => &webhooks.generic,
    }
}

/// Header name and value for one delivery; `None` for a missing signature
///
/// An invalid signature is computed with a corrupted secret. An expired one
/// is correctly keyed but stamped [`EXPIRED_AGE_SECS`] in the past; providers
/// without a timestamp sign it as valid.
///
/// # Errors
/// Returns [`ExecError::Signature`] when the payload does not suit the
/// provider or the key is rejected.
pub fn sign(
    provider: WebhookProvider,
    config: &ProviderConfig,
    mode: SignatureMode,
    payload: SignedPayload<'_>,
    now: DateTime<Utc>,
) -> Result<Option<(String, String)>, ExecError> {
    let secret = match mode {
        SignatureMode::Missing => return Ok(None),
        SignatureMode::Invalid => format!("{}-tampered", config.secret),
        SignatureMode::Valid | SignatureMode::Expired => config.secret.clone(),
    };
    let value = match (provider, payload) {
        (WebhookProvider::Stripe, SignedPayload::Raw(body)) => {
            let at = if mode == SignatureMode::Expired {
                now - Duration::seconds(EXPIRED_AGE_SECS)
            } else {
                now
            };
            let ts = at.timestamp();
            let mac = hmac_sha256(secret.as_bytes(), format!("{ts}.{body}").as_bytes())?;
            format!("t={ts},v1={}", hex::encode(mac))
        }
        (WebhookProvider::Twilio, SignedPayload::Form { url, fields }) => {
            STANDARD.encode(hmac_sha1(secret.as_bytes(), twilio_signing_input(url, fields).as_bytes())?)
        }
        (WebhookProvider::Generic, SignedPayload::Raw(body)) => hex::encode(hmac_sha256(secret.as_bytes(), body.as_bytes())?),
        (provider, _) => {
            return Err(ExecError::Signature(format!(
                "{} signatures need a {} payload",
                provider.as_str(),
                if provider.is_form_encoded() { "form" } else { "raw" }
            )))
        }
    };
    Ok(Some((config.header.clone(), value)))
}

/// URL followed by every field name and value, fields sorted by name
#[must_use]
pub fn twilio_signing_input(url: &str, fields: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = fields.iter().collect();
    sorted.sort();
    let mut input = url.to_string();
    for (key, value) in sorted {
        input.push_str(key);
        input.push_str(value);
    }
    input
}
