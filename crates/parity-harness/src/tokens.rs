//! Access tokens
//!
//! HS256 JSON Web Tokens signed with the secret both servers are started
//! with. Actor identifiers are identical in both environments, so one token
//! value is presented to both servers.

use crate::config::AuthConfig;
use crate::error::ExecError;
use crate::executor::signature::hmac_sha256;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parity_model::{ActorKind, ActorPair, AuthMode, FixtureState};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Secret used for the deliberately unverifiable token
const FORGED_SECRET: &[u8] = b"parity-forged-secret";

/// Tokens of one actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorTokens {
    pub valid: String,
    /// Correctly signed, expired an hour before issuance
    pub expired: String,
    /// Same claims signed with a different secret
    pub invalid: String,
}

impl ActorTokens {
    /// Token for an auth mode; `None` when no header is sent
    #[must_use]
    pub fn for_mode(&self, mode: AuthMode) -> Option<&str> {
        match mode {
            AuthMode::None => None,
            AuthMode::Invalid => Some(&self.invalid),
            AuthMode::Expired => Some(&self.expired),
            AuthMode::Valid | AuthMode::WrongActor | AuthMode::AlternateActor => Some(&self.valid),
        }
    }
}

/// Signs tokens for fixture actors
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    config: AuthConfig,
    issued_at: DateTime<Utc>,
}

impl TokenIssuer {
    /// Issuer whose tokens are stamped at `issued_at`
    #[must_use]
    pub fn new(config: AuthConfig, issued_at: DateTime<Utc>) -> Self {
        Self { config, issued_at }
    }

    /// Claims of `kind` in `state`, valid until `exp`
    #[must_use]
    pub fn claims(&self, state: &FixtureState, kind: ActorKind, exp: DateTime<Utc>) -> Map<String, Value> {
        let (user_id, actor_id) = match kind {
            ActorKind::Owner => (&state.owner_user_id, &state.owner_id),
            ActorKind::Dependent => (&state.dependent_user_id, &state.dependent_id),
        };
        let mut claims = Map::new();
        claims.insert(self.config.subject_claim.clone(), json!(user_id));
        claims.insert(self.config.role_claim.clone(), json!(self.config.role(kind)));
        claims.insert(self.config.organization_claim.clone(), json!(state.organization_id));
        claims.insert(self.config.actor_claim.clone(), json!(actor_id));
        claims.insert("email".into(), json!(state.email(kind)));
        claims.insert("iat".into(), json!(self.issued_at.timestamp()));
        claims.insert("exp".into(), json!(exp.timestamp()));
        claims
    }

    /// Valid, expired and forged tokens of one actor
    ///
    /// # Errors
    /// Returns [`ExecError::Signature`] when the secret is rejected.
    pub fn issue(&self, state: &FixtureState, kind: ActorKind) -> Result<ActorTokens, ExecError> {
        let secret = self.config.secret.as_bytes();
        let live = self.claims(state, kind, self.issued_at + Duration::seconds(self.config.ttl_secs));
        let mut stale = self.claims(state, kind, self.issued_at - Duration::hours(1));
        stale.insert("iat".into(), json!((self.issued_at - Duration::hours(2)).timestamp()));
        Ok(ActorTokens {
            valid: sign(&live, secret)?,
            expired: sign(&stale, secret)?,
            invalid: sign(&live, FORGED_SECRET)?,
        })
    }
}

/// Tokens of every actor of a run
///
/// Fixture identifiers are deterministic, so the book is issued once and
/// serves both environments.
#[derive(Debug, Clone, Default)]
pub struct TokenBook {
    tokens: HashMap<(ActorPair, ActorKind), ActorTokens>,
}

impl TokenBook {
    /// Issue tokens for both kinds of every given pair
    ///
    /// # Errors
    /// Returns [`ExecError::Signature`] when the secret is rejected.
    pub fn issue<'s>(
        issuer: &TokenIssuer,
        states: impl IntoIterator<Item = (ActorPair, &'s FixtureState)>,
    ) -> Result<Self, ExecError> {
        let mut tokens = HashMap::new();
        for (pair, state) in states {
            for kind in [ActorKind::Owner, ActorKind::Dependent] {
                tokens.insert((pair, kind), issuer.issue(state, kind)?);
            }
        }
        Ok(Self { tokens })
    }

    /// Tokens of one actor
    #[must_use]
    pub fn get(&self, pair: ActorPair, kind: ActorKind) -> Option<&ActorTokens> {
        self.tokens.get(&(pair, kind))
    }
}

/// Compact HS256 serialization of `claims`
///
/// # Errors
/// Returns [`ExecError::Signature`] when the secret is rejected.
pub fn sign(claims: &Map<String, Value>, secret: &[u8]) -> Result<String, ExecError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(Value::Object(claims.clone()).to_string());
    let signing_input = format!("{header}.{payload}");
    let signature = URL_SAFE_NO_PAD.encode(hmac_sha256(secret, signing_input.as_bytes())?);
    Ok(format!("{signing_input}.{signature}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use hmac::{Hmac, Mac};
    use parity_test_utils::fixture_state;
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(AuthConfig::default(), Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
    }

    fn verify(token: &str, secret: &[u8]) -> Option<Value> {
        let (signing_input, signature) = token.rsplit_once('.')?;
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(signing_input.as_bytes());
        mac.verify_slice(&URL_SAFE_NO_PAD.decode(signature).ok()?).ok()?;
        let payload = signing_input.split('.').nth(1)?;
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()
    }

    #[test]
    fn valid_token_verifies_with_claims() {
        let tokens = issuer().issue(&fixture_state("a"), ActorKind::Owner).unwrap();
        let claims = verify(&tokens.valid, b"parity-test-secret").unwrap();
        assert_eq!(claims["sub"], json!("owner-user-a"));
        assert_eq!(claims["role"], json!("owner"));
        assert_eq!(claims["organizationId"], json!("org-a"));
        assert_eq!(claims["actorId"], json!("owner-a"));
        assert_eq!(claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(), 3600);
    }

    #[test]
    fn expired_token_is_signed_but_past() {
        let i = issuer();
        let tokens = i.issue(&fixture_state("a"), ActorKind::Dependent).unwrap();
        let claims = verify(&tokens.expired, b"parity-test-secret").unwrap();
        assert!(claims["exp"].as_i64().unwrap() < i.issued_at.timestamp());
        assert_eq!(claims["role"], json!("client"));
    }

    #[test]
    fn forged_token_fails_verification() {
        let tokens = issuer().issue(&fixture_state("a"), ActorKind::Owner).unwrap();
        assert!(verify(&tokens.invalid, b"parity-test-secret").is_none());
        assert!(verify(&tokens.invalid, FORGED_SECRET).is_some());
    }

    #[test]
    fn issuance_is_deterministic() {
        let state = fixture_state("b");
        assert_eq!(
            issuer().issue(&state, ActorKind::Owner).unwrap(),
            issuer().issue(&state, ActorKind::Owner).unwrap()
        );
    }

    #[test]
    fn book_covers_both_pairs() {
        let (a, b) = (fixture_state("a"), fixture_state("b"));
        let book = TokenBook::issue(&issuer(), [(ActorPair::A, &a), (ActorPair::B, &b)]).unwrap();
        let a_owner = book.get(ActorPair::A, ActorKind::Owner).unwrap();
        let b_owner = book.get(ActorPair::B, ActorKind::Owner).unwrap();
        assert_ne!(a_owner.valid, b_owner.valid);
        assert!(book.get(ActorPair::B, ActorKind::Dependent).is_some());
    }

    #[test]
    fn modes_pick_tokens() {
        let tokens = issuer().issue(&fixture_state("a"), ActorKind::Owner).unwrap();
        assert_eq!(tokens.for_mode(AuthMode::None), None);
        assert_eq!(tokens.for_mode(AuthMode::Expired), Some(tokens.expired.as_str()));
        assert_eq!(tokens.for_mode(AuthMode::WrongActor), Some(tokens.valid.as_str()));
    }
}
