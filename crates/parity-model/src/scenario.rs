//! Scenario descriptors and mutation operators
//!
//! A scenario is one named request variation. Each mode enum is one
//! variation axis; a scenario moves at most one axis away from the `ok`
//! baseline (repeat scenarios additionally set `repeat_count`).

use crate::path::FieldPath;
use crate::variant::DbVariant;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Credential presented with the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Token of the actor kind the route expects
    #[default]
    Valid,
    /// No Authorization header
    None,
    /// Syntactically plausible but unsigned token
    Invalid,
    /// Correctly signed token past its expiry
    Expired,
    /// Valid token of the actor kind the route does not admit
    WrongActor,
    /// Valid token of the second actor kind on an either-kind route
    AlternateActor,
}

/// Which actor pair's resources the request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StateMode {
    /// Resources owned by the caller's pair
    #[default]
    Primary,
    /// Resources owned by the other pair (cross-tenant access)
    OtherActor,
}

/// Closed set of value-tree corruptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    /// Remove the key
    DeleteKey { path: FieldPath },
    /// Replace the value with one of a different JSON type
    Retype { path: FieldPath },
    /// Replace an identifier with a non-identifier string
    InvalidId { path: FieldPath },
    /// Make a number negative
    Negate { path: FieldPath },
    /// Swap the start and end of a time range
    InvertRange { start: FieldPath, end: FieldPath },
    /// Overwrite with a fixed value (pagination edge cases)
    Replace { path: FieldPath, value: Value },
}

impl MutationOp {
    /// Path the operator primarily touches
    #[must_use]
    pub fn target(&self) -> &FieldPath {
        match self {
            Self::DeleteKey { path }
            | Self::Retype { path }
            | Self::InvalidId { path }
            | Self::Negate { path }
            | Self::Replace { path, .. } => path,
            Self::InvertRange { start, .. } => start,
        }
    }
}

/// Multipart upload variation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultipartMode {
    Valid,
    MissingFile,
    WrongField,
    EmptyFile,
    WrongMime,
}

/// Request body variation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BodyMode {
    /// Synthesized sample (or specialized builder)
    #[default]
    Sample,
    /// `{}`
    Empty,
    /// Valid JSON of the wrong top-level type
    WrongTopLevel,
    /// Sample with one corruption applied
    Mutated { op: MutationOp },
    /// Multipart payload
    Multipart { variant: MultipartMode },
}

/// Query string variation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QueryMode {
    #[default]
    Sample,
    /// No query string at all
    Missing,
    /// Every field replaced by garbage
    Invalid,
    Mutated { op: MutationOp },
}

/// Path parameter variation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParamMode {
    /// Identifiers of existing fixture resources
    #[default]
    Fixture,
    /// Fresh random identifiers
    NotFound,
    /// Type-invalid identifiers
    Malformed,
}

/// Webhook signature variation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMode {
    #[default]
    Valid,
    Invalid,
    Missing,
    Expired,
}

/// One named request variation of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDescriptor {
    pub name: String,
    pub auth: AuthMode,
    pub state: StateMode,
    pub body: BodyMode,
    pub query: QueryMode,
    pub params: ParamMode,
    pub signature: SignatureMode,
    pub repeat_count: u32,
    pub db_variant: Option<DbVariant>,
}

impl ScenarioDescriptor {
    /// Baseline scenario with every axis at its default
    #[must_use]
    pub fn baseline(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auth: AuthMode::Valid,
            state: StateMode::Primary,
            body: BodyMode::Sample,
            query: QueryMode::Sample,
            params: ParamMode::Fixture,
            signature: SignatureMode::Valid,
            repeat_count: 1,
            db_variant: None,
        }
    }

    /// With auth mode
    #[inline]
    #[must_use]
    pub fn with_auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }

    /// With state mode
    #[inline]
    #[must_use]
    pub fn with_state(mut self, state: StateMode) -> Self {
        self.state = state;
        self
    }

    /// With body mode
    #[inline]
    #[must_use]
    pub fn with_body(mut self, body: BodyMode) -> Self {
        self.body = body;
        self
    }

    /// With query mode
    #[inline]
    #[must_use]
    pub fn with_query(mut self, query: QueryMode) -> Self {
        self.query = query;
        self
    }

    /// With param mode
    #[inline]
    #[must_use]
    pub fn with_params(mut self, params: ParamMode) -> Self {
        self.params = params;
        self
    }

    /// With signature mode
    #[inline]
    #[must_use]
    pub fn with_signature(mut self, signature: SignatureMode) -> Self {
        self.signature = signature;
        self
    }

    /// With repeat count (at least one delivery)
    #[inline]
    #[must_use]
    pub fn with_repeat(mut self, count: u32) -> Self {
        self.repeat_count = count.max(1);
        self
    }

    /// With DB variant
    #[inline]
    #[must_use]
    pub fn with_variant(mut self, variant: DbVariant) -> Self {
        self.db_variant = Some(variant);
        self
    }

    /// Number of axes that differ from the baseline
    #[must_use]
    pub fn mutated_axes(&self) -> usize {
        let base = Self::baseline(self.name.clone());
        [
            self.auth != base.auth,
            self.state != base.state,
            self.body != base.body,
            self.query != base.query,
            self.params != base.params,
            self.signature != base.signature,
            self.db_variant.is_some(),
        ]
        .into_iter()
        .filter(|changed| *changed)
        .count()
    }

    /// True when the scenario delivers the same request more than once
    #[inline]
    #[must_use]
    pub fn is_repeat(&self) -> bool {
        self.repeat_count > 1
    }
}
