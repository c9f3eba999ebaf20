//! Route contracts
//!
//! [`ExtractedRoute`] is what a source extractor recovers; the sample
//! synthesizer turns it into an immutable [`RouteDescriptor`], which is the
//! only route representation the rest of the harness depends on.

use crate::error::ModelError;
use crate::path::FieldPath;
use crate::schema::SchemaShape;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// HTTP method of a route
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Canonical upper-case name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// True for methods expected to change server state
    #[inline]
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Get)
    }

    /// True for methods that carry a request body
    #[inline]
    #[must_use]
    pub fn has_body(&self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" | "DEL" => Ok(Self::Delete),
            _ => Err(ModelError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// Which authenticated actors a route admits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthClassification {
    /// No credentials required
    #[default]
    Public,
    /// Organization owner only
    Owner,
    /// Dependent actor (client) only
    Dependent,
    /// Either actor kind
    Either,
}

impl AuthClassification {
    /// True when a token is required
    #[inline]
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        !matches!(self, Self::Public)
    }

    /// Union of admitted actors (`requireRole('owner', 'client')`)
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Public, x) | (x, Self::Public) => x,
            (a, b) if a == b => a,
            _ => Self::Either,
        }
    }

    /// Stack two guards on one route; each guard narrows who gets through
    ///
    /// Conflicting single-actor guards fall back to `Either`.
    #[must_use]
    pub fn restrict(self, other: Self) -> Self {
        match (self, other) {
            (Self::Public, x) | (x, Self::Public) => x,
            (Self::Either, x) | (x, Self::Either) => x,
            (a, b) if a == b => a,
            _ => Self::Either,
        }
    }
}

/// Where a route was registered
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    /// 1-based line
    pub line: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// Route as recovered from source, before sample synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRoute {
    pub method: HttpMethod,
    pub path_template: String,
    pub auth: AuthClassification,
    pub body: Option<SchemaShape>,
    pub query: Option<SchemaShape>,
    pub multipart_fields: Vec<String>,
    pub source: SourceLocation,
}

impl ExtractedRoute {
    /// Minimal route with no request shape
    #[must_use]
    pub fn new(method: HttpMethod, path_template: impl Into<String>) -> Self {
        Self {
            method,
            path_template: path_template.into(),
            auth: AuthClassification::Public,
            body: None,
            query: None,
            multipart_fields: Vec::new(),
            source: SourceLocation::default(),
        }
    }

    /// `METHOD /path` key
    #[must_use]
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.path_template)
    }
}

/// Start/end pair sharing a parent object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRangePair {
    pub start: FieldPath,
    pub end: FieldPath,
}

/// Synthesized view of one request part (body or query)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestShape {
    /// Representative value tree
    pub sample: Value,
    pub required_keys: BTreeSet<String>,
    pub identifier_paths: Vec<FieldPath>,
    pub numeric_paths: Vec<FieldPath>,
    pub time_ranges: Vec<TimeRangePair>,
}

/// Broad purpose of a route, derived from method and path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Read,
    Create,
    Update,
    /// State-changing verb on an existing resource (`/bookings/:id/cancel`)
    Action,
    Delete,
    Webhook,
}

/// Immutable route contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDescriptor {
    pub method: HttpMethod,
    pub path_template: String,
    pub auth: AuthClassification,
    pub body: Option<RequestShape>,
    pub query: Option<RequestShape>,
    pub multipart_fields: Vec<String>,
    pub source: SourceLocation,
}

impl RouteDescriptor {
    /// `METHOD /path` key used in reports
    #[must_use]
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.path_template)
    }

    /// Names of `:name` placeholders, in order
    #[must_use]
    pub fn path_params(&self) -> Vec<&str> {
        self.path_template
            .split('/')
            .filter_map(|seg| seg.strip_prefix(':'))
            .map(|seg| seg.trim_end_matches('?'))
            .collect()
    }

    /// Literal path segments (placeholders and the `api` prefix removed)
    #[must_use]
    pub fn literal_segments(&self) -> Vec<&str> {
        self.path_template
            .split('/')
            .filter(|seg| !seg.is_empty() && !seg.starts_with(':') && *seg != "api")
            .collect()
    }

    /// First literal segment, the resource collection the route serves
    #[must_use]
    pub fn resource_segment(&self) -> Option<&str> {
        self.literal_segments().into_iter().next()
    }

    /// True when the route accepts file uploads
    #[inline]
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        !self.multipart_fields.is_empty()
    }

    /// True when the path follows the webhook naming convention
    #[must_use]
    pub fn is_webhook(&self) -> bool {
        self.path_template
            .split('/')
            .any(|seg| seg.starts_with("webhook"))
    }

    /// Derive the route kind
    #[must_use]
    pub fn kind(&self) -> RouteKind {
        if self.is_webhook() {
            return RouteKind::Webhook;
        }
        let last = self
            .path_template
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        let ends_in_param = last.starts_with(':');
        let has_params = !self.path_params().is_empty();
        // Nested collections (`/clients/:id/notes`) read as plural nouns
        let nested_collection = !ends_in_param && last.ends_with('s');
        match self.method {
            HttpMethod::Get => RouteKind::Read,
            HttpMethod::Delete => RouteKind::Delete,
            HttpMethod::Post if !has_params || nested_collection => RouteKind::Create,
            // Uploads replace a file held by the parent (`/clients/:id/avatar`)
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch if self.is_multipart() => {
                RouteKind::Update
            }
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch if !ends_in_param => {
                RouteKind::Action
            }
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch => RouteKind::Update,
        }
    }
}

impl fmt::Display for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path_template)
    }
}
