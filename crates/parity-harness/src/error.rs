//! Error types for the harness
//!
//! Setup failures (configuration, environments, baseline fixtures) abort the
//! run before any report is written. Scenario-level failures (a variant that
//! cannot be applied, a request that cannot be built) collapse to a skipped
//! scenario at the runner boundary.

use parity_extract::ExtractError;
use parity_model::{ModelError, Side};
use parity_synth::SynthError;
use std::io;
use std::path::PathBuf;

/// Main harness error type
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Environment provisioning or launch failed
    #[error("environment error: {0}")]
    Environment(#[from] EnvironmentError),

    /// Baseline fixtures could not be created
    #[error("fixture seeding failed: {0}")]
    Seed(#[from] SeedError),

    /// Request could not be built or sent
    #[error("request failed: {0}")]
    Exec(#[from] ExecError),

    /// Variant could not be applied or restored
    #[error("variant failed: {0}")]
    Variant(#[from] VariantError),

    /// Route extraction failed
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),

    /// Database query failed
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Report could not be written
    #[error("cannot write report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File is not valid TOML for the configuration schema
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Values are inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create invalid configuration error
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid(reason.into())
    }
}

/// Environment orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    /// No free port near the configured base
    #[error("no free port in {base}..{end} after {attempts} attempts")]
    PortsExhausted { base: u16, end: u32, attempts: u16 },

    /// Server process could not be started
    #[error("cannot start {side} server: {source}")]
    Spawn {
        side: Side,
        #[source]
        source: io::Error,
    },

    /// Server never answered its liveness endpoint
    #[error("{side} server not ready after {waited_ms}ms\n--- legacy log ---\n{legacy_tail}\n--- candidate log ---\n{candidate_tail}")]
    NotReady {
        side: Side,
        waited_ms: u64,
        legacy_tail: String,
        candidate_tail: String,
    },

    /// Template database could not be prepared
    #[error("template {template}: {reason}")]
    Template { template: String, reason: String },

    /// Database administration statement failed
    #[error("{action}: {source}")]
    Database {
        action: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Log file could not be created
    #[error("cannot create log {path}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EnvironmentError {
    /// Create template error
    pub fn template(template: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Template {
            template: template.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a failed administration statement
    pub fn database(action: impl Into<String>) -> impl FnOnce(tokio_postgres::Error) -> Self {
        let action = action.into();
        move |source| Self::Database { action, source }
    }
}

/// Fixture seeding errors
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// Direct insertion of the actor graph failed
    #[error("actor pair {pair}: {source}")]
    Actors {
        pair: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Resource has no configuration
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    /// Resource dependencies loop back on themselves
    #[error("resource dependency cycle through '{0}'")]
    Cycle(String),

    /// Creation request was rejected
    #[error("seeding '{resource}' returned {status}")]
    Rejected { resource: String, status: String },

    /// Neither the response nor the table yielded an identifier
    #[error("no identifier for seeded '{0}'")]
    NoIdentifier(String),

    /// Creation request could not be sent
    #[error("seeding '{resource}': {source}")]
    Request {
        resource: String,
        #[source]
        source: ExecError,
    },

    /// Fallback lookup failed
    #[error("looking up '{resource}': {source}")]
    Lookup {
        resource: String,
        #[source]
        source: tokio_postgres::Error,
    },
}

/// Request building and transport errors
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// Request could not be assembled
    #[error("cannot build request: {0}")]
    Build(String),

    /// Body corruption could not be applied
    #[error("cannot corrupt body: {0}")]
    Mutation(#[from] SynthError),

    /// Transport failure other than a timeout
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// Webhook signature could not be computed
    #[error("signature: {0}")]
    Signature(String),
}

impl ExecError {
    /// Create build error
    pub fn build(reason: impl Into<String>) -> Self {
        Self::Build(reason.into())
    }
}

/// Variant application errors
#[derive(Debug, thiserror::Error)]
pub enum VariantError {
    /// Primary row could not be located
    #[error("no {table} row with id {id}")]
    NoRow { table: String, id: String },

    /// Row already holds the variant's values
    #[error("variant '{label}' leaves {table} row {id} unchanged")]
    Unchanged { label: String, table: String, id: String },

    /// Patch could not be planned against the row
    #[error(transparent)]
    Plan(#[from] ModelError),

    /// Update, insert or delete failed
    #[error("database: {0}")]
    Database(#[from] tokio_postgres::Error),
}

/// Result type alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_ready_shows_both_tails() {
        let err = EnvironmentError::NotReady {
            side: Side::Candidate,
            waited_ms: 30_000,
            legacy_tail: "listening on 4100".into(),
            candidate_tail: "Error: connect ECONNREFUSED".into(),
        };
        let text = err.to_string();
        assert!(text.starts_with("candidate server not ready after 30000ms"));
        assert!(text.contains("listening on 4100"));
        assert!(text.contains("ECONNREFUSED"));
    }

    #[test]
    fn nested_errors_convert() {
        let err: HarnessError = ConfigError::invalid("no servers").into();
        assert_eq!(err.to_string(), "configuration error: invalid configuration: no servers");
        let err: HarnessError = SeedError::UnknownResource("widget".into()).into();
        assert!(matches!(err, HarnessError::Seed(_)));
    }
}
