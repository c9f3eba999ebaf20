//! Parity Harness
//!
//! Runs two implementations of the same HTTP API side by side against
//! isolated databases and files every behavioral difference in a report.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────── HarnessConfig ────────────┐
//!                    ▼                                       ▼
//! reference src ─► runner ─► EnvironmentPair ─► legacy    (db clone, process, port)
//!                    │                      └─► candidate (db clone, process, port)
//!                    │
//!                    ├── fixtures   actors, lazily seeded resources
//!                    ├── tokens     signed bearer tokens per actor
//!                    ├── executor   request building, signing, delivery
//!                    ├── snapshot   row counts and addressed row
//!                    ├── variants   reversible row mutations
//!                    └── parity_diff ─► Report ─► report (JSON + console)
//! ```
//!
//! Scenarios run strictly one at a time: legacy first, then candidate, so
//! database snapshots never interleave.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod cache;
pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod executor;
pub mod fixtures;
pub mod logging;
pub mod report;
pub mod runner;
pub mod snapshot;
pub mod tokens;
pub mod variants;

pub use cache::SchemaCache;
pub use config::HarnessConfig;
pub use environment::{Environment, EnvironmentPair, TeardownOptions};
pub use error::{
    ConfigError, EnvironmentError, ExecError, HarnessError, HarnessResult, SeedError, VariantError,
};
pub use runner::{run, RunOptions};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a comparison run
    pub use crate::config::HarnessConfig;
    pub use crate::environment::TeardownOptions;
    pub use crate::error::{HarnessError, HarnessResult};
    pub use crate::runner::{run, RunOptions};
}
