//! Parity Synth
//!
//! Turns extracted routes into runnable request matrices.
//!
//! # Architecture
//!
//! ```text
//! ExtractedRoute ──sample──► RouteDescriptor ──scenarios──► ScenarioMatrix
//!                              (rules)                ▲
//!                                                     │
//!                 TableProfile ──state/curated──► DbVariant*
//! ```
//!
//! - [`rules`]: data-driven name-sniffing tables
//! - [`sample`]: representative values and classified field paths
//! - [`mutation`]: the closed set of value-tree corruptions
//! - [`scenarios`]: the per-route scenario matrix
//! - [`state`] / [`curated`]: DB state variants of the primary resource

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod curated;
pub mod error;
pub mod filter;
pub mod mutation;
pub mod rules;
pub mod sample;
pub mod scenarios;
pub mod state;

pub use error::{SynthError, SynthResult};
pub use filter::{RouteFilter, ScenarioFilter};
pub use rules::WebhookProvider;
pub use scenarios::ScenarioMatrix;

use parity_model::{DbVariant, ExtractedRoute, RouteDescriptor, ScenarioDescriptor};
use serde::Serialize;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A route with its scenario matrix
#[derive(Debug, Clone, Serialize)]
pub struct RoutePlan {
    /// Descriptor built from the extracted route
    pub route: RouteDescriptor,
    /// Scenarios in synthesis order
    pub scenarios: Vec<ScenarioDescriptor>,
}

/// Describe a route and synthesize its scenarios
#[must_use]
pub fn plan(extracted: &ExtractedRoute, variants: &[DbVariant]) -> RoutePlan {
    let route = sample::describe(extracted);
    let scenarios = scenarios::synthesize(&route, variants).into_vec();
    RoutePlan { route, scenarios }
}

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for synthesis
    pub use crate::filter::{RouteFilter, ScenarioFilter};
    pub use crate::scenarios::{synthesize, ScenarioMatrix};
    pub use crate::state::variants_for;
    pub use crate::{plan, RoutePlan, SynthError, SynthResult};
}
