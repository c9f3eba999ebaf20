//! Parity Model
//!
//! Shared vocabulary of the route-parity harness. Every other crate speaks in
//! these types:
//!
//! - [`RouteDescriptor`]: static contract recovered for one `METHOD /path`
//! - [`ScenarioDescriptor`]: one named request variation of a route
//! - [`FixtureState`]: actor and resource identifiers of one environment
//! - [`DbVariant`]: a reversible column-level mutation of a resource row
//! - [`MismatchRecord`] / [`Report`]: the categorized output of a run
//!
//! # Architecture
//!
//! ```text
//! source tree → ExtractedRoute → RouteDescriptor → ScenarioDescriptor*
//!                                                       │
//!                               legacy ◄── Observation ─┴─ Observation ──► candidate
//!                                                       │
//!                                             MismatchRecord → Report
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod fixture;
pub mod introspect;
pub mod observation;
pub mod path;
pub mod report;
pub mod route;
pub mod scenario;
pub mod schema;
pub mod variant;

pub use error::{ModelError, ModelResult};
pub use fixture::{ActorKind, ActorPair, FixtureState};
pub use introspect::{ColumnProfile, ColumnType, ForeignKeyProfile, TableProfile};
pub use observation::{EnvCapture, Observation, ObservedStatus, ResponseBody, Side};
pub use path::{FieldPath, PathSegment};
pub use report::{BucketCounts, MismatchBucket, MismatchRecord, Report, SkippedScenario};
pub use route::{
    AuthClassification, ExtractedRoute, HttpMethod, RequestShape, RouteDescriptor, RouteKind,
    SourceLocation, TimeRangePair,
};
pub use scenario::{
    AuthMode, BodyMode, MultipartMode, MutationOp, ParamMode, QueryMode, ScenarioDescriptor,
    SignatureMode, StateMode,
};
pub use schema::{FieldShape, NumberShape, SchemaShape, StringFormat, StringShape};
pub use variant::{ColumnUpdate, DbVariant, VariantPatch, VariantSetup, VariantValue};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the parity model
    pub use crate::{
        AuthClassification, AuthMode, FieldPath, FixtureState, HttpMethod, MismatchBucket,
        MismatchRecord, Report, RouteDescriptor, ScenarioDescriptor, Side,
    };
}
