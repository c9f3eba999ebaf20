//! Parity Extract
//!
//! Static recovery of route contracts from a reference server's source tree.
//! Sources are parsed with tree-sitter and never executed.
//!
//! For every route registration the extractor recovers the HTTP method, the
//! full path template (mount prefixes included), the auth classification,
//! the body and query schemas, and multipart field names.
//!
//! # Architecture
//!
//! ```text
//! source root ──walk──► SourceFile* ──► RouteSchemaExtractor
//!                                          │
//!                 tree-sitter CST ─lower─► Expr ─resolve─► Expr
//!                                          │                │
//!                                    AuthRules        SchemaReducer
//!                                          └──────┬─────────┘
//!                                                 ▼
//!                                   Extraction { routes, warnings }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use parity_extract::default_extractors;
//!
//! let extraction = default_extractors().extract_tree(Path::new("legacy/src"))?;
//! for route in &extraction.routes {
//!     println!("{} {:?}", route.key(), route.auth);
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod auth;
pub mod error;
pub mod extractors;
pub mod ir;
pub mod resolve;
pub mod schema;

pub use error::{ExtractError, ExtractResult, ExtractWarning};
pub use extractors::{
    default_extractors, Extraction, ExtractorRegistry, RouteSchemaExtractor, SourceFile,
    TypeScriptExtractor,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for running an extraction
    pub use crate::error::{ExtractError, ExtractResult, ExtractWarning};
    pub use crate::extractors::{
        default_extractors, Extraction, ExtractorRegistry, RouteSchemaExtractor,
        TypeScriptExtractor,
    };
}
