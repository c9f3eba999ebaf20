//! Parity Diff
//!
//! Compares what the legacy and candidate environments did for one scenario
//! and files the differences as categorized [`MismatchRecord`]s.
//!
//! # Architecture
//!
//! ```text
//! EnvCapture (legacy) ─┐
//!                      ├─► Differ ─► Finding* ─► MismatchRecord ─► Report
//! EnvCapture (cand.)  ─┘
//!       │
//!       ├── response      compare::compare_responses   status / body / order / error
//!       ├── counts        counts::compare_deltas       db (scenario and replay windows)
//!       └── primary row   rowdiff::compare_row_deltas  row
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod compare;
pub mod counts;
pub mod normalize;
pub mod rowdiff;

pub use compare::compare_responses;
pub use counts::{compare_deltas, table_deltas, TableCounts};
pub use normalize::{ArrayOrder, Normalizer};
pub use rowdiff::{compare_row_deltas, row_delta, RowDelta};

use parity_model::{EnvCapture, MismatchBucket, MismatchRecord, Report};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracing::debug;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One difference before it is attached to a route and scenario
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    pub bucket: MismatchBucket,
    pub legacy: Value,
    pub candidate: Value,
    pub detail: Option<Value>,
}

impl Finding {
    /// Finding without detail
    #[must_use]
    pub fn new(bucket: MismatchBucket, legacy: Value, candidate: Value) -> Self {
        Self {
            bucket,
            legacy,
            candidate,
            detail: None,
        }
    }

    /// With detail
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Comparison settings shared by every scenario of a run
#[derive(Debug, Clone)]
pub struct Differ {
    normalizer: Normalizer,
    volatile_columns: BTreeSet<String>,
}

impl Default for Differ {
    fn default() -> Self {
        Self::new(
            Normalizer::default(),
            rowdiff::DEFAULT_VOLATILE_COLUMNS.iter().map(ToString::to_string),
        )
    }
}

impl Differ {
    /// Differ with explicit deny-lists
    pub fn new(normalizer: Normalizer, volatile_columns: impl IntoIterator<Item = String>) -> Self {
        Self {
            normalizer,
            volatile_columns: volatile_columns.into_iter().collect(),
        }
    }

    /// Body normalizer
    #[inline]
    #[must_use]
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Every finding for one scenario
    #[must_use]
    pub fn findings(&self, legacy: &EnvCapture, candidate: &EnvCapture, order_sensitive: bool) -> Vec<Finding> {
        let mut findings = Vec::new();

        if let (Some(l), Some(c)) = (&legacy.response, &candidate.response) {
            findings.extend(compare_responses(&self.normalizer, l, c, order_sensitive));
        }

        let l = table_deltas(&legacy.counts_before, &legacy.counts_after);
        let c = table_deltas(&candidate.counts_before, &candidate.counts_after);
        findings.extend(compare_deltas("scenario", &l, &c));

        // replay window: side effects of deliveries after the first
        if let (Some(lf), Some(cf)) = (&legacy.counts_after_first, &candidate.counts_after_first) {
            let l = table_deltas(lf, &legacy.counts_after);
            let c = table_deltas(cf, &candidate.counts_after);
            findings.extend(compare_deltas("replay", &l, &c));
        }

        let has_row = |e: &EnvCapture| e.row_before.is_some() || e.row_after.is_some();
        if has_row(legacy) || has_row(candidate) {
            let l = row_delta(legacy.row_before.as_ref(), legacy.row_after.as_ref(), &self.volatile_columns);
            let c = row_delta(candidate.row_before.as_ref(), candidate.row_after.as_ref(), &self.volatile_columns);
            findings.extend(compare_row_deltas(&self.normalizer, &l, &c));
        }

        findings
    }
}

/// Paired captures of one scenario, ready to be compared
#[derive(Debug, Clone, Copy)]
pub struct ScenarioComparison<'a> {
    /// `METHOD /api/path`
    pub route: &'a str,
    pub scenario: &'a str,
    pub legacy: &'a EnvCapture,
    pub candidate: &'a EnvCapture,
    /// Array order is compared (order bucket)
    pub order_sensitive: bool,
    /// Embed requests and raw responses in each record
    pub verbose: bool,
}

impl ScenarioComparison<'_> {
    /// Bucketed mismatch records
    #[must_use]
    pub fn records(&self, differ: &Differ) -> Vec<(MismatchBucket, MismatchRecord)> {
        differ
            .findings(self.legacy, self.candidate, self.order_sensitive)
            .into_iter()
            .map(|f| {
                let mut record = MismatchRecord::new(self.route, self.scenario, f.legacy, f.candidate);
                if let Some(detail) = f.detail {
                    record = record.with_detail(detail);
                }
                if self.verbose {
                    record = record.with_raw(json!({
                        "legacy": raw(self.legacy),
                        "candidate": raw(self.candidate),
                    }));
                }
                (f.bucket, record)
            })
            .collect()
    }

    /// File every record into `report`; returns how many were filed
    pub fn file_into(&self, differ: &Differ, report: &mut Report) -> usize {
        let records = self.records(differ);
        let filed = records.len();
        for (bucket, record) in records {
            report.record(bucket, record);
        }
        debug!(route = self.route, scenario = self.scenario, mismatches = filed, "compared");
        filed
    }
}

fn raw(capture: &EnvCapture) -> Value {
    json!({
        "request": capture.request,
        "response": capture.response.as_ref().map(compare::observation_value),
    })
}

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for response and state comparison
    pub use crate::normalize::{ArrayOrder, Normalizer};
    pub use crate::{Differ, Finding, ScenarioComparison};
}
