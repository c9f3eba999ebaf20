//! Mismatch records and the run report
//!
//! The report is assembled in memory and serialized once, after the run has
//! completed. Field names follow the published report format
//! (`comparedRoutes`, `bodyMismatches`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Mismatch category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchBucket {
    Status,
    Body,
    Db,
    Error,
    Order,
    Row,
}

impl MismatchBucket {
    /// All buckets in report order
    pub const ALL: [Self; 6] = [
        Self::Status,
        Self::Body,
        Self::Db,
        Self::Error,
        Self::Order,
        Self::Row,
    ];

    /// Report field name
    #[must_use]
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Status => "mismatches",
            Self::Body => "bodyMismatches",
            Self::Db => "dbMismatches",
            Self::Error => "errorMismatches",
            Self::Order => "orderMismatches",
            Self::Row => "rowMismatches",
        }
    }
}

impl fmt::Display for MismatchBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Status => "status",
            Self::Body => "body",
            Self::Db => "db",
            Self::Error => "error",
            Self::Order => "order",
            Self::Row => "row",
        })
    }
}

/// One behavioral difference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismatchRecord {
    /// `METHOD /api/path`
    pub route: String,
    pub scenario: String,
    pub legacy: Value,
    pub candidate: Value,
    /// Bucket-specific extra context (table names, columns, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    /// Raw request and responses, verbose mode only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

impl MismatchRecord {
    /// Record with legacy and candidate values
    #[must_use]
    pub fn new(
        route: impl Into<String>,
        scenario: impl Into<String>,
        legacy: Value,
        candidate: Value,
    ) -> Self {
        Self {
            route: route.into(),
            scenario: scenario.into(),
            legacy,
            candidate,
            detail: None,
            raw: None,
        }
    }

    /// With detail
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// With raw payloads
    #[inline]
    #[must_use]
    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }
}

/// Per-bucket totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCounts {
    pub status: usize,
    pub body: usize,
    pub db: usize,
    pub error: usize,
    pub order: usize,
    pub row: usize,
}

impl BucketCounts {
    /// Sum across buckets
    #[must_use]
    pub fn total(&self) -> usize {
        self.status + self.body + self.db + self.error + self.order + self.row
    }
}

/// Final run report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub compared_routes: usize,
    pub compared_scenarios: usize,
    pub skipped_scenarios: Vec<SkippedScenario>,
    pub mismatches: Vec<MismatchRecord>,
    pub body_mismatches: Vec<MismatchRecord>,
    pub db_mismatches: Vec<MismatchRecord>,
    pub error_mismatches: Vec<MismatchRecord>,
    pub order_mismatches: Vec<MismatchRecord>,
    pub row_mismatches: Vec<MismatchRecord>,
}

/// Scenario that ran in neither environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedScenario {
    pub route: String,
    pub scenario: String,
    pub reason: String,
}

impl Report {
    /// Empty report stamped with `generated_at`
    #[must_use]
    pub fn new(generated_at: DateTime<Utc>) -> Self {
        Self {
            generated_at,
            compared_routes: 0,
            compared_scenarios: 0,
            skipped_scenarios: Vec::new(),
            mismatches: Vec::new(),
            body_mismatches: Vec::new(),
            db_mismatches: Vec::new(),
            error_mismatches: Vec::new(),
            order_mismatches: Vec::new(),
            row_mismatches: Vec::new(),
        }
    }

    /// File one record
    pub fn record(&mut self, bucket: MismatchBucket, record: MismatchRecord) {
        self.bucket_mut(bucket).push(record);
    }

    /// File a skipped scenario
    pub fn skip(&mut self, route: impl Into<String>, scenario: impl Into<String>, reason: impl Into<String>) {
        self.skipped_scenarios.push(SkippedScenario {
            route: route.into(),
            scenario: scenario.into(),
            reason: reason.into(),
        });
    }

    /// Records of one bucket
    #[must_use]
    pub fn bucket(&self, bucket: MismatchBucket) -> &[MismatchRecord] {
        match bucket {
            MismatchBucket::Status => &self.mismatches,
            MismatchBucket::Body => &self.body_mismatches,
            MismatchBucket::Db => &self.db_mismatches,
            MismatchBucket::Error => &self.error_mismatches,
            MismatchBucket::Order => &self.order_mismatches,
            MismatchBucket::Row => &self.row_mismatches,
        }
    }

    fn bucket_mut(&mut self, bucket: MismatchBucket) -> &mut Vec<MismatchRecord> {
        match bucket {
            MismatchBucket::Status => &mut self.mismatches,
            MismatchBucket::Body => &mut self.body_mismatches,
            MismatchBucket::Db => &mut self.db_mismatches,
            MismatchBucket::Error => &mut self.error_mismatches,
            MismatchBucket::Order => &mut self.order_mismatches,
            MismatchBucket::Row => &mut self.row_mismatches,
        }
    }

    /// Per-bucket totals
    #[must_use]
    pub fn counts(&self) -> BucketCounts {
        BucketCounts {
            status: self.mismatches.len(),
            body: self.body_mismatches.len(),
            db: self.db_mismatches.len(),
            error: self.error_mismatches.len(),
            order: self.order_mismatches.len(),
            row: self.row_mismatches.len(),
        }
    }

    /// True when no bucket holds a record
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.counts().total() == 0
    }
}
