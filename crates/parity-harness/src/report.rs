//! Report emission
//!
//! One pretty-printed JSON document per run, named after its generation time,
//! plus a short console summary.

use crate::error::{HarnessError, HarnessResult};
use parity_model::Report;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of a report generated at `report.generated_at`
#[must_use]
pub fn file_name(report: &Report) -> String {
    format!("parity-report-{}.json", report.generated_at.format("%Y%m%d-%H%M%S"))
}

/// Write `report` under `dir`, creating it when missing
///
/// # Errors
/// Returns [`HarnessError::Report`] when the directory or file cannot be
/// written.
pub fn write(report: &Report, dir: &Path) -> HarnessResult<PathBuf> {
    let path = dir.join(file_name(report));
    let failed = |source: io::Error| HarnessError::Report {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(dir).map_err(failed)?;
    let json = serde_json::to_vec_pretty(report).map_err(|e| failed(e.into()))?;
    fs::write(&path, json).map_err(failed)?;
    info!(path = %path.display(), "report written");
    Ok(path)
}

/// Console summary: scenario totals, then one line per bucket
#[must_use]
pub fn summary(report: &Report, path: Option<&Path>) -> String {
    let counts = report.counts();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "compared {} scenarios across {} routes ({} skipped)",
        report.compared_scenarios,
        report.compared_routes,
        report.skipped_scenarios.len()
    );
    for (label, n) in [
        ("status", counts.status),
        ("body", counts.body),
        ("db", counts.db),
        ("error", counts.error),
        ("order", counts.order),
        ("row", counts.row),
    ] {
        let _ = writeln!(out, "  {label:<7}{n}");
    }
    if report.is_clean() {
        out.push_str("no mismatches\n");
    } else {
        let _ = writeln!(out, "{} mismatches", counts.total());
    }
    if let Some(path) = path {
        let _ = writeln!(out, "report: {}", path.display());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use parity_model::{MismatchBucket, MismatchRecord};
    use serde_json::json;

    fn report() -> Report {
        Report::new(Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap())
    }

    #[test]
    fn name_carries_timestamp() {
        assert_eq!(file_name(&report()), "parity-report-20260304-050607.json");
    }

    #[test]
    fn written_report_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = report();
        report.compared_routes = 1;
        report.compared_scenarios = 3;
        report.skip("GET /api/bookings", "state.cancelled", "no row");
        let path = write(&report, &dir.path().join("nested")).unwrap();
        assert!(path.ends_with("parity-report-20260304-050607.json"));
        let parsed: Report = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn summary_lists_every_bucket() {
        let mut report = report();
        report.record(
            MismatchBucket::Body,
            MismatchRecord::new("GET /api/bookings", "happy", json!({"a": 1}), json!({"a": 2})),
        );
        let text = summary(&report, Some(Path::new("out/r.json")));
        for label in ["status", "body", "db", "error", "order", "row"] {
            assert!(text.contains(label), "{label} missing");
        }
        assert!(text.contains("1 mismatches"));
        assert!(text.ends_with("report: out/r.json\n"));
        assert!(summary(&Report::new(Utc::now()), None).contains("no mismatches"));
    }
}
