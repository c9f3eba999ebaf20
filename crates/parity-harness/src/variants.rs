//! Applying and restoring DB variants
//!
//! A variant is planned against the live row, written, and later reverted
//! from the originals recorded in its patch. An auxiliary row, when the
//! variant needs one, is inserted after the update and deleted first on
//! restore.
//!
//! ```text
//! legacy apply ─► candidate apply ─► legacy request ─► legacy restore
//!       ▲               │ fails                              │
//!       └─ restore ◄────┘                                    ▼
//!                                 candidate request ─► candidate restore
//! ```

use crate::db;
use crate::error::{HarnessResult, VariantError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parity_model::{DbVariant, VariantPatch};
use serde_json::{Map, Value};
use tokio_postgres::Client;
use tracing::{debug, warn};

/// A variant currently written to one environment
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedVariant {
    pub table: String,
    pub id: String,
    pub patch: VariantPatch,
    /// Table and id of the auxiliary row
    pub aux: Option<(String, String)>,
}

/// Planned patch and auxiliary row for the current row, without writing
///
/// # Errors
/// Returns [`VariantError::NoRow`] when the row is missing and
/// [`VariantError::Plan`] when the variant does not fit it.
pub async fn preflight(
    client: &Client,
    table: &str,
    id: &str,
    variant: &DbVariant,
    now: DateTime<Utc>,
) -> Result<(VariantPatch, Option<(String, Map<String, Value>)>), VariantError> {
    let row = db::fetch_row(client, table, id).await?;
    plan_against(row.as_ref(), table, id, variant, now)
}

/// Patch and auxiliary row for `row`, rejecting a variant the row is
/// already in
fn plan_against(
    row: Option<&Map<String, Value>>,
    table: &str,
    id: &str,
    variant: &DbVariant,
    now: DateTime<Utc>,
) -> Result<(VariantPatch, Option<(String, Map<String, Value>)>), VariantError> {
    let row = row.ok_or_else(|| VariantError::NoRow {
        table: table.to_string(),
        id: id.to_string(),
    })?;
    let patch = variant.plan(row, now)?;
    let setup = variant.plan_setup(row, &Value::String(id.to_string()), now)?;
    if patch.is_noop() && setup.is_none() {
        return Err(VariantError::Unchanged {
            label: variant.label.clone(),
            table: table.to_string(),
            id: id.to_string(),
        });
    }
    Ok((patch, setup))
}

/// Write `variant` to the row `table.id`
///
/// A failed auxiliary insert reverts the update before returning.
///
/// # Errors
/// Fails when the row is missing, the variant does not fit it or a statement
/// is rejected.
pub async fn apply(
    client: &Client,
    table: &str,
    id: &str,
    variant: &DbVariant,
    now: DateTime<Utc>,
) -> Result<AppliedVariant, VariantError> {
    let (patch, setup) = preflight(client, table, id, variant, now).await?;
    db::update_row(client, table, id, &patch.changed).await?;
    let aux = match setup {
        Some((aux_table, values)) => match db::insert_row(client, &aux_table, &values).await {
            Ok(aux_id) => Some((aux_table, aux_id)),
            Err(err) => {
                if let Err(revert) = db::update_row(client, table, id, &patch.original).await {
                    warn!(table, id, error = %revert, "cannot revert partially applied variant");
                }
                return Err(err.into());
            }
        },
        None => None,
    };
    debug!(table, id, variant = %variant.label, columns = ?patch.columns(), "variant applied");
    Ok(AppliedVariant {
        table: table.to_string(),
        id: id.to_string(),
        patch,
        aux,
    })
}

/// Put the row back the way [`apply`] found it
///
/// # Errors
/// Fails when a statement is rejected; the update is still attempted when
/// the auxiliary delete fails.
pub async fn restore(client: &Client, applied: &AppliedVariant) -> Result<(), VariantError> {
    let aux_result = match &applied.aux {
        Some((table, id)) => db::delete_row(client, table, id).await.map(|_| ()),
        None => Ok(()),
    };
    db::update_row(client, &applied.table, &applied.id, &applied.patch.original).await?;
    aux_result?;
    debug!(table = %applied.table, id = %applied.id, "variant restored");
    Ok(())
}

/// One environment's part of a scenario run under a variant
#[async_trait(?Send)]
pub trait VariantStage {
    type Applied;
    type Observed;

    /// Put the row into the variant; `None` when the scenario has none
    async fn apply(&mut self) -> HarnessResult<Option<Self::Applied>>;

    /// Send the request and capture what it did
    async fn observe(&mut self) -> HarnessResult<Self::Observed>;

    async fn restore(&mut self, applied: &Self::Applied) -> HarnessResult<()>;
}

/// Observe both environments, each under its own copy of the variant
///
/// Both rows are put into the variant before either request is sent, so an
/// environment that rejects it skips the scenario with nothing observed.
/// Legacy is observed and restored before the candidate request starts.
///
/// # Errors
/// The first failure; every variant already applied is restored before it
/// is returned.
pub async fn bracketed<S: VariantStage>(
    legacy: &mut S,
    candidate: &mut S,
) -> HarnessResult<(S::Observed, S::Observed)> {
    let legacy_applied = legacy.apply().await?;
    let candidate_applied = match candidate.apply().await {
        Ok(applied) => applied,
        Err(err) => {
            restore_quietly(legacy, legacy_applied.as_ref(), "legacy").await;
            return Err(err);
        }
    };

    let legacy_observed = match finish(legacy, legacy_applied.as_ref()).await {
        Ok(observed) => observed,
        Err(err) => {
            restore_quietly(candidate, candidate_applied.as_ref(), "candidate").await;
            return Err(err);
        }
    };
    let candidate_observed = finish(candidate, candidate_applied.as_ref()).await?;
    Ok((legacy_observed, candidate_observed))
}

async fn finish<S: VariantStage>(stage: &mut S, applied: Option<&S::Applied>) -> HarnessResult<S::Observed> {
    let observed = stage.observe().await;
    if let Some(applied) = applied {
        stage.restore(applied).await?;
    }
    observed
}

async fn restore_quietly<S: VariantStage>(stage: &mut S, applied: Option<&S::Applied>, side: &str) {
    if let Some(applied) = applied {
        if let Err(err) = stage.restore(applied).await {
            warn!(side, error = %err, "cannot restore variant after aborted scenario");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parity_model::ColumnUpdate;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Recorder {
        side: &'static str,
        log: Log,
        reject_apply: bool,
        fail_observe: bool,
    }

    impl Recorder {
        fn new(side: &'static str, log: &Log) -> Self {
            Self {
                side,
                log: Rc::clone(log),
                reject_apply: false,
                fail_observe: false,
            }
        }

        fn note(&self, step: &str) {
            self.log.borrow_mut().push(format!("{} {step}", self.side));
        }

        fn failure(&self) -> crate::error::HarnessError {
            VariantError::NoRow {
                table: "bookings".into(),
                id: self.side.into(),
            }
            .into()
        }
    }

    #[async_trait(?Send)]
    impl VariantStage for Recorder {
        type Applied = ();
        type Observed = &'static str;

        async fn apply(&mut self) -> HarnessResult<Option<()>> {
            self.note("apply");
            if self.reject_apply {
                return Err(self.failure());
            }
            Ok(Some(()))
        }

        async fn observe(&mut self) -> HarnessResult<&'static str> {
            self.note("request");
            if self.fail_observe {
                return Err(self.failure());
            }
            Ok(self.side)
        }

        async fn restore(&mut self, _applied: &()) -> HarnessResult<()> {
            self.note("restore");
            Ok(())
        }
    }

    fn steps(log: &Log) -> Vec<String> {
        log.borrow().clone()
    }

    #[tokio::test]
    async fn both_rows_change_before_either_request() {
        let log = Log::default();
        let (mut legacy, mut candidate) = (Recorder::new("legacy", &log), Recorder::new("candidate", &log));
        let observed = bracketed(&mut legacy, &mut candidate).await.unwrap();
        assert_eq!(observed, ("legacy", "candidate"));
        assert_eq!(
            steps(&log),
            vec![
                "legacy apply",
                "candidate apply",
                "legacy request",
                "legacy restore",
                "candidate request",
                "candidate restore",
            ]
        );
    }

    #[tokio::test]
    async fn candidate_rejection_sends_no_request() {
        let log = Log::default();
        let mut legacy = Recorder::new("legacy", &log);
        let mut candidate = Recorder::new("candidate", &log);
        candidate.reject_apply = true;
        assert!(bracketed(&mut legacy, &mut candidate).await.is_err());
        assert_eq!(steps(&log), vec!["legacy apply", "candidate apply", "legacy restore"]);
    }

    #[tokio::test]
    async fn legacy_rejection_leaves_candidate_untouched() {
        let log = Log::default();
        let mut legacy = Recorder::new("legacy", &log);
        legacy.reject_apply = true;
        let mut candidate = Recorder::new("candidate", &log);
        assert!(bracketed(&mut legacy, &mut candidate).await.is_err());
        assert_eq!(steps(&log), vec!["legacy apply"]);
    }

    #[tokio::test]
    async fn failed_legacy_request_restores_both() {
        let log = Log::default();
        let mut legacy = Recorder::new("legacy", &log);
        legacy.fail_observe = true;
        let mut candidate = Recorder::new("candidate", &log);
        assert!(bracketed(&mut legacy, &mut candidate).await.is_err());
        assert_eq!(
            steps(&log),
            vec!["legacy apply", "candidate apply", "legacy request", "legacy restore", "candidate restore"]
        );
    }

    fn booking(status: &str) -> Map<String, Value> {
        json!({"id": "b-1", "status": status})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn variant_matching_current_value_is_rejected() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let variant = DbVariant::new("status.confirmed", vec![ColumnUpdate::literal("status", "confirmed")]);

        let err = plan_against(Some(&booking("confirmed")), "bookings", "b-1", &variant, now).unwrap_err();
        assert!(matches!(err, VariantError::Unchanged { .. }), "{err}");

        let (patch, setup) = plan_against(Some(&booking("pending")), "bookings", "b-1", &variant, now).unwrap();
        assert_eq!(patch.changed["status"], json!("confirmed"));
        assert!(setup.is_none());
    }

    #[test]
    fn missing_row_is_reported() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let variant = DbVariant::new("status.confirmed", vec![ColumnUpdate::literal("status", "confirmed")]);
        let err = plan_against(None, "bookings", "b-9", &variant, now).unwrap_err();
        assert_eq!(err.to_string(), "no bookings row with id b-9");
    }
}
