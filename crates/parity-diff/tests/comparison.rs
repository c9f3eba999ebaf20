//! Scenario-level comparison and normalization properties

use chrono::Utc;
use parity_diff::{
    compare_row_deltas, row_delta, ArrayOrder, Differ, Normalizer, ScenarioComparison,
};
use parity_model::{EnvCapture, MismatchBucket, Report};
use parity_test_utils::json_observation;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

fn counts(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
    pairs.iter().map(|(t, n)| ((*t).to_string(), *n)).collect()
}

fn capture(status: u16, body: Value, before: &[(&str, i64)], after: &[(&str, i64)]) -> EnvCapture {
    EnvCapture {
        response: Some(json_observation(status, body)),
        counts_before: counts(before),
        counts_after: counts(after),
        ..EnvCapture::default()
    }
}

fn run(legacy: &EnvCapture, candidate: &EnvCapture, scenario: &str) -> Report {
    let mut report = Report::new(Utc::now());
    ScenarioComparison {
        route: "POST /api/bookings",
        scenario,
        legacy,
        candidate,
        order_sensitive: true,
        verbose: false,
    }
    .file_into(&Differ::default(), &mut report);
    report
}

#[test]
fn identical_create_is_clean() {
    let l = capture(
        201,
        json!({ "id": "0f8fad5b-d9cb-469f-a165-70867728950e", "status": "confirmed" }),
        &[("bookings", 0)],
        &[("bookings", 1)],
    );
    let c = capture(
        201,
        json!({ "id": "7c9e6679-7425-40de-944b-e07fc1f90ae7", "status": "confirmed" }),
        &[("bookings", 5)],
        &[("bookings", 6)],
    );
    assert!(run(&l, &c, "ok").is_clean());
}

#[test]
fn unauthenticated_with_side_effect_lands_in_db_bucket() {
    let l = capture(401, json!({ "error": "Unauthorized" }), &[("bookings", 0)], &[("bookings", 0)]);
    let c = capture(401, json!({ "error": "No token" }), &[("bookings", 0)], &[("bookings", 1)]);
    let report = run(&l, &c, "auth.none");
    assert_eq!(report.counts().db, 1);
    assert_eq!(report.counts().total(), 1);
    assert_eq!(report.db_mismatches[0].scenario, "auth.none");
    assert_eq!(report.db_mismatches[0].route, "POST /api/bookings");
}

#[test]
fn replay_window_is_compared_separately() {
    let mut l = capture(200, json!({ "received": true }), &[("payments", 0)], &[("payments", 1)]);
    let mut c = capture(200, json!({ "received": true }), &[("payments", 0)], &[("payments", 2)]);
    l.counts_after_first = Some(counts(&[("payments", 1)]));
    c.counts_after_first = Some(counts(&[("payments", 1)]));
    let report = run(&l, &c, "webhook.repeat");
    // total delta and replay delta both differ
    assert_eq!(report.counts().db, 2);
    let phases: Vec<Value> = report
        .db_mismatches
        .iter()
        .map(|r| r.detail.as_ref().unwrap()["phase"].clone())
        .collect();
    assert_eq!(phases, vec![json!("scenario"), json!("replay")]);
}

#[test]
fn verbose_records_embed_raw_payloads() {
    let l = capture(200, json!({ "a": 1 }), &[], &[]);
    let c = capture(500, json!({ "a": 1 }), &[], &[]);
    let records = ScenarioComparison {
        route: "GET /api/bookings",
        scenario: "ok",
        legacy: &l,
        candidate: &c,
        order_sensitive: false,
        verbose: true,
    }
    .records(&Differ::default());
    assert_eq!(records.len(), 1);
    let (bucket, record) = &records[0];
    assert_eq!(*bucket, MismatchBucket::Status);
    assert_eq!(record.raw.as_ref().unwrap()["candidate"]["response"]["status"], json!(500));
}

#[test]
fn row_changes_are_compared() {
    let row = |status: &str| -> Map<String, Value> {
        json!({ "status": status, "updated_at": "2030-01-01" }).as_object().cloned().unwrap()
    };
    let mut l = capture(200, json!({}), &[], &[]);
    let mut c = l.clone();
    l.row_before = Some(row("pending"));
    l.row_after = Some(row("cancelled"));
    c.row_before = Some(row("pending"));
    c.row_after = Some(row("pending"));
    let report = run(&l, &c, "action.repeat");
    assert_eq!(report.counts().row, 1);
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::from),
        (-1000.0f64..1000.0).prop_map(Value::from),
        prop_oneof![
            Just("0f8fad5b-d9cb-469f-a165-70867728950e".to_string()),
            Just("2030-01-01T10:00:00.000Z".to_string()),
            Just("createdAt".to_string()),
            "[a-z]{0,6}",
        ]
        .prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
            prop::collection::btree_map(
                prop_oneof![Just("createdAt".to_string()), Just("id".to_string()), "[a-z]{1,4}"],
                inner,
                0..5,
            )
            .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arb_row() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(
        prop_oneof![Just("updated_at".to_string()), "[a-z]{1,4}"],
        prop_oneof![Just(Value::Null), any::<i16>().prop_map(Value::from), "[a-z]{0,3}".prop_map(Value::String)],
        0..6,
    )
    .prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn normalize_is_idempotent(value in arb_json()) {
        let n = Normalizer::default();
        for order in [ArrayOrder::Ignore, ArrayOrder::Preserve] {
            let once = n.normalize(&value, order);
            prop_assert_eq!(n.normalize(&once, order), once);
        }
    }

    #[test]
    fn row_comparison_is_idempotent(
        lb in prop::option::of(arb_row()),
        la in prop::option::of(arb_row()),
        cb in prop::option::of(arb_row()),
        ca in prop::option::of(arb_row()),
    ) {
        let n = Normalizer::default();
        let ignored: BTreeSet<String> = ["updated_at".to_string()].into();
        let l = row_delta(lb.as_ref(), la.as_ref(), &ignored);
        let c = row_delta(cb.as_ref(), ca.as_ref(), &ignored);
        let first = compare_row_deltas(&n, &l, &c);
        prop_assert_eq!(compare_row_deltas(&n, &l, &c), first.clone());
        prop_assert!(compare_row_deltas(&n, &l, &l).is_none());
        prop_assert_eq!(first.is_none(), compare_row_deltas(&n, &c, &l).is_none());
    }
}
