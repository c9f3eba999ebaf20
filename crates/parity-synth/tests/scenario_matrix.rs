//! Scenario-matrix properties over generated routes

use parity_model::{
    AuthClassification, FieldShape, HttpMethod, NumberShape, SchemaShape, StringFormat,
};
use parity_synth::{sample, scenarios, state};
use parity_test_utils::{booking_shape, descriptor, payments_profile};
use proptest::prelude::*;
use std::collections::HashSet;

fn leaf() -> impl Strategy<Value = SchemaShape> {
    prop_oneof![
        Just(SchemaShape::string()),
        Just(SchemaShape::formatted(StringFormat::Uuid)),
        Just(SchemaShape::formatted(StringFormat::DateTime)),
        Just(SchemaShape::Number(NumberShape::default())),
        Just(SchemaShape::Boolean),
        Just(SchemaShape::Unknown),
    ]
}

fn field_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("id".to_string()),
        Just("clientId".to_string()),
        Just("startTime".to_string()),
        Just("endTime".to_string()),
        Just("from".to_string()),
        Just("to".to_string()),
        Just("limit".to_string()),
        Just("page".to_string()),
        Just("amount".to_string()),
        Just("notes".to_string()),
        "[a-z]{1,6}",
    ]
}

fn object() -> impl Strategy<Value = SchemaShape> {
    let field = (field_name(), leaf(), any::<bool>()).prop_map(|(name, shape, optional)| {
        if optional {
            FieldShape::optional(name, shape)
        } else {
            FieldShape::required(name, shape)
        }
    });
    prop::collection::vec(field, 0..8).prop_map(|fields| {
        let mut seen = HashSet::new();
        let fields = fields
            .into_iter()
            .filter(|f| seen.insert(f.name.clone()))
            .collect();
        SchemaShape::Object { fields }
    })
}

fn method() -> impl Strategy<Value = HttpMethod> {
    prop_oneof![
        Just(HttpMethod::Get),
        Just(HttpMethod::Post),
        Just(HttpMethod::Put),
        Just(HttpMethod::Patch),
        Just(HttpMethod::Delete),
    ]
}

fn auth() -> impl Strategy<Value = AuthClassification> {
    prop_oneof![
        Just(AuthClassification::Public),
        Just(AuthClassification::Owner),
        Just(AuthClassification::Dependent),
        Just(AuthClassification::Either),
    ]
}

proptest! {
    #[test]
    fn names_are_unique_and_single_axis(
        method in method(),
        auth in auth(),
        path in prop_oneof![
            Just("/api/bookings"),
            Just("/api/bookings/:id"),
            Just("/api/bookings/:id/cancel"),
            Just("/api/webhooks/stripe"),
        ],
        body in prop::option::of(object()),
        query in prop::option::of(object()),
    ) {
        let mut route = descriptor(method, path, auth);
        route.body = body.as_ref().map(sample::synthesize);
        route.query = query.as_ref().map(sample::synthesize);
        let variants = state::variants_for(&payments_profile(), |_| true);
        let matrix = scenarios::synthesize(&route, &variants);

        let list = matrix.clone().into_vec();
        let names: HashSet<&str> = list.iter().map(|s| s.name.as_str()).collect();
        prop_assert_eq!(names.len(), list.len());
        prop_assert_eq!(list[0].name.as_str(), "ok");
        for s in &list {
            prop_assert!(s.mutated_axes() <= 1, "{} touches {} axes", s.name, s.mutated_axes());
        }
    }

    #[test]
    fn synthesis_is_deterministic(shape in object()) {
        prop_assert_eq!(sample::synthesize(&shape), sample::synthesize(&shape));
    }
}

#[test]
fn booking_create_matrix_covers_every_axis() {
    let mut route = descriptor(HttpMethod::Post, "/api/bookings", AuthClassification::Dependent);
    route.body = Some(sample::synthesize(&booking_shape()));
    let matrix = scenarios::synthesize(&route, &[]);
    for expected in [
        "ok",
        "auth.none",
        "auth.wrong_actor",
        "auth.cross_tenant",
        "body.missing.sessionId",
        "body.invalid_id.sessionId",
        "body.inverted_range.startTime",
        "create.repeat",
    ] {
        assert!(matrix.get(expected).is_some(), "missing {expected}");
    }
}

#[test]
fn payment_variants_feed_state_scenarios() {
    let route = descriptor(HttpMethod::Get, "/api/payments/:id", AuthClassification::Owner);
    let variants = state::variants_for(&payments_profile(), |_| false);
    let matrix = scenarios::synthesize(&route, &variants);
    assert!(matrix.get("state.paid").is_some());
    assert!(matrix.get("state.refunded_full").is_some());
    assert!(matrix.get("state.is_disputed.toggled").is_none());
    assert!(matrix.get("state.status.pending").is_some());
    assert!(matrix.get("state.paid_at.future").is_some());
}
