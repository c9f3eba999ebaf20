//! End-to-end extraction over on-disk source trees

use parity_extract::{ExtractorRegistry, TypeScriptExtractor};
use parity_model::{AuthClassification, ExtractedRoute, StringFormat, SchemaShape};
use parity_test_utils::{reference_sources, write_tree, MALFORMED_ROUTES};
use pretty_assertions::assert_eq;

fn registry(prefix: &str) -> ExtractorRegistry {
    let mut registry = ExtractorRegistry::new();
    registry.register(TypeScriptExtractor::new().with_prefix(prefix));
    registry
}

fn route<'a>(routes: &'a [ExtractedRoute], key: &str) -> &'a ExtractedRoute {
    routes
        .iter()
        .find(|r| r.key() == key)
        .unwrap_or_else(|| panic!("missing route {key}"))
}

#[test]
fn reference_tree_yields_every_route() {
    let dir = write_tree(&reference_sources());
    let out = registry("/api").extract_tree(dir.path()).unwrap();
    let keys: Vec<String> = out.routes.iter().map(ExtractedRoute::key).collect();
    assert_eq!(
        keys,
        vec![
            "GET /api/clients/:clientId",
            "PATCH /api/clients/:clientId",
            "POST /api/clients/:clientId/avatar",
            "GET /api/bookings",
            "POST /api/bookings",
            "POST /api/bookings/:bookingId/cancel",
            "DELETE /api/bookings/:bookingId",
            "POST /api/webhooks/stripe",
            "POST /api/webhooks/twilio",
        ]
    );
    assert!(out.warnings.is_empty(), "{:?}", out.warnings);
}

#[test]
fn auth_is_classified_per_route() {
    let dir = write_tree(&reference_sources());
    let out = registry("/api").extract_tree(dir.path()).unwrap();
    let auth = |key: &str| route(&out.routes, key).auth;
    assert_eq!(auth("GET /api/bookings"), AuthClassification::Either);
    assert_eq!(auth("POST /api/bookings"), AuthClassification::Dependent);
    assert_eq!(auth("DELETE /api/bookings/:bookingId"), AuthClassification::Owner);
    assert_eq!(auth("PATCH /api/clients/:clientId"), AuthClassification::Owner);
    assert_eq!(auth("POST /api/webhooks/stripe"), AuthClassification::Public);
}

#[test]
fn schemas_and_uploads_are_recovered() {
    let dir = write_tree(&reference_sources());
    let out = registry("/api").extract_tree(dir.path()).unwrap();

    let create = route(&out.routes, "POST /api/bookings");
    assert_eq!(
        create.body.as_ref().unwrap().required_keys(),
        vec!["sessionId", "startTime", "endTime", "seats"]
    );

    let list = route(&out.routes, "GET /api/bookings");
    assert!(list.query.as_ref().unwrap().required_keys().is_empty());

    let patch = route(&out.routes, "PATCH /api/clients/:clientId");
    let Some(SchemaShape::Object { fields }) = &patch.body else {
        panic!("object body expected");
    };
    assert_eq!(fields[0].name, "email");
    assert_eq!(fields[0].shape, SchemaShape::formatted(StringFormat::Email));

    let avatar = route(&out.routes, "POST /api/clients/:clientId/avatar");
    assert_eq!(avatar.multipart_fields, vec!["avatar"]);
}

#[test]
fn malformed_registration_is_skipped_with_warning() {
    let dir = write_tree(&[("src/broken.ts", MALFORMED_ROUTES)]);
    let out = registry("/").extract_tree(dir.path()).unwrap();
    let keys: Vec<String> = out.routes.iter().map(ExtractedRoute::key).collect();
    assert_eq!(keys, vec!["GET /api/still-works"]);
    assert_eq!(out.warnings.len(), 1);
    assert_eq!(out.warnings[0].line, 3);
}

#[test]
fn source_locations_are_relative() {
    let dir = write_tree(&reference_sources());
    let out = registry("/api").extract_tree(dir.path()).unwrap();
    let cancel = route(&out.routes, "POST /api/bookings/:bookingId/cancel");
    assert_eq!(cancel.source.file.to_string_lossy(), "src/routes/bookings.ts");
    assert!(cancel.source.line > 1);
}
