//! Testing utilities for the route-parity workspace
//!
//! Shared reference-server sources, descriptors, fixtures and observations.

#![allow(missing_docs)]

use parity_model::{
    AuthClassification, ColumnProfile, ColumnType, FieldShape, FixtureState, HttpMethod,
    Observation, ObservedStatus, ResponseBody, RouteDescriptor, SchemaShape, SourceLocation,
    StringFormat, TableProfile,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

/// Fastify entry point mounting two plugins
pub const FASTIFY_APP: &str = r"
import Fastify from 'fastify';
import bookingRoutes from './routes/bookings';
import webhookRoutes from './routes/webhooks';

const app = Fastify();
app.register(bookingRoutes, { prefix: '/api/bookings' });
app.register(webhookRoutes, { prefix: '/api' });
";

/// Fastify plugin with zod schemas and guards
pub const FASTIFY_BOOKINGS: &str = r"
import { z } from 'zod';
import { requireOwner, requireClient } from '../auth';

const CreateBooking = z.object({
  sessionId: z.string().uuid(),
  startTime: z.string().datetime(),
  endTime: z.string().datetime(),
  seats: z.number().int().min(1).max(10),
  notes: z.string().max(500).optional(),
});

const ListQuery = z.object({
  limit: z.coerce.number().int().positive().optional(),
  status: z.enum(['confirmed', 'cancelled']).optional(),
});

export default async function bookingRoutes(fastify) {
  fastify.addHook('onRequest', fastify.authenticate);

  fastify.get('/', { schema: { querystring: ListQuery } }, async () => []);
  fastify.post('/', { schema: { body: CreateBooking }, preHandler: [requireClient] }, async () => ({}));
  fastify.post('/:bookingId/cancel', { preHandler: requireOwner }, async () => ({}));
  fastify.delete('/:bookingId', { preHandler: requireOwner }, async () => ({}));
}
";

/// Webhook plugin with paths from a shared config map
pub const FASTIFY_WEBHOOKS: &str = r"
import { PATHS } from '../config/paths';

export default async function webhookRoutes(fastify) {
  fastify.post(PATHS.webhooks.stripe, { config: { auth: 'public' } }, async () => ({ received: true }));
  fastify.post(PATHS.webhooks.twilio, async () => ({ received: true }));
}
";

/// Shared path configuration
pub const CONFIG_PATHS: &str = r"
const base = '/webhooks';
export const PATHS = {
  webhooks: {
    stripe: `${base}/stripe`,
    twilio: base + '/twilio',
  },
};
";

/// Auth helpers (no routes)
pub const AUTH_HELPERS: &str = r"
export const requireOwner = requireRole('owner');
export const requireClient = requireRole('client');
";

/// Express router with middleware validation and uploads
pub const EXPRESS_CLIENTS: &str = r"
const express = require('express');
const router = express.Router();
const { authenticate, requireOwner } = require('../middleware/auth');

const UpdateClient = z.object({ email: z.string().email(), phone: z.string().optional() });

router.get('/clients/:clientId', authenticate, getClient);
router.patch('/clients/:clientId', authenticate, requireOwner, validate(UpdateClient), updateClient);
router.post('/clients/:clientId/avatar', authenticate, upload.single('avatar'), uploadAvatar);

module.exports = router;
";

/// Registrations the extractor must skip with a warning
pub const MALFORMED_ROUTES: &str = r"
export default async function broken(fastify) {
  fastify.get(computePath(), async () => ({}));
  fastify.get('/api/still-works', async () => ({}));
}
";

/// Reference tree as (relative path, contents)
#[must_use]
pub fn reference_sources() -> Vec<(&'static str, &'static str)> {
    vec![
        ("src/app.ts", FASTIFY_APP),
        ("src/auth.ts", AUTH_HELPERS),
        ("src/config/paths.ts", CONFIG_PATHS),
        ("src/routes/bookings.ts", FASTIFY_BOOKINGS),
        ("src/routes/webhooks.ts", FASTIFY_WEBHOOKS),
        ("src/legacy/clients.js", EXPRESS_CLIENTS),
        ("src/routes/bookings.test.ts", "fastify.get('/test-only', h);"),
        ("node_modules/pkg/index.js", "app.get('/vendored', h);"),
    ]
}

/// Write files into a fresh temporary directory
pub fn write_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, text) in files {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, text).unwrap();
    }
    dir
}

/// Read a file written by [`write_tree`]
pub fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel)).unwrap()
}

/// Descriptor without request shapes
pub fn descriptor(method: HttpMethod, path: &str, auth: AuthClassification) -> RouteDescriptor {
    RouteDescriptor {
        method,
        path_template: path.to_string(),
        auth,
        body: None,
        query: None,
        multipart_fields: Vec::new(),
        source: SourceLocation::default(),
    }
}

/// Booking creation body
pub fn booking_shape() -> SchemaShape {
    SchemaShape::Object {
        fields: vec![
            FieldShape::required("sessionId", SchemaShape::formatted(StringFormat::Uuid)),
            FieldShape::required("startTime", SchemaShape::formatted(StringFormat::DateTime)),
            FieldShape::required("endTime", SchemaShape::formatted(StringFormat::DateTime)),
            FieldShape::optional("notes", SchemaShape::string()),
        ],
    }
}

/// Fixture state with ids derived from `tag`
pub fn fixture_state(tag: &str) -> FixtureState {
    FixtureState {
        organization_id: format!("org-{tag}"),
        owner_id: format!("owner-{tag}"),
        owner_user_id: format!("owner-user-{tag}"),
        dependent_id: format!("dependent-{tag}"),
        dependent_user_id: format!("dependent-user-{tag}"),
        owner_email: format!("owner-{tag}@example.com"),
        dependent_email: format!("dependent-{tag}@example.com"),
        resource_ids: BTreeMap::new(),
    }
}

/// JSON response observation
pub fn json_observation(status: u16, body: Value) -> Observation {
    Observation {
        status: ObservedStatus::Code(status),
        body: ResponseBody::Json(body),
        content_type: Some("application/json".to_string()),
    }
}

/// Payments table profile
pub fn payments_profile() -> TableProfile {
    TableProfile {
        table: "payments".to_string(),
        columns: vec![
            ColumnProfile::new("id", ColumnType::Uuid),
            ColumnProfile::new("status", ColumnType::Enum).with_enum(vec![
                "pending".into(),
                "paid".into(),
                "refunded".into(),
            ]),
            ColumnProfile::new("amount", ColumnType::Integer),
            ColumnProfile::new("paid_at", ColumnType::Timestamp),
            ColumnProfile::new("is_disputed", ColumnType::Boolean),
        ],
    }
}
