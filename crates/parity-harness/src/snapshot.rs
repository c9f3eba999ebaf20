//! Database snapshots around a scenario
//!
//! Row counts of every table a route plausibly touches, plus the full row of
//! the resource the route addresses.

use crate::cache::SchemaCache;
use crate::config::{HarnessConfig, ResourceConfig};
use crate::db;
use crate::error::HarnessResult;
use crate::executor::param_resource;
use crate::fixtures::resources_for_route;
use parity_diff::TableCounts;
use parity_model::RouteDescriptor;
use serde_json::{Map, Value};
use tokio_postgres::Client;

/// Tables counted for `route`, before existence filtering
///
/// Collections named by the path, the resources the route refers to, then
/// the configured side-effect tables.
#[must_use]
pub fn candidate_tables(config: &HarnessConfig, route: &RouteDescriptor) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    let mut push = |table: &str| {
        if !table.is_empty() && !tables.iter().any(|t| t == table) {
            tables.push(table.to_string());
        }
    };
    for segment in route.literal_segments() {
        if let Some((_, resource)) = config.resource_for_segment(segment) {
            push(&resource.table);
        }
    }
    for key in resources_for_route(config, route) {
        if let Some(resource) = config.resources.get(&key) {
            push(&resource.table);
        }
    }
    for table in &config.diff.side_effect_tables {
        push(table);
    }
    tables
}

/// Tables counted for `route` that exist in the schema
///
/// # Errors
/// Propagates catalog failures.
pub async fn tracked_tables(
    config: &HarnessConfig,
    cache: &SchemaCache,
    route: &RouteDescriptor,
) -> HarnessResult<Vec<String>> {
    let existing = cache.tables().await?;
    Ok(candidate_tables(config, route)
        .into_iter()
        .filter(|t| existing.contains(t))
        .collect())
}

/// Row counts of `tables`
///
/// # Errors
/// Propagates query failures.
pub async fn counts(client: &Client, tables: &[String]) -> Result<TableCounts, tokio_postgres::Error> {
    let mut out = TableCounts::new();
    for table in tables {
        out.insert(table.clone(), db::count_rows(client, table).await?);
    }
    Ok(out)
}

/// Resource addressed by the route's last path parameter
#[must_use]
pub fn primary_resource<'c>(config: &'c HarnessConfig, route: &RouteDescriptor) -> Option<(&'c str, &'c ResourceConfig)> {
    let param = route.path_params().into_iter().last()?;
    let key = param_resource(config, &route.path_template, param)?;
    config.resources.get_key_value(key).map(|(k, r)| (k.as_str(), r))
}

/// Full row of the primary resource, when it exists
///
/// # Errors
/// Propagates query failures.
pub async fn primary_row(
    client: &Client,
    table: &str,
    id: &str,
) -> Result<Option<Map<String, Value>>, tokio_postgres::Error> {
    db::fetch_row(client, table, id).await
}
