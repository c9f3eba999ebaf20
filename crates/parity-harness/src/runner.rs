//! Run orchestration
//!
//! ```text
//! extract ─► plan (+ variants from the schema cache) ─► filter
//!    │
//!    ▼
//! provision ─► seed actors ─► issue tokens
//!    │
//!    ▼  for each route, for each scenario (strictly sequential)
//! seed resources ─► variant on both ─► legacy capture ─► candidate capture ─► diff
//!    │
//!    ▼
//! teardown (always) ─► Report
//! ```
//!
//! A scenario that cannot be prepared, seeded or put into its DB variant is
//! skipped with a reason; it never aborts the run. Setup failures do.

use crate::cache::SchemaCache;
use crate::config::HarnessConfig;
use crate::db::PgCatalog;
use crate::environment::{Environment, EnvironmentPair, TeardownOptions};
use crate::error::{ExecError, HarnessResult, VariantError};
use crate::executor::{self, target_pair, ExecContext, CALLER};
use crate::fixtures::{self, resources_for_route, EnvFixtures, Seeder};
use crate::snapshot;
use crate::tokens::{TokenBook, TokenIssuer};
use crate::variants::{self, AppliedVariant, VariantStage};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parity_diff::{Differ, Normalizer, ScenarioComparison};
use parity_extract::{Extraction, ExtractorRegistry, TypeScriptExtractor};
use parity_model::{
    ActorPair, EnvCapture, ParamMode, Report, RouteDescriptor, RouteKind, ScenarioDescriptor,
};
use parity_synth::{RouteFilter, RoutePlan, ScenarioFilter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything a run needs besides the configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Source tree of the reference server
    pub reference: PathBuf,
    pub route_filter: Option<RouteFilter>,
    pub scenario_filter: Option<ScenarioFilter>,
    /// Embed requests and raw responses in mismatch records
    pub verbose: bool,
    /// Drop seeded resources before every route
    pub reseed: bool,
    /// Print one line per scenario to stderr
    pub progress: bool,
    pub teardown: TeardownOptions,
}

/// Extract routes from `reference` with the configured mount prefix
///
/// # Errors
/// Fails when the source root cannot be read.
pub fn extract(config: &HarnessConfig, reference: &Path) -> HarnessResult<Extraction> {
    let mut extractor = TypeScriptExtractor::new();
    if let Some(prefix) = &config.routes.prefix {
        extractor = extractor.with_prefix(prefix.clone());
    }
    let mut registry = ExtractorRegistry::new();
    registry.register(extractor);
    let extraction = registry.extract_tree(reference)?;
    for warning in &extraction.warnings {
        warn!(%warning, "route skipped");
    }
    info!(routes = extraction.routes.len(), skipped = extraction.warnings.len(), "routes extracted");
    Ok(extraction)
}

/// Apply both filters; routes left without scenarios are dropped
#[must_use]
pub fn select(
    plans: Vec<RoutePlan>,
    route_filter: Option<&RouteFilter>,
    scenario_filter: Option<&ScenarioFilter>,
) -> Vec<RoutePlan> {
    plans
        .into_iter()
        .filter(|plan| route_filter.map_or(true, |f| f.matches(&plan.route)))
        .filter_map(|mut plan| {
            if let Some(filter) = scenario_filter {
                plan.scenarios.retain(|s| filter.matches(s));
            }
            (!plan.scenarios.is_empty()).then_some(plan)
        })
        .collect()
}

/// Scenario matrices without live metadata (no `state.*` scenarios)
///
/// # Errors
/// Fails when extraction fails.
pub fn offline_plans(config: &HarnessConfig, options: &RunOptions) -> HarnessResult<Vec<RoutePlan>> {
    let extraction = extract(config, &options.reference)?;
    let plans = extraction.routes.iter().map(|r| parity_synth::plan(r, &[])).collect();
    Ok(select(plans, options.route_filter.as_ref(), options.scenario_filter.as_ref()))
}

/// Identifier of one run, safe inside database names
#[must_use]
pub fn run_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", now.format("%Y%m%d%H%M%S"), &suffix[..6])
}

/// Execute a full comparison run
///
/// Environments are torn down whatever the outcome; an aborted run keeps its
/// server logs.
///
/// # Errors
/// Fails on extraction, provisioning or baseline seeding problems. Scenario
/// failures are reported as skipped scenarios instead.
pub async fn run(config: &HarnessConfig, options: &RunOptions) -> HarnessResult<Report> {
    let extraction = extract(config, &options.reference)?;
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(ExecError::from)?;
    let id = run_id(Utc::now());
    info!(run = %id, "provisioning environments");
    let pair = EnvironmentPair::provision(config, &http, &id, options.teardown).await?;

    let outcome = drive(config, options, &http, &pair, &extraction).await;
    let teardown = if outcome.is_ok() {
        options.teardown
    } else {
        options.teardown.aborted()
    };
    pair.teardown(teardown).await;
    outcome
}

async fn drive(
    config: &HarnessConfig,
    options: &RunOptions,
    http: &reqwest::Client,
    pair: &EnvironmentPair,
    extraction: &Extraction,
) -> HarnessResult<Report> {
    let cache = SchemaCache::new(Arc::new(PgCatalog::new(Arc::clone(&pair.legacy.db))));
    let (legacy, candidate) = tokio::try_join!(
        fixtures::seed_actors(&pair.legacy, &config.fixtures),
        fixtures::seed_actors(&pair.candidate, &config.fixtures),
    )?;

    let mut plans = Vec::with_capacity(extraction.routes.len());
    for extracted in &extraction.routes {
        let route = parity_synth::sample::describe(extracted);
        if options.route_filter.as_ref().is_some_and(|f| !f.matches(&route)) {
            continue;
        }
        let variants = match snapshot::primary_resource(config, &route) {
            Some((_, resource)) => cache.variants(&resource.table).await?,
            None => Vec::new(),
        };
        plans.push(parity_synth::plan(extracted, &variants));
    }
    let plans = select(plans, options.route_filter.as_ref(), options.scenario_filter.as_ref());
    let total: usize = plans.iter().map(|p| p.scenarios.len()).sum();
    info!(routes = plans.len(), scenarios = total, "plan ready");

    let issued_at = Utc::now();
    let tokens = TokenBook::issue(
        &TokenIssuer::new(config.auth.clone(), issued_at),
        [(ActorPair::A, &legacy.a), (ActorPair::B, &legacy.b)],
    )?;
    let differ = Differ::new(
        Normalizer::new(config.diff.volatile_keys.clone()),
        config.diff.volatile_columns.clone(),
    );

    let mut session = Session {
        config,
        options,
        http,
        pair,
        cache,
        tokens,
        issued_at,
        differ,
        legacy,
        candidate,
        report: Report::new(Utc::now()),
        done: 0,
        total,
    };
    for plan in &plans {
        session.run_route(plan).await?;
    }
    let mut report = session.report;
    report.generated_at = Utc::now();
    Ok(report)
}

struct Session<'a> {
    config: &'a HarnessConfig,
    options: &'a RunOptions,
    http: &'a reqwest::Client,
    pair: &'a EnvironmentPair,
    cache: SchemaCache,
    tokens: TokenBook,
    issued_at: DateTime<Utc>,
    differ: Differ,
    legacy: EnvFixtures,
    candidate: EnvFixtures,
    report: Report,
    done: usize,
    total: usize,
}

/// Inputs shared by both captures of one scenario
struct Trial<'a> {
    ctx: ExecContext<'a>,
    http: &'a reqwest::Client,
    route: &'a RouteDescriptor,
    scenario: &'a ScenarioDescriptor,
    tables: &'a [String],
    /// Table and resource key of the addressed row
    primary: Option<(&'a str, &'a str)>,
    timeout: Duration,
    verbose: bool,
}

impl Session<'_> {
    async fn run_route(&mut self, plan: &RoutePlan) -> HarnessResult<()> {
        let route = &plan.route;
        let key = route.key();
        if self.options.reseed {
            self.legacy.reset();
            self.candidate.reset();
        }
        self.refresh_tokens()?;
        let tables = snapshot::tracked_tables(self.config, &self.cache, route).await?;

        let mut compared = 0;
        for scenario in &plan.scenarios {
            self.done += 1;
            if self.options.progress {
                eprintln!("[{}/{}] {key} {}", self.done, self.total, scenario.name);
            }
            match self.run_scenario(route, scenario, &tables).await {
                Ok(mismatches) => {
                    compared += 1;
                    debug!(route = %key, scenario = %scenario.name, mismatches, "scenario compared");
                    if mismatches > 0 && self.options.progress {
                        eprintln!("    {mismatches} mismatch(es)");
                    }
                }
                Err(err) => {
                    warn!(route = %key, scenario = %scenario.name, error = %err, "scenario skipped");
                    self.report.skip(key.as_str(), scenario.name.as_str(), err.to_string());
                }
            }
            self.forget_mutated(route);
        }
        if compared > 0 {
            self.report.compared_routes += 1;
        }
        self.report.compared_scenarios += compared;
        Ok(())
    }

    /// Re-issue tokens past half their lifetime
    fn refresh_tokens(&mut self) -> HarnessResult<()> {
        let now = Utc::now();
        if now - self.issued_at < ChronoDuration::seconds(self.config.auth.ttl_secs / 2) {
            return Ok(());
        }
        self.tokens = TokenBook::issue(
            &TokenIssuer::new(self.config.auth.clone(), now),
            [(ActorPair::A, &self.legacy.a), (ActorPair::B, &self.legacy.b)],
        )?;
        self.issued_at = now;
        info!("tokens re-issued");
        Ok(())
    }

    /// Mutating routes may have consumed their resource; seed it again next time
    fn forget_mutated(&mut self, route: &RouteDescriptor) {
        if !matches!(route.kind(), RouteKind::Update | RouteKind::Action | RouteKind::Delete) {
            return;
        }
        if let Some((key, _)) = snapshot::primary_resource(self.config, route) {
            self.legacy.forget(key);
            self.candidate.forget(key);
        }
    }

    async fn run_scenario(
        &mut self,
        route: &RouteDescriptor,
        scenario: &ScenarioDescriptor,
        tables: &[String],
    ) -> HarnessResult<usize> {
        let target = target_pair(scenario.state);
        let required = resources_for_route(self.config, route);
        let timeout = Duration::from_millis(self.config.timeouts.request_ms);
        let seeder = Seeder {
            config: self.config,
            http: self.http,
            cache: &self.cache,
            tokens: &self.tokens,
            timeout,
        };
        for pair in if target == CALLER { vec![CALLER] } else { vec![CALLER, target] } {
            tokio::try_join!(
                seeder.ensure_all(&self.pair.legacy, &mut self.legacy, pair, &required),
                seeder.ensure_all(&self.pair.candidate, &mut self.candidate, pair, &required),
            )?;
        }

        let not_found_id = Uuid::new_v4().to_string();
        let trial = Trial {
            ctx: ExecContext {
                config: self.config,
                cache: &self.cache,
                tokens: &self.tokens,
                not_found_id: &not_found_id,
                now: Utc::now(),
            },
            http: self.http,
            route,
            scenario,
            tables,
            primary: match scenario.params {
                ParamMode::Fixture => snapshot::primary_resource(self.config, route)
                    .map(|(key, resource)| (resource.table.as_str(), key)),
                ParamMode::NotFound | ParamMode::Malformed => None,
            },
            timeout,
            verbose: self.options.verbose,
        };

        let mut legacy_stage = EnvStage::prepare(&trial, &self.pair.legacy, &self.legacy).await?;
        let mut candidate_stage = EnvStage::prepare(&trial, &self.pair.candidate, &self.candidate).await?;
        let (legacy, candidate) = variants::bracketed(&mut legacy_stage, &mut candidate_stage).await?;

        let key = route.key();
        let comparison = ScenarioComparison {
            route: &key,
            scenario: &scenario.name,
            legacy: &legacy,
            candidate: &candidate,
            order_sensitive: self.config.order_sensitive(&key),
            verbose: self.options.verbose,
        };
        Ok(comparison.file_into(&self.differ, &mut self.report))
    }
}

fn primary_id<'p>(trial: &Trial<'p>, fixtures: &'p EnvFixtures) -> Result<(&'p str, &'p str), VariantError> {
    let (table, key) = trial.primary.ok_or_else(|| VariantError::NoRow {
        table: trial.route.key(),
        id: "<no addressed resource>".into(),
    })?;
    let id = fixtures
        .get(target_pair(trial.scenario.state))
        .lookup(key)
        .ok_or_else(|| VariantError::NoRow {
            table: table.to_string(),
            id: format!("<unseeded {key}>"),
        })?;
    Ok((table, id))
}

/// One environment's request for the current scenario
struct EnvStage<'a> {
    trial: &'a Trial<'a>,
    env: &'a Environment,
    fixtures: &'a EnvFixtures,
    request: executor::PreparedRequest,
}

impl<'a> EnvStage<'a> {
    async fn prepare(trial: &'a Trial<'a>, env: &'a Environment, fixtures: &'a EnvFixtures) -> HarnessResult<Self> {
        let request = executor::prepare(&trial.ctx, env, fixtures, trial.route, trial.scenario).await?;
        Ok(Self {
            trial,
            env,
            fixtures,
            request,
        })
    }
}

#[async_trait(?Send)]
impl VariantStage for EnvStage<'_> {
    type Applied = AppliedVariant;
    type Observed = EnvCapture;

    async fn apply(&mut self) -> HarnessResult<Option<AppliedVariant>> {
        let Some(variant) = &self.trial.scenario.db_variant else {
            return Ok(None);
        };
        let (table, id) = primary_id(self.trial, self.fixtures)?;
        Ok(Some(variants::apply(&self.env.db, table, id, variant, self.trial.ctx.now).await?))
    }

    async fn observe(&mut self) -> HarnessResult<EnvCapture> {
        let primary = match self.trial.primary {
            Some(_) => primary_id(self.trial, self.fixtures).ok(),
            None => None,
        };
        observe(self.trial, self.env, &self.request, primary).await
    }

    async fn restore(&mut self, applied: &AppliedVariant) -> HarnessResult<()> {
        Ok(variants::restore(&self.env.db, applied).await?)
    }
}

async fn observe(
    trial: &Trial<'_>,
    env: &Environment,
    request: &executor::PreparedRequest,
    primary: Option<(&str, &str)>,
) -> HarnessResult<EnvCapture> {
    let db = &env.db;
    let counts_before = snapshot::counts(db, trial.tables).await?;
    let row_before = addressed_row(db, primary).await?;
    let mut response = None;
    let mut counts_after_first = None;
    for delivery in 0..trial.scenario.repeat_count {
        response = Some(executor::send(trial.http, env, request, trial.timeout).await?);
        if trial.scenario.is_repeat() && delivery == 0 {
            counts_after_first = Some(snapshot::counts(db, trial.tables).await?);
        }
    }
    let counts_after = snapshot::counts(db, trial.tables).await?;
    let row_after = addressed_row(db, primary).await?;

    Ok(EnvCapture {
        response,
        counts_before,
        counts_after,
        counts_after_first,
        row_before,
        row_after,
        request: trial.verbose.then(|| request.to_value()),
    })
}

async fn addressed_row(
    db: &tokio_postgres::Client,
    primary: Option<(&str, &str)>,
) -> Result<Option<serde_json::Map<String, serde_json::Value>>, tokio_postgres::Error> {
    match primary {
        Some((table, id)) => snapshot::primary_row(db, table, id).await,
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parity_model::{AuthClassification, HttpMethod};
    use parity_test_utils::{reference_sources, write_tree};

    fn plan(method: HttpMethod, path: &str) -> RoutePlan {
        let mut extracted = parity_model::ExtractedRoute::new(method, path);
        extracted.auth = AuthClassification::Owner;
        parity_synth::plan(&extracted, &[])
    }

    #[test]
    fn selection_applies_both_filters() {
        let plans = vec![
            plan(HttpMethod::Get, "/api/bookings"),
            plan(HttpMethod::Delete, "/api/bookings/:id"),
            plan(HttpMethod::Get, "/api/clients"),
        ];
        let route = RouteFilter::new("/bookings");
        let scenario = ScenarioFilter::new("auth.*");
        let selected = select(plans.clone(), Some(&route), Some(&scenario));
        assert_eq!(selected.len(), 2);
        assert!(selected
            .iter()
            .all(|p| p.scenarios.iter().all(|s| s.name.starts_with("auth."))));

        let exact = ScenarioFilter::new("action.repeat");
        let selected = select(plans, None, Some(&exact));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].route.key(), "DELETE /api/bookings/:id");
    }

    #[test]
    fn run_ids_are_database_safe() {
        let id = run_id(Utc::now());
        assert_eq!(id.len(), 14 + 1 + 6);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase() || c == '_'));
        assert_ne!(id, run_id(Utc::now()));
    }

    #[test]
    fn offline_plans_from_reference_tree() {
        let dir = write_tree(&reference_sources());
        let options = RunOptions {
            reference: dir.path().to_path_buf(),
            route_filter: Some(RouteFilter::new("/bookings")),
            ..RunOptions::default()
        };
        let plans = offline_plans(&HarnessConfig::default(), &options).unwrap();
        assert!(!plans.is_empty());
        assert!(plans.iter().all(|p| p.route.path_template.contains("/bookings")));
        assert!(plans
            .iter()
            .all(|p| p.scenarios.iter().all(|s| s.db_variant.is_none())));
    }
}
