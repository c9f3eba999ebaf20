//! Environment orchestration
//!
//! An environment is one scratch database cloned from the template plus one
//! server process bound to it. The pair is provisioned together and torn
//! down together.
//!
//! ```text
//!   admin ──ensure_template──► template
//!     │                          │ CREATE DATABASE … TEMPLATE
//!     ├──────────────► <prefix>_<run>_legacy    ◄── legacy server :port
//!     └──────────────► <prefix>_<run>_candidate ◄── candidate server :port
//! ```
//!
//! Scratch databases are cloned one after the other: Postgres refuses a
//! clone while another session is attached to the template. Connections
//! and readiness polls run concurrently.

pub mod ports;
pub mod process;
pub mod template;

use crate::config::{database_url, HarnessConfig, ServerConfig};
use crate::db;
use crate::error::EnvironmentError;
use parity_model::Side;
use process::{ServerProcess, ServerSpec};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_postgres::Client;
use tracing::{info, warn};

/// Lines of each server log surfaced when a launch fails
pub const LOG_TAIL_LINES: usize = 40;

/// What teardown leaves behind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownOptions {
    pub keep_databases: bool,
    pub keep_logs: bool,
    pub drop_template: bool,
}

impl TeardownOptions {
    /// Options after an aborted run; logs always survive
    #[inline]
    #[must_use]
    pub fn aborted(self) -> Self {
        Self {
            keep_logs: true,
            ..self
        }
    }
}

/// One side of the comparison
pub struct Environment {
    pub side: Side,
    pub db_name: String,
    pub db: Arc<Client>,
    pub port: u16,
    pub base_url: String,
    pub log_path: PathBuf,
    process: Option<ServerProcess>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("side", &self.side)
            .field("db_name", &self.db_name)
            .field("base_url", &self.base_url)
            .field("log_path", &self.log_path)
            .finish_non_exhaustive()
    }
}

impl Environment {
    /// Absolute URL of `path` on this server
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Legacy and candidate environments of one run
pub struct EnvironmentPair {
    pub legacy: Environment,
    pub candidate: Environment,
    admin: Client,
    template: String,
    run_dir: PathBuf,
}

impl std::fmt::Debug for EnvironmentPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentPair")
            .field("legacy", &self.legacy)
            .field("candidate", &self.candidate)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl EnvironmentPair {
    /// Clone both databases, start both servers and wait until both answer
    ///
    /// Whatever was created before a failure is removed again; logs are kept.
    ///
    /// # Errors
    /// Fails on template, database, port or launch problems. A launch that
    /// never becomes ready yields [`EnvironmentError::NotReady`] carrying both
    /// log tails.
    pub async fn provision(
        config: &HarnessConfig,
        http: &reqwest::Client,
        run_id: &str,
        options: TeardownOptions,
    ) -> Result<Self, EnvironmentError> {
        let admin = db::connect(&config.database.admin_url)
            .await
            .map_err(EnvironmentError::database("connecting to the admin database"))?;
        let status = template::ensure_template(&admin, &config.database).await?;
        info!(template = %config.database.template, ?status, "template ready");

        let name = |side: Side| format!("{}_{}_{}", config.database.scratch_prefix, run_id, side);
        let (legacy_db, candidate_db) = (name(Side::Legacy), name(Side::Candidate));
        let template_name = config.database.template.as_str();

        template::create_database(&admin, &legacy_db, template_name).await?;
        if let Err(err) = template::create_database(&admin, &candidate_db, template_name).await {
            drop_quietly(&admin, &legacy_db).await;
            return Err(err);
        }

        let url = |db: &str| database_url(&config.database.admin_url, db);
        let (legacy_url, candidate_url) = (url(&legacy_db), url(&candidate_db));
        let clients = tokio::try_join!(db::connect(&legacy_url), db::connect(&candidate_url));
        let (legacy_client, candidate_client) = match clients {
            Ok(pair) => pair,
            Err(source) => {
                drop_quietly(&admin, &legacy_db).await;
                drop_quietly(&admin, &candidate_db).await;
                return Err(EnvironmentError::Database {
                    action: "connecting to scratch databases".into(),
                    source,
                });
            }
        };

        let run_dir = config.output.log_dir.join(run_id);
        let environment = |side: Side, db_name: String, client: Client| Environment {
            side,
            log_path: run_dir.join(format!("{side}.log")),
            db_name,
            db: Arc::new(client),
            port: 0,
            base_url: String::new(),
            process: None,
        };
        let mut pair = Self {
            legacy: environment(Side::Legacy, legacy_db, legacy_client),
            candidate: environment(Side::Candidate, candidate_db, candidate_client),
            admin,
            template: config.database.template.clone(),
            run_dir: run_dir.clone(),
        };

        if let Err(err) = pair.launch(config, http).await {
            pair.teardown(options.aborted()).await;
            return Err(err);
        }
        Ok(pair)
    }

    async fn launch(&mut self, config: &HarnessConfig, http: &reqwest::Client) -> Result<(), EnvironmentError> {
        let servers = &config.servers;
        let (legacy_port, candidate_port) = ports::allocate_pair(
            &servers.host,
            servers.legacy.base_port,
            servers.candidate.base_port,
            servers.port_attempts,
        )
        .await?;

        for (env, server, port) in [
            (&mut self.legacy, &servers.legacy, legacy_port),
            (&mut self.candidate, &servers.candidate, candidate_port),
        ] {
            env.port = port;
            env.base_url = format!("http://{}:{port}", servers.host);
            let spec = ServerSpec {
                side: env.side,
                command: server.command.clone(),
                working_dir: server.working_dir.clone(),
                env: server_env(config, server, &env.db_name, port),
                log_path: env.log_path.clone(),
            };
            env.process = Some(ServerProcess::spawn(&spec)?);
        }

        let timeout = Duration::from_millis(config.timeouts.readiness_ms);
        let poll = Duration::from_millis(config.timeouts.poll_ms);
        let legacy_url = self.legacy.url(&servers.readiness_path);
        let candidate_url = self.candidate.url(&servers.readiness_path);
        let (legacy_ready, candidate_ready) = tokio::join!(
            process::wait_ready(http, &legacy_url, timeout, poll, self.legacy.process.as_mut()),
            process::wait_ready(http, &candidate_url, timeout, poll, self.candidate.process.as_mut()),
        );

        let failed = match (legacy_ready, candidate_ready) {
            (Some(l), Some(c)) => {
                info!(legacy_ms = l.as_millis(), candidate_ms = c.as_millis(), "servers ready");
                return Ok(());
            }
            (None, _) => Side::Legacy,
            (Some(_), None) => Side::Candidate,
        };
        Err(EnvironmentError::NotReady {
            side: failed,
            waited_ms: config.timeouts.readiness_ms,
            legacy_tail: process::log_tail(&self.legacy.log_path, LOG_TAIL_LINES),
            candidate_tail: process::log_tail(&self.candidate.log_path, LOG_TAIL_LINES),
        })
    }

    /// Environment of one side
    #[must_use]
    pub fn side(&self, side: Side) -> &Environment {
        match side {
            Side::Legacy => &self.legacy,
            Side::Candidate => &self.candidate,
        }
    }

    /// Directory holding this run's server logs
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Stop both servers and release everything `options` does not keep
    ///
    /// Every step runs even when an earlier one fails; failures are logged.
    pub async fn teardown(self, options: TeardownOptions) {
        let Self {
            legacy,
            candidate,
            admin,
            template,
            run_dir,
        } = self;

        let stop = |process: Option<ServerProcess>| async move {
            if let Some(p) = process {
                p.terminate().await;
            }
        };
        tokio::join!(stop(legacy.process), stop(candidate.process));

        // our own sessions close first; stray ones are forced off by the drop
        drop(legacy.db);
        drop(candidate.db);

        if options.keep_databases {
            info!(legacy = %legacy.db_name, candidate = %candidate.db_name, "keeping scratch databases");
        } else {
            futures::future::join_all(
                [&legacy.db_name, &candidate.db_name]
                    .into_iter()
                    .map(|name| drop_quietly(&admin, name)),
            )
            .await;
        }
        if options.drop_template {
            drop_quietly(&admin, &template).await;
        }
        if options.keep_logs {
            info!(dir = %run_dir.display(), "server logs kept");
        } else if let Err(err) = std::fs::remove_dir_all(&run_dir) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %run_dir.display(), error = %err, "cannot delete server logs");
            }
        }
    }
}

async fn drop_quietly(admin: &Client, name: &str) {
    if let Err(err) = template::drop_database(admin, name).await {
        warn!(database = name, error = %err, "cleanup failed");
    }
}

/// Environment handed to a server process
///
/// Harness-provided variables first, then the server's configured extras,
/// which may override them.
#[must_use]
pub fn server_env(config: &HarnessConfig, server: &ServerConfig, db_name: &str, port: u16) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert(
        config.servers.database_url_var.clone(),
        database_url(&config.database.admin_url, db_name),
    );
    env.insert(config.servers.port_var.clone(), port.to_string());
    env.insert(config.auth.secret_env.clone(), config.auth.secret.clone());
    for provider in [&config.webhooks.stripe, &config.webhooks.twilio, &config.webhooks.generic] {
        env.insert(provider.secret_env.clone(), provider.secret.clone());
    }
    env.extend(server.env.clone());
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_env_layers_overrides() {
        let config = HarnessConfig::default().with_admin_url("postgres://u:p@db:5432/postgres");
        let mut server = config.servers.candidate.clone();
        server.env.insert("NODE_ENV".into(), "test".into());
        server.env.insert("PORT".into(), "9999".into());
        let env = server_env(&config, &server, "parity_x_candidate", 4200);
        assert_eq!(env["DATABASE_URL"], "postgres://u:p@db:5432/parity_x_candidate");
        assert_eq!(env["JWT_SECRET"], "parity-test-secret");
        assert_eq!(env["STRIPE_WEBHOOK_SECRET"], "whsec_parity");
        assert_eq!(env["NODE_ENV"], "test");
        assert_eq!(env["PORT"], "9999");
    }

    #[test]
    fn aborted_runs_keep_logs() {
        let options = TeardownOptions {
            keep_databases: true,
            ..TeardownOptions::default()
        };
        assert!(options.aborted().keep_logs);
        assert!(options.aborted().keep_databases);
    }
}
