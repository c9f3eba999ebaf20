//! Template database management
//!
//! Scratch databases are cloned from one migrated template. The template
//! carries a fingerprint of the migrations directory as its database comment;
//! a missing template, or one whose comment no longer matches, is rebuilt by
//! running the configured setup command against it.

use crate::config::{database_url, DatabaseConfig};
use crate::db::{quote_ident, sql_literal};
use crate::error::EnvironmentError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio_postgres::Client;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Fingerprint prefix stored in the database comment
const FINGERPRINT_PREFIX: &str = "parity-fingerprint:";

/// What [`ensure_template`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateStatus {
    /// Existing template matched
    Reused,
    /// Template was created or rebuilt
    Built,
}

/// SHA-256 over every file under `dir`, in path order
///
/// Relative paths are hashed together with contents, so renames change the
/// fingerprint too.
///
/// # Errors
/// Fails when a file cannot be read.
pub fn fingerprint(dir: &Path) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        hasher.update(rel.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(std::fs::read(entry.path())?);
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// True when database `name` exists
///
/// # Errors
/// Propagates query failures.
pub async fn database_exists(admin: &Client, name: &str) -> Result<bool, EnvironmentError> {
    let row = admin
        .query_opt("SELECT 1 FROM pg_database WHERE datname = $1", &[&name])
        .await
        .map_err(EnvironmentError::database(format!("looking up database {name}")))?;
    Ok(row.is_some())
}

async fn comment(admin: &Client, name: &str) -> Result<Option<String>, EnvironmentError> {
    let row = admin
        .query_opt(
            "SELECT shobj_description(oid, 'pg_database') FROM pg_database WHERE datname = $1",
            &[&name],
        )
        .await
        .map_err(EnvironmentError::database(format!("reading comment of {name}")))?;
    Ok(row.and_then(|r| r.get::<_, Option<String>>(0)))
}

/// Clone `template` into a new database `name`
///
/// # Errors
/// Fails when the name is taken or the template is in use.
pub async fn create_database(admin: &Client, name: &str, template: &str) -> Result<(), EnvironmentError> {
    let sql = format!("CREATE DATABASE {} TEMPLATE {}", quote_ident(name), quote_ident(template));
    admin
        .batch_execute(&sql)
        .await
        .map_err(EnvironmentError::database(format!("creating {name} from {template}")))?;
    info!(database = name, template, "database created");
    Ok(())
}

/// Drop database `name`, forcing its sessions off in the same statement
///
/// # Errors
/// Propagates statement failures.
pub async fn drop_database(admin: &Client, name: &str) -> Result<(), EnvironmentError> {
    admin
        .batch_execute(&drop_statement(name))
        .await
        .map_err(EnvironmentError::database(format!("dropping {name}")))?;
    info!(database = name, "database dropped");
    Ok(())
}

/// `DROP DATABASE` that terminates remaining sessions atomically (PostgreSQL 13+)
fn drop_statement(name: &str) -> String {
    format!("DROP DATABASE IF EXISTS {} WITH (FORCE)", quote_ident(name))
}

/// Make sure the template exists and matches the migrations
///
/// # Errors
/// Fails when the template is missing or stale and cannot be rebuilt.
pub async fn ensure_template(admin: &Client, config: &DatabaseConfig) -> Result<TemplateStatus, EnvironmentError> {
    let template = config.template.as_str();
    let expected = match &config.migrations_dir {
        Some(dir) => Some(
            fingerprint(dir)
                .map(|f| format!("{FINGERPRINT_PREFIX}{f}"))
                .map_err(|err| {
                    EnvironmentError::template(template, format!("cannot fingerprint {}: {err}", dir.display()))
                })?,
        ),
        None => None,
    };

    if database_exists(admin, template).await? {
        let current = comment(admin, template).await?;
        match (&expected, &current) {
            (None, _) => return Ok(TemplateStatus::Reused),
            (Some(e), Some(c)) if e == c => return Ok(TemplateStatus::Reused),
            _ => {
                warn!(template, "template is stale; rebuilding");
                drop_database(admin, template).await?;
            }
        }
    }

    if config.setup_command.is_empty() {
        return Err(EnvironmentError::template(
            template,
            "template is missing and no setup command is configured",
        ));
    }

    admin
        .batch_execute(&format!("CREATE DATABASE {}", quote_ident(template)))
        .await
        .map_err(EnvironmentError::database(format!("creating template {template}")))?;
    if let Err(err) = run_setup(config).await {
        // a half-migrated template must not be reused
        if let Err(drop_err) = drop_database(admin, template).await {
            warn!(template, error = %drop_err, "cannot drop failed template");
        }
        return Err(err);
    }
    if let Some(fp) = &expected {
        let sql = format!(
            "COMMENT ON DATABASE {} IS {}",
            quote_ident(template),
            sql_literal(&Value::String(fp.clone()))
        );
        admin
            .batch_execute(&sql)
            .await
            .map_err(EnvironmentError::database(format!("marking template {template}")))?;
    }
    info!(template, "template built");
    Ok(TemplateStatus::Built)
}

async fn run_setup(config: &DatabaseConfig) -> Result<(), EnvironmentError> {
    let template = config.template.as_str();
    let Some((program, args)) = config.setup_command.split_first() else {
        return Ok(());
    };
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .env("DATABASE_URL", database_url(&config.admin_url, template))
        .stdin(std::process::Stdio::null());
    if let Some(dir) = &config.setup_dir {
        cmd.current_dir(dir);
    }
    info!(template, command = %config.setup_command.join(" "), "running template setup");
    let output = cmd
        .output()
        .await
        .map_err(|err| EnvironmentError::template(template, format!("cannot run setup command: {err}")))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
    Err(EnvironmentError::template(
        template,
        format!(
            "setup command exited with {}:\n{}",
            output.status,
            tail.into_iter().rev().collect::<Vec<_>>().join("\n")
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fingerprint_tracks_content_and_names() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("migrations")).unwrap();
        std::fs::write(dir.path().join("migrations/001_init.sql"), "CREATE TABLE a ();").unwrap();
        let first = fingerprint(dir.path()).unwrap();
        assert_eq!(first, fingerprint(dir.path()).unwrap());
        assert_eq!(first.len(), 64);

        std::fs::write(dir.path().join("migrations/001_init.sql"), "CREATE TABLE b ();").unwrap();
        let edited = fingerprint(dir.path()).unwrap();
        assert_ne!(first, edited);

        std::fs::rename(
            dir.path().join("migrations/001_init.sql"),
            dir.path().join("migrations/002_init.sql"),
        )
        .unwrap();
        assert_ne!(edited, fingerprint(dir.path()).unwrap());
    }

    #[test]
    fn drop_forces_sessions_off() {
        assert_eq!(
            drop_statement("parity_run_legacy"),
            r#"DROP DATABASE IF EXISTS "parity_run_legacy" WITH (FORCE)"#
        );
        assert_eq!(
            drop_statement(r#"odd"name"#),
            r#"DROP DATABASE IF EXISTS "odd""name" WITH (FORCE)"#
        );
    }

    #[tokio::test]
    async fn failing_setup_reports_stderr() {
        let config = DatabaseConfig {
            setup_command: vec!["sh".into(), "-c".into(), "echo 'migration 003 failed' >&2; exit 3".into()],
            ..DatabaseConfig::default()
        };
        let err = run_setup(&config).await.unwrap_err().to_string();
        assert!(err.contains("migration 003 failed"));
        assert!(err.contains("parity_template"));
    }
}
