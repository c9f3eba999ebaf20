//! Server processes
//!
//! Each server runs in its own process group so that termination reaches
//! whatever the start command forks (`npm` → `node`, `cargo run` → binary).
//! Standard output and error both go to one log file per server.

use crate::error::EnvironmentError;
use parity_model::Side;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Inherited variables; everything else is cleared
const PASSTHROUGH_VARS: &[&str] = &["PATH", "HOME", "USER", "LANG", "TMPDIR", "SHELL"];

/// Grace period between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Everything needed to start one server
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub side: Side,
    /// Program followed by its arguments
    pub command: Vec<String>,
    pub working_dir: PathBuf,
    /// Final environment on top of the passthrough variables
    pub env: BTreeMap<String, String>,
    pub log_path: PathBuf,
}

/// Running server
#[derive(Debug)]
pub struct ServerProcess {
    side: Side,
    child: Child,
    log_path: PathBuf,
}

impl ServerProcess {
    /// Start the server described by `spec`
    ///
    /// # Errors
    /// Fails when the log file cannot be created or the program cannot be
    /// executed.
    pub fn spawn(spec: &ServerSpec) -> Result<Self, EnvironmentError> {
        let log_error = |source| EnvironmentError::Log {
            path: spec.log_path.clone(),
            source,
        };
        if let Some(parent) = spec.log_path.parent() {
            std::fs::create_dir_all(parent).map_err(log_error)?;
        }
        let stdout = File::create(&spec.log_path).map_err(log_error)?;
        let stderr = stdout.try_clone().map_err(log_error)?;

        let spawn_error = |source| EnvironmentError::Spawn {
            side: spec.side,
            source,
        };
        let (program, args) = spec.command.split_first().ok_or_else(|| {
            spawn_error(std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"))
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&spec.working_dir)
            .env_clear()
            .envs(
                PASSTHROUGH_VARS
                    .iter()
                    .filter_map(|k| std::env::var(k).ok().map(|v| (*k, v))),
            )
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(spawn_error)?;
        info!(
            side = %spec.side,
            pid = child.id(),
            command = %spec.command.join(" "),
            log = %spec.log_path.display(),
            "server started"
        );
        Ok(Self {
            side: spec.side,
            child,
            log_path: spec.log_path.clone(),
        })
    }

    /// Which server this is
    #[inline]
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Combined output log
    #[inline]
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// True when the process has already exited
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Last `lines` lines of the server log
    #[must_use]
    pub fn log_tail(&self, lines: usize) -> String {
        log_tail(&self.log_path, lines)
    }

    /// Terminate the whole process group and reap the child
    ///
    /// SIGTERM first; SIGKILL when the group outlives the grace period.
    pub async fn terminate(mut self) {
        let Some(pid) = self.child.id() else {
            return;
        };
        signal_group(pid, "TERM");
        match tokio::time::timeout(TERM_GRACE, self.child.wait()).await {
            Ok(Ok(status)) => debug!(side = %self.side, %status, "server exited"),
            Ok(Err(err)) => warn!(side = %self.side, error = %err, "cannot reap server"),
            Err(_) => {
                warn!(side = %self.side, pid, "server ignored SIGTERM; killing");
                signal_group(pid, "KILL");
                if let Err(err) = self.child.wait().await {
                    warn!(side = %self.side, error = %err, "cannot reap server");
                }
            }
        }
    }
}

fn signal_group(pid: u32, signal: &str) {
    // negative pid addresses the process group created by process_group(0)
    let status = std::process::Command::new("kill")
        .arg(format!("-{signal}"))
        .arg(format!("-{pid}"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = status {
        warn!(pid, signal, error = %err, "cannot signal process group");
    }
}

/// Last `lines` lines of a file; empty when unreadable
#[must_use]
pub fn log_tail(path: &Path, lines: usize) -> String {
    let Ok(text) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Poll `url` until it answers with a status below 500
///
/// Returns the elapsed wait on success, `None` on timeout. A server that
/// exits while being polled ends the wait early.
pub async fn wait_ready(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
    poll: Duration,
    mut process: Option<&mut ServerProcess>,
) -> Option<Duration> {
    let started = Instant::now();
    while started.elapsed() < timeout {
        match http.get(url).timeout(poll.max(Duration::from_millis(500))).send().await {
            Ok(resp) if resp.status().as_u16() < 500 => return Some(started.elapsed()),
            Ok(resp) => debug!(url, status = resp.status().as_u16(), "not ready"),
            Err(err) => debug!(url, error = %err, "not ready"),
        }
        if let Some(p) = process.as_deref_mut() {
            if p.has_exited() {
                warn!(side = %p.side(), "server exited before becoming ready");
                return None;
            }
        }
        tokio::time::sleep(poll).await;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_status(status: u16) -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let reply = format!("HTTP/1.1 {status} X\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(reply.as_bytes()).await;
            }
        });
        port
    }

    #[tokio::test]
    async fn ready_below_500() {
        let port = serve_status(404).await;
        let http = reqwest::Client::new();
        let waited = wait_ready(
            &http,
            &format!("http://127.0.0.1:{port}/health"),
            Duration::from_secs(5),
            Duration::from_millis(50),
            None,
        )
        .await;
        assert!(waited.is_some());
    }

    #[tokio::test]
    async fn server_errors_are_not_ready() {
        let port = serve_status(503).await;
        let http = reqwest::Client::new();
        let waited = wait_ready(
            &http,
            &format!("http://127.0.0.1:{port}/health"),
            Duration::from_millis(300),
            Duration::from_millis(50),
            None,
        )
        .await;
        assert!(waited.is_none());
    }

    #[test]
    fn tail_keeps_last_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();
        assert_eq!(log_tail(&path, 2), "three\nfour");
        assert_eq!(log_tail(&path, 10), "one\ntwo\nthree\nfour");
        assert_eq!(log_tail(&dir.path().join("missing.log"), 3), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_logs_and_terminates() {
        let dir = TempDir::new().unwrap();
        let spec = ServerSpec {
            side: Side::Legacy,
            command: vec!["sh".into(), "-c".into(), "echo \"port $PORT\"; echo oops >&2; exec sleep 30".into()],
            working_dir: dir.path().to_path_buf(),
            env: BTreeMap::from([("PORT".to_string(), "4100".to_string())]),
            log_path: dir.path().join("logs").join("legacy.log"),
        };
        let mut process = ServerProcess::spawn(&spec).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!process.has_exited());
        let tail = process.log_tail(10);
        assert!(tail.contains("port 4100"));
        assert!(tail.contains("oops"));
        process.terminate().await;
    }

    #[test]
    fn empty_command_is_rejected() {
        let spec = ServerSpec {
            side: Side::Candidate,
            command: Vec::new(),
            working_dir: PathBuf::from("."),
            env: BTreeMap::new(),
            log_path: std::env::temp_dir().join("parity-empty-command.log"),
        };
        assert!(matches!(
            ServerProcess::spawn(&spec),
            Err(EnvironmentError::Spawn { side: Side::Candidate, .. })
        ));
    }
}
