//! Port allocation by bind probing

use crate::error::EnvironmentError;
use tokio::net::TcpListener;
use tracing::debug;

/// True when `port` can be bound on `host` right now
pub async fn is_free(host: &str, port: u16) -> bool {
    TcpListener::bind((host, port)).await.is_ok()
}

/// First free port in `base..base + attempts` not already in `taken`
///
/// # Errors
/// Returns [`EnvironmentError::PortsExhausted`] when every candidate is busy.
pub async fn find_free(host: &str, base: u16, attempts: u16, taken: &[u16]) -> Result<u16, EnvironmentError> {
    for offset in 0..attempts {
        let Some(port) = base.checked_add(offset) else {
            break;
        };
        if taken.contains(&port) {
            continue;
        }
        if is_free(host, port).await {
            return Ok(port);
        }
        debug!(port, "port busy");
    }
    Err(EnvironmentError::PortsExhausted {
        base,
        end: u32::from(base) + u32::from(attempts),
        attempts,
    })
}

/// Two distinct free ports near the legacy and candidate bases
///
/// # Errors
/// Returns [`EnvironmentError::PortsExhausted`] for the first base that has
/// no free port.
pub async fn allocate_pair(
    host: &str,
    legacy_base: u16,
    candidate_base: u16,
    attempts: u16,
) -> Result<(u16, u16), EnvironmentError> {
    let legacy = find_free(host, legacy_base, attempts, &[]).await?;
    let candidate = find_free(host, candidate_base, attempts, &[legacy]).await?;
    Ok((legacy, candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "127.0.0.1";

    #[tokio::test]
    async fn skips_bound_port() {
        let held = TcpListener::bind((HOST, 0)).await.unwrap();
        let busy = held.local_addr().unwrap().port();
        assert!(!is_free(HOST, busy).await);
        let found = find_free(HOST, busy, 50, &[]).await.unwrap();
        assert_ne!(found, busy);
        assert!(found > busy);
    }

    #[tokio::test]
    async fn exhaustion_is_reported() {
        let held = TcpListener::bind((HOST, 0)).await.unwrap();
        let busy = held.local_addr().unwrap().port();
        let err = find_free(HOST, busy, 1, &[]).await.unwrap_err();
        assert!(matches!(err, EnvironmentError::PortsExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn pair_is_distinct_with_shared_base() {
        let listener = TcpListener::bind((HOST, 0)).await.unwrap();
        let base = listener.local_addr().unwrap().port();
        drop(listener);
        let (legacy, candidate) = allocate_pair(HOST, base, base, 50).await.unwrap();
        assert_ne!(legacy, candidate);
    }
}
