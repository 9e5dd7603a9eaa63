//! Server-side heartbeat: keep an endpoint registered while it lives.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use beamrpc_common::{Result, RpcError, SERVER_HEADER};

use crate::DEFAULT_TIMEOUT;

/// Default resend period: one minute inside the default registry timeout,
/// so an endpoint never expires between heartbeats.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration =
    Duration::from_secs(DEFAULT_TIMEOUT.as_secs() - 60);

/// Registers `addr` with the registry and keeps re-registering it every
/// `period` (zero selects [`DEFAULT_HEARTBEAT_PERIOD`]; the period must
/// stay under the registry timeout).
///
/// The first heartbeat is sent before returning, so a failure to reach the
/// registry surfaces at startup. The background task stops on the first
/// send error.
pub async fn heartbeat(
    registry_url: &str,
    addr: &str,
    period: Duration,
) -> Result<JoinHandle<()>> {
    let period = if period.is_zero() {
        DEFAULT_HEARTBEAT_PERIOD
    } else {
        period
    };

    let http = reqwest::Client::new();
    send_heartbeat(&http, registry_url, addr).await?;

    let registry_url = registry_url.to_string();
    let addr = addr.to_string();
    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(period).await;
            if let Err(e) = send_heartbeat(&http, &registry_url, &addr).await {
                warn!("heartbeat error: {e}");
                break;
            }
        }
    });
    Ok(handle)
}

async fn send_heartbeat(http: &reqwest::Client, registry_url: &str, addr: &str) -> Result<()> {
    info!(%addr, registry = %registry_url, "send heartbeat");
    http.post(registry_url)
        .header(SERVER_HEADER, addr)
        .send()
        .await
        .map_err(|e| RpcError::Registry(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Registry, DEFAULT_PATH};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn heartbeat_registers_and_renews() {
        let registry = Arc::new(Registry::new(Duration::from_millis(200)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}{}", listener.local_addr().unwrap(), DEFAULT_PATH);
        tokio::spawn(Arc::clone(&registry).serve(listener, DEFAULT_PATH));

        let task = heartbeat(&url, "127.0.0.1:7000", Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(registry.alive(), vec!["127.0.0.1:7000".to_string()]);

        // Renewals outpace the 200ms expiry.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(registry.alive(), vec!["127.0.0.1:7000".to_string()]);

        task.abort();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(registry.alive().is_empty());
    }

    #[tokio::test]
    async fn unreachable_registry_fails_at_startup() {
        let err = heartbeat("http://127.0.0.1:1/registry", "127.0.0.1:7000", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Registry(_)));
    }
}
