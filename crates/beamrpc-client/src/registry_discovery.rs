//! Discovery backed by the naming registry.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use beamrpc_common::{Result, RpcError, SERVER_HEADER};

use crate::discovery::{SelectMode, StaticDiscovery};

/// How long a fetched server list stays fresh before the next
/// [`refresh`](RegistryDiscovery::refresh) goes back to the registry.
pub const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(10);

/// A registry-fed endpoint list.
///
/// Wraps the [`StaticDiscovery`] selection core and refreshes it from the
/// registry's GET endpoint, which carries the comma-separated alive set in
/// the `X-rpc-Server` response header. `get` and `get_all` refresh first,
/// so callers always select from a list no staler than the TTL.
pub struct RegistryDiscovery {
    servers: StaticDiscovery,
    registry_url: String,
    ttl: Duration,
    /// Guards the refresh round-trip too, so concurrent callers do not
    /// stampede the registry.
    last_refresh: Mutex<Option<Instant>>,
    http: reqwest::Client,
}

impl RegistryDiscovery {
    /// `ttl` of zero selects [`DEFAULT_REFRESH_TTL`].
    pub fn new(registry_url: impl Into<String>, ttl: Duration) -> Self {
        let ttl = if ttl.is_zero() {
            DEFAULT_REFRESH_TTL
        } else {
            ttl
        };
        Self {
            servers: StaticDiscovery::new(Vec::new()),
            registry_url: registry_url.into(),
            ttl,
            last_refresh: Mutex::new(None),
            http: reqwest::Client::new(),
        }
    }

    /// Fetches the alive set from the registry unless the current list is
    /// still within its TTL.
    pub async fn refresh(&self) -> Result<()> {
        let mut last_refresh = self.last_refresh.lock().await;
        if let Some(at) = *last_refresh {
            if at.elapsed() < self.ttl {
                return Ok(());
            }
        }

        info!(registry = %self.registry_url, "refresh servers from registry");
        let response = self
            .http
            .get(&self.registry_url)
            .send()
            .await
            .map_err(|e| {
                warn!("registry refresh error: {e}");
                RpcError::Registry(e.to_string())
            })?;

        let raw = response
            .headers()
            .get(SERVER_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let servers: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();

        self.servers.update(servers);
        *last_refresh = Some(Instant::now());
        Ok(())
    }

    /// Manual override; also restamps the refresh time.
    pub async fn update(&self, servers: Vec<String>) {
        self.servers.update(servers);
        *self.last_refresh.lock().await = Some(Instant::now());
    }

    pub async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh().await?;
        self.servers.get(mode)
    }

    pub async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh().await?;
        self.servers.get_all()
    }
}
