//! The naming registry: a standalone HTTP service tracking which server
//! endpoints are alive.
//!
//! All payload rides in the `X-rpc-Server` header. Servers POST their
//! endpoint periodically (see [`heartbeat`]); clients GET the
//! comma-separated alive set. Entries expire lazily: an endpoint whose last
//! heartbeat is older than the registry timeout is dropped the next time
//! the alive set is enumerated.
//!
//! The registry is plain state plus an axum router, so tests construct as
//! many isolated instances as they like:
//!
//! ```no_run
//! use std::sync::Arc;
//! use beamrpc_registry::{Registry, DEFAULT_PATH, DEFAULT_TIMEOUT};
//! use tokio::net::TcpListener;
//!
//! # #[tokio::main]
//! # async fn main() -> beamrpc_common::Result<()> {
//! let registry = Arc::new(Registry::new(DEFAULT_TIMEOUT));
//! let listener = TcpListener::bind("0.0.0.0:9000").await?;
//! registry.serve(listener, DEFAULT_PATH).await?;
//! # Ok(())
//! # }
//! ```

mod heartbeat;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info};

use beamrpc_common::{Result, RpcError, SERVER_HEADER};

pub use heartbeat::{heartbeat, DEFAULT_HEARTBEAT_PERIOD};

/// HTTP path the registry serves by default.
pub const DEFAULT_PATH: &str = "/rpc-test/registry";

/// How long an endpoint stays alive after its last heartbeat.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// In-memory endpoint store with lazy expiry.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, Instant>>,
}

impl Registry {
    /// A timeout of zero means endpoints never expire.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        }
    }

    /// Upserts `(addr, now)`: a fresh heartbeat for a known endpoint, or a
    /// new registration.
    pub fn put(&self, addr: &str) {
        let mut servers = self.servers.lock().unwrap();
        servers.insert(addr.to_string(), Instant::now());
    }

    /// The alive endpoint set, sorted lexicographically. Expired entries
    /// are removed on the way.
    pub fn alive(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        let timeout = self.timeout;
        if !timeout.is_zero() {
            servers.retain(|addr, last_seen| {
                let alive = last_seen.elapsed() < timeout;
                if !alive {
                    debug!(%addr, "expiring endpoint");
                }
                alive
            });
        }
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// The axum router serving this registry at `path`. GET returns the
    /// alive set in the `X-rpc-Server` header; POST registers the endpoint
    /// in the same header; other methods get 405.
    pub fn router(self: Arc<Self>, path: &str) -> Router {
        Router::new()
            .route(path, get(get_servers).post(post_server))
            .with_state(self)
    }

    /// Serves the registry until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, path: &str) -> Result<()> {
        info!(path, addr = %listener.local_addr()?, "registry listening");
        let router = self.router(path);
        axum::serve(listener, router)
            .await
            .map_err(|e| RpcError::Registry(e.to_string()))
    }
}

async fn get_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let alive = registry.alive().join(",");
    (StatusCode::OK, [(SERVER_HEADER, alive)])
}

async fn post_server(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    let addr = headers
        .get(SERVER_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|addr| !addr.is_empty());
    match addr {
        Some(addr) => {
            registry.put(addr);
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
