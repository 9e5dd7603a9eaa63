//! The load-balancing client: a pool of per-endpoint connections behind a
//! discovery source.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

use beamrpc_common::{Handshake, Result, RpcError};

use crate::client::Client;
use crate::discovery::{Discovery, SelectMode};

/// Routes calls to servers picked by a [`Discovery`] source, reusing one
/// pooled [`Client`] per endpoint.
///
/// Clones share the pool and discovery state, so a `BalancedClient` can be
/// handed to as many tasks as needed.
#[derive(Clone)]
pub struct BalancedClient {
    discovery: Arc<Discovery>,
    mode: SelectMode,
    options: Handshake,
    pool: Arc<Mutex<HashMap<String, Arc<Client>>>>,
}

impl BalancedClient {
    pub fn new(discovery: Discovery, mode: SelectMode, options: Handshake) -> Self {
        Self {
            discovery: Arc::new(discovery),
            mode,
            options,
            pool: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the pooled client for `addr`, dialing on a miss. A cached
    /// client that is no longer available is closed and replaced.
    async fn cached_client(&self, addr: &str) -> Result<Arc<Client>> {
        let mut pool = self.pool.lock().await;

        match pool.get(addr) {
            Some(client) if client.is_available() => return Ok(Arc::clone(client)),
            Some(_) => {
                debug!(%addr, "evicting unavailable pooled client");
                if let Some(stale) = pool.remove(addr) {
                    let _ = stale.close().await;
                }
            }
            None => {}
        }

        let client = Arc::new(Client::dial(addr, self.options.clone()).await?);
        pool.insert(addr.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// One call to one server, chosen by the balance mode.
    pub async fn call<A: Serialize, R: DeserializeOwned>(
        &self,
        service_method: &str,
        args: &A,
    ) -> Result<R> {
        let addr = self.discovery.get(self.mode).await?;
        let client = self.cached_client(&addr).await?;
        client.call(service_method, args).await
    }

    /// Invokes the method on every discovered server concurrently.
    ///
    /// The first error wins and aborts the remaining in-flight calls
    /// (each aborted call's pending entry is evicted, so stray replies are
    /// discarded). On success the reply comes from whichever server
    /// finished first. Dropping the returned future aborts the whole
    /// fan-out.
    pub async fn broadcast<A: Serialize, R: DeserializeOwned>(
        &self,
        service_method: &str,
        args: &A,
    ) -> Result<R> {
        let servers = self.discovery.get_all().await?;
        let body = self.options.codec_type.encode(args)?;

        let mut calls = JoinSet::new();
        for addr in servers {
            let balanced = self.clone();
            let service_method = service_method.to_string();
            let body = body.clone();
            calls.spawn(async move {
                let client = balanced.cached_client(&addr).await?;
                client.call_raw(&service_method, body).await
            });
        }

        let mut first_error = None;
        let mut reply = None;
        while let Some(joined) = calls.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Err(RpcError::Connection(e.to_string())),
            };
            match result {
                Ok(bytes) => {
                    if reply.is_none() {
                        reply = Some(bytes);
                    }
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                        calls.abort_all();
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        let bytes = reply.ok_or(RpcError::NoServers)?;
        self.options.codec_type.decode(&bytes)
    }

    /// Closes every pooled client and empties the pool.
    pub async fn close(&self) {
        let mut pool = self.pool.lock().await;
        for (_, client) in pool.drain() {
            let _ = client.close().await;
        }
    }
}
