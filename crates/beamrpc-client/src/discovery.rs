//! Endpoint discovery and the server selection policies.

use std::sync::Mutex;

use rand::{rngs::StdRng, Rng, SeedableRng};

use beamrpc_common::{Result, RpcError};

/// How [`Discovery::get`] picks among the known endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniformly random.
    Random,
    /// Cycle through the list in order.
    RoundRobin,
}

struct SelectState {
    servers: Vec<String>,
    cursor: usize,
    rng: StdRng,
}

/// A hand-maintained endpoint list with the shared selection core.
///
/// The round-robin cursor starts at a random position so a fleet of
/// clients does not converge on the same first endpoint.
pub struct StaticDiscovery {
    state: Mutex<SelectState>,
}

impl StaticDiscovery {
    pub fn new(servers: Vec<String>) -> Self {
        let mut rng = StdRng::from_entropy();
        let cursor = rng.gen_range(0..i32::MAX as usize - 1);
        Self {
            state: Mutex::new(SelectState {
                servers,
                cursor,
                rng,
            }),
        }
    }

    /// Nothing to refresh on a manual list.
    pub fn refresh(&self) -> Result<()> {
        Ok(())
    }

    /// Replaces the endpoint list.
    pub fn update(&self, servers: Vec<String>) {
        self.state.lock().unwrap().servers = servers;
    }

    /// Picks one endpoint per the balance mode.
    pub fn get(&self, mode: SelectMode) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        let n = state.servers.len();
        if n == 0 {
            return Err(RpcError::NoServers);
        }
        match mode {
            SelectMode::Random => {
                let i = state.rng.gen_range(0..n);
                Ok(state.servers[i].clone())
            }
            SelectMode::RoundRobin => {
                let server = state.servers[state.cursor % n].clone();
                state.cursor = (state.cursor + 1) % n;
                Ok(server)
            }
        }
    }

    /// All endpoints, as a defensive copy.
    pub fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().servers.clone())
    }
}

/// Either discovery flavor, dispatched by variant.
pub enum Discovery {
    Static(StaticDiscovery),
    Registry(crate::registry_discovery::RegistryDiscovery),
}

impl Discovery {
    pub async fn refresh(&self) -> Result<()> {
        match self {
            Discovery::Static(d) => d.refresh(),
            Discovery::Registry(d) => d.refresh().await,
        }
    }

    pub async fn update(&self, servers: Vec<String>) {
        match self {
            Discovery::Static(d) => d.update(servers),
            Discovery::Registry(d) => d.update(servers).await,
        }
    }

    pub async fn get(&self, mode: SelectMode) -> Result<String> {
        match self {
            Discovery::Static(d) => d.get(mode),
            Discovery::Registry(d) => d.get(mode).await,
        }
    }

    pub async fn get_all(&self) -> Result<Vec<String>> {
        match self {
            Discovery::Static(d) => d.get_all(),
            Discovery::Registry(d) => d.get_all().await,
        }
    }
}

impl From<StaticDiscovery> for Discovery {
    fn from(d: StaticDiscovery) -> Self {
        Discovery::Static(d)
    }
}

impl From<crate::registry_discovery::RegistryDiscovery> for Discovery {
    fn from(d: crate::registry_discovery::RegistryDiscovery) -> Self {
        Discovery::Registry(d)
    }
}
