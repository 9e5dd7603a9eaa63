//! RPC client side of the beamrpc system.
//!
//! Three layers, smallest first:
//!
//! - [`Client`] - one connection, one codec, a table of in-flight calls
//!   matched to replies by sequence number
//! - [`Discovery`] - a refreshable endpoint list with a selection policy
//!   ([`SelectMode`]), either hand-maintained or fed from the naming
//!   registry
//! - [`BalancedClient`] - a pool of [`Client`]s keyed by endpoint, routing
//!   unary calls through discovery and fanning out broadcasts
//!
//! ```no_run
//! use beamrpc_client::{BalancedClient, Discovery, SelectMode, StaticDiscovery};
//! use beamrpc_common::Handshake;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct AddArgs { num1: i64, num2: i64 }
//!
//! # #[tokio::main]
//! # async fn main() -> beamrpc_common::Result<()> {
//! let discovery = Discovery::from(StaticDiscovery::new(vec![
//!     "127.0.0.1:7000".into(),
//!     "127.0.0.1:7001".into(),
//! ]));
//! let client = BalancedClient::new(discovery, SelectMode::RoundRobin, Handshake::default());
//!
//! let sum: i64 = client.call("Arith.Sum", &AddArgs { num1: 1, num2: 1 }).await?;
//! assert_eq!(sum, 2);
//! # Ok(())
//! # }
//! ```

mod balanced;
mod client;
mod discovery;
mod registry_discovery;

pub use balanced::BalancedClient;
pub use client::{Call, Client};
pub use discovery::{Discovery, SelectMode, StaticDiscovery};
pub use registry_discovery::{RegistryDiscovery, DEFAULT_REFRESH_TTL};
