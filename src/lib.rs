//! beamrpc - a small distributed RPC framework.
//!
//! This facade re-exports the workspace crates:
//!
//! - [`common`] - wire protocol types and the framed codec
//! - [`server`] - the RPC server and method dispatch
//! - [`client`] - the connection client, discovery, and the load-balancing
//!   client
//! - [`registry`] - the HTTP naming registry and heartbeat helper

pub use beamrpc_client as client;
pub use beamrpc_common as common;
pub use beamrpc_registry as registry;
pub use beamrpc_server as server;
