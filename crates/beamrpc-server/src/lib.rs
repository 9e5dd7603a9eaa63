//! RPC server for the beamrpc system.
//!
//! A [`Server`] accepts TCP connections, negotiates a codec via the JSON
//! handshake, and dispatches decoded requests to methods registered through
//! [`Service::builder`]. Method invocations run concurrently per
//! connection; responses are serialized by a per-connection send lock and
//! may be bounded by the handshake's handler timeout.
//!
//! ```no_run
//! use std::sync::Arc;
//! use beamrpc_server::{MethodError, Server, Service};
//! use serde::{Deserialize, Serialize};
//! use tokio::net::TcpListener;
//!
//! struct Arith;
//!
//! #[derive(Serialize, Deserialize)]
//! struct AddArgs { num1: i64, num2: i64 }
//!
//! impl Arith {
//!     async fn sum(self: Arc<Self>, args: AddArgs) -> Result<i64, MethodError> {
//!         Ok(args.num1 + args.num2)
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> beamrpc_common::Result<()> {
//! let service = Service::builder(Arith).method("Sum", Arith::sum).build()?;
//!
//! let server = Arc::new(Server::new());
//! server.register(service)?;
//!
//! let listener = TcpListener::bind("0.0.0.0:7000").await?;
//! server.accept(listener).await?;
//! # Ok(())
//! # }
//! ```

mod server;
mod service;

pub use server::Server;
pub use service::{MethodError, MethodHandler, Service, ServiceBuilder};
