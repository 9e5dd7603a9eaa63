//! Protocol definitions and the framed codec for the beamrpc RPC system.
//!
//! beamrpc is a small distributed RPC framework: servers export methods on
//! registered receivers, clients multiplex concurrent calls over a single
//! TCP connection, and a lightweight HTTP registry tracks live server
//! endpoints. This crate holds the pieces both ends share:
//!
//! - [`protocol`] - the wire-level [`Header`] and [`Handshake`] structs and
//!   the [`RpcError`] type used across the workspace
//! - [`codec`] - length-prefixed framing plus the two payload encodings
//!   (binary and JSON), selected per connection by the handshake
//!
//! # Wire layout
//!
//! Every connection starts with one JSON-encoded [`Handshake`] frame, sent
//! by the client. All subsequent traffic is header/body frame pairs encoded
//! with the negotiated [`WireFormat`]:
//!
//! ```text
//! | Handshake (always JSON) | Header | Body | Header | Body | ...
//! ```

pub mod codec;
pub mod protocol;

pub use codec::WireFormat;
pub use protocol::{Handshake, Header, RpcError, Result, MAGIC, SERVER_HEADER};
