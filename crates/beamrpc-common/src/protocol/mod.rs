//! Core wire types: the per-call [`Header`], the per-connection
//! [`Handshake`], and the shared [`RpcError`].
//!
//! Field names on the serialized forms are part of the wire contract and
//! must not change; they are pinned with `serde(rename)` below.

pub mod error;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::WireFormat;

pub use error::{Result, RpcError};

/// Magic number identifying a beamrpc connection, carried in the handshake.
pub const MAGIC: u32 = 0x3bef5c;

/// HTTP header carrying endpoint addresses between servers, clients and the
/// naming registry (a comma-separated list on GET responses, a single
/// endpoint on POST requests).
pub const SERVER_HEADER: &str = "X-rpc-Server";

/// Message header preceding every request and response body.
///
/// `seq` is assigned by the client, strictly increasing from 1 per
/// connection (0 is reserved as invalid). `error` is empty on requests and
/// on successful responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    #[serde(rename = "ServiceMethod")]
    pub service_method: String,
    #[serde(rename = "Seq")]
    pub seq: u64,
    #[serde(rename = "Error")]
    pub error: String,
}

impl Header {
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }
}

/// Connection options exchanged as the first frame of every connection.
///
/// The handshake is always encoded as JSON, regardless of which codec it
/// negotiates for the rest of the stream. Timeouts serialize as integer
/// nanoseconds; zero means unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(rename = "MagicNumber")]
    pub magic: u32,
    #[serde(rename = "CodecType")]
    pub codec_type: WireFormat,
    #[serde(rename = "ConnectionTimeout", with = "nanos")]
    pub connect_timeout: Duration,
    #[serde(rename = "HandlerTimeout", with = "nanos")]
    pub handle_timeout: Duration,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            codec_type: WireFormat::Binary,
            connect_timeout: Duration::from_secs(10),
            handle_timeout: Duration::ZERO,
        }
    }
}

impl Handshake {
    pub fn with_codec(codec_type: WireFormat) -> Self {
        Self {
            codec_type,
            ..Self::default()
        }
    }
}

mod nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_nanos() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}
