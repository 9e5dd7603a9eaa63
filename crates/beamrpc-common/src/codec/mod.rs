//! Framed header/body codec with two payload encodings.
//!
//! A connection negotiates its [`WireFormat`] in the handshake; after that,
//! every message is a header frame followed by a body frame, both encoded
//! with the negotiated format. The handshake itself is always JSON, so a
//! server decodes frame 0 with JSON unconditionally and only then switches
//! to the negotiated codec.
//!
//! The codec halves are not thread-safe; callers serialize writes with a
//! mutex and keep the reader on a single task.

pub mod frame;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::protocol::{Handshake, Header, Result, RpcError, MAGIC};

pub use frame::{FrameReader, FrameWriter, MAX_FRAME_SIZE};

/// Payload encoding for headers and bodies.
///
/// The serialized identifiers are part of the handshake wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    /// Compact binary encoding (the default).
    #[serde(rename = "application/gob")]
    Binary,
    /// One JSON document per value.
    #[serde(rename = "application/json")]
    Json,
}

impl WireFormat {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            WireFormat::Binary => Ok(postcard::to_allocvec(value)?),
            WireFormat::Json => Ok(serde_json::to_vec(value)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            WireFormat::Binary => Ok(postcard::from_bytes(bytes)?),
            WireFormat::Json => Ok(serde_json::from_slice(bytes)?),
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireFormat::Binary => f.write_str("application/gob"),
            WireFormat::Json => f.write_str("application/json"),
        }
    }
}

/// Decoding half of a connection.
pub struct CodecReader<R> {
    format: WireFormat,
    frames: FrameReader<R>,
}

impl<R: AsyncRead + Unpin> CodecReader<R> {
    pub fn new(format: WireFormat, inner: R) -> Self {
        Self {
            format,
            frames: FrameReader::new(inner),
        }
    }

    /// Wraps a frame reader that already consumed the handshake frame.
    pub fn from_frames(format: WireFormat, frames: FrameReader<R>) -> Self {
        Self { format, frames }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub async fn read_header(&mut self) -> Result<Header> {
        let frame = self.frames.read_frame().await?;
        self.format.decode(&frame)
    }

    /// Reads the body frame following a header, without decoding it.
    ///
    /// The body's concrete type is only known to the dispatcher (server) or
    /// the caller awaiting the reply (client), so the receive paths move raw
    /// bytes and decode at the edge. Discarding a body is just dropping the
    /// returned buffer.
    pub async fn read_body(&mut self) -> Result<Vec<u8>> {
        self.frames.read_frame().await
    }
}

/// Encoding half of a connection.
///
/// Every write flushes; a write or flush failure closes the connection
/// (the frame layer shuts the stream down) before the error is returned.
pub struct CodecWriter<W: AsyncWrite + Unpin> {
    format: WireFormat,
    frames: FrameWriter<W>,
}

impl<W: AsyncWrite + Unpin> CodecWriter<W> {
    pub fn new(format: WireFormat, inner: W) -> Self {
        Self {
            format,
            frames: FrameWriter::new(inner),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Writes one header/body pair and flushes.
    pub async fn write<T: Serialize>(&mut self, header: &Header, body: &T) -> Result<()> {
        let body = self.format.encode(body)?;
        self.write_raw(header, &body).await
    }

    /// Writes one header plus an already-encoded body and flushes.
    pub async fn write_raw(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header = self.format.encode(header)?;
        self.frames.write_frame(&header).await?;
        self.frames.write_frame(body).await?;
        self.frames.flush().await
    }

    /// Sends the handshake frame. Always JSON, whatever the negotiated
    /// format.
    pub async fn write_handshake(&mut self, handshake: &Handshake) -> Result<()> {
        let payload = serde_json::to_vec(handshake)?;
        self.frames.write_frame(&payload).await?;
        self.frames.flush().await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.frames.shutdown().await
    }
}

/// Reads and validates the handshake frame. Always JSON.
///
/// # Errors
///
/// Fails on a magic-number mismatch or an unknown codec identifier (the
/// latter surfaces as a JSON decode error naming the offending variant).
pub async fn read_handshake<R: AsyncRead + Unpin>(
    frames: &mut FrameReader<R>,
) -> Result<Handshake> {
    let payload = frames.read_frame().await?;
    let handshake: Handshake = serde_json::from_slice(&payload)?;
    if handshake.magic != MAGIC {
        return Err(RpcError::BadMagic(handshake.magic));
    }
    Ok(handshake)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pipe(format: WireFormat) -> (CodecWriter<tokio::io::DuplexStream>, CodecReader<tokio::io::DuplexStream>) {
        let (a, b) = tokio::io::duplex(4096);
        (CodecWriter::new(format, a), CodecReader::new(format, b))
    }

    #[tokio::test]
    async fn header_and_body_round_trip_binary() {
        let (mut writer, mut reader) = pipe(WireFormat::Binary).await;

        let header = Header::request("Foo.Sum", 1);
        writer.write(&header, &(3i64, 4i64)).await.unwrap();

        let got = reader.read_header().await.unwrap();
        assert_eq!(got, header);
        let body = reader.read_body().await.unwrap();
        let args: (i64, i64) = WireFormat::Binary.decode(&body).unwrap();
        assert_eq!(args, (3, 4));
    }

    #[tokio::test]
    async fn header_and_body_round_trip_json() {
        let (mut writer, mut reader) = pipe(WireFormat::Json).await;

        let header = Header {
            service_method: "Foo.Sum".into(),
            seq: 9,
            error: "boom".into(),
        };
        writer.write(&header, &"payload").await.unwrap();

        let got = reader.read_header().await.unwrap();
        assert_eq!(got.error, "boom");
        let body: String = WireFormat::Json
            .decode(&reader.read_body().await.unwrap())
            .unwrap();
        assert_eq!(body, "payload");
    }

    #[tokio::test]
    async fn handshake_is_json_even_when_binary_is_negotiated() {
        let (a, b) = tokio::io::duplex(4096);
        let mut writer = CodecWriter::new(WireFormat::Binary, a);
        let mut frames = FrameReader::new(b);

        writer
            .write_handshake(&Handshake::default())
            .await
            .unwrap();
        let header = Header::request("Foo.Sum", 1);
        writer.write(&header, &1u32).await.unwrap();

        // Frame 0 must parse as a JSON document.
        let handshake = read_handshake(&mut frames).await.unwrap();
        assert_eq!(handshake.codec_type, WireFormat::Binary);

        // Subsequent frames use the negotiated binary codec.
        let mut reader = CodecReader::from_frames(handshake.codec_type, frames);
        assert_eq!(reader.read_header().await.unwrap(), header);
    }

    #[tokio::test]
    async fn bad_magic_is_rejected() {
        let (a, b) = tokio::io::duplex(4096);
        let mut writer = CodecWriter::new(WireFormat::Json, a);
        let mut frames = FrameReader::new(b);

        let handshake = Handshake {
            magic: 0xdead,
            ..Handshake::default()
        };
        writer.write_handshake(&handshake).await.unwrap();

        let err = read_handshake(&mut frames).await.unwrap_err();
        assert!(matches!(err, RpcError::BadMagic(0xdead)));
    }
}
