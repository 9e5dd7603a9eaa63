//! Length-prefixed framing over a byte stream.
//!
//! Wire format: `[4-byte length as u32 big-endian] + [payload]`. Every
//! logical value (handshake, header, body) travels in its own frame.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use crate::protocol::{Result, RpcError};

/// Maximum frame payload size (16 MB).
///
/// Caps the allocation a peer can force with a corrupt or hostile length
/// prefix.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Reads length-prefixed frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream ends, the length prefix exceeds
    /// [`MAX_FRAME_SIZE`], or reading the payload fails.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.inner.read_exact(&mut len_buf).await?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(RpcError::FrameTooLarge(len, MAX_FRAME_SIZE));
        }

        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Writes length-prefixed frames to a buffered byte stream.
///
/// Frames accumulate in the buffer until [`flush`](Self::flush) is called,
/// so a header and body written back to back reach the wire together.
///
/// A write or flush failure shuts the underlying stream down before the
/// error is returned; the connection is dead from the caller's point of
/// view and every later write fails too.
pub struct FrameWriter<W: AsyncWrite + Unpin> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// Buffers one frame. Call [`flush`](Self::flush) to push it out.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let len = payload.len() as u32;
        let written = async {
            self.inner.write_all(&len.to_be_bytes()).await?;
            self.inner.write_all(payload).await
        }
        .await;
        if let Err(e) = written {
            let _ = self.inner.shutdown().await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        if let Err(e) = self.inner.flush().await {
            let _ = self.inner.shutdown().await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Flushes buffered frames and shuts down the underlying writer.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server);

        writer.write_frame(b"hello").await.unwrap();
        writer.write_frame(b"").await.unwrap();
        writer.flush().await.unwrap();

        assert_eq!(reader.read_frame().await.unwrap(), b"hello");
        assert_eq!(reader.read_frame().await.unwrap(), b"");
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        tokio::spawn(async move {
            let mut client = client;
            let len = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
            client.write_all(&len).await.unwrap();
        });

        let err = reader.read_frame().await.unwrap_err();
        assert!(matches!(err, RpcError::FrameTooLarge(_, _)));
    }

    #[tokio::test]
    async fn flush_failure_kills_the_writer() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);

        let mut writer = FrameWriter::new(client);
        // The frame lands in the buffer; the dead peer surfaces at flush.
        writer.write_frame(b"hello").await.unwrap();
        let err = writer.flush().await.unwrap_err();
        assert!(matches!(err, RpcError::Io(_)));

        // The stream was shut down with it; later writes fail too.
        writer.write_frame(b"again").await.unwrap();
        assert!(writer.flush().await.is_err());
    }

    #[tokio::test]
    async fn eof_mid_frame_surfaces_as_io_error() {
        let (client, server) = tokio::io::duplex(64);
        let mut reader = FrameReader::new(server);

        tokio::spawn(async move {
            let mut client = client;
            // Announce 10 bytes, deliver 3, hang up.
            client.write_all(&10u32.to_be_bytes()).await.unwrap();
            client.write_all(b"abc").await.unwrap();
        });

        let err = reader.read_frame().await.unwrap_err();
        assert!(err.is_eof());
    }
}
