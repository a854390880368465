//! Framed packet I/O over one socket half.

use crate::error::ClientError;
use bytes::Bytes;
use ptpip_protocol::{Decoder, Frame, Framing, Packet};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

/// Reads frames from an async byte source.
///
/// A read blocked on the socket returns [`ClientError::ConnectionClosed`] as
/// soon as the shutdown signal fires.
pub struct FrameReader<R> {
    inner: R,
    decoder: Decoder,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, framing: Framing) -> Self {
        Self {
            inner,
            decoder: Decoder::new(framing),
            shutdown: None,
        }
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn framing(&self) -> Framing {
        self.decoder.framing()
    }

    pub fn set_framing(&mut self, framing: Framing) {
        self.decoder.set_framing(framing);
    }

    /// Reads the next complete frame.
    pub async fn read_frame(&mut self) -> Result<Frame, ClientError> {
        loop {
            if let Some(frame) = self.decoder.decode_frame()? {
                return Ok(frame);
            }

            let n = match self.shutdown.as_mut() {
                Some(shutdown) => {
                    if *shutdown.borrow() {
                        return Err(ClientError::ConnectionClosed);
                    }
                    tokio::select! {
                        read = self.inner.read_buf(self.decoder.buffer_mut()) => read?,
                        _ = shutdown.changed() => return Err(ClientError::ConnectionClosed),
                    }
                }
                None => self.inner.read_buf(self.decoder.buffer_mut()).await?,
            };

            if n == 0 {
                tracing::debug!("peer closed connection ({} bytes buffered)", self.decoder.buffered());
                return Err(ClientError::ConnectionClosed);
            }
        }
    }

    /// Reads the next frame and decodes it as a tagged packet.
    pub async fn read_packet(&mut self) -> Result<(Packet, Bytes), ClientError> {
        let frame = self.read_frame().await?;
        let packet = Packet::decode(&frame)?;
        tracing::debug!("received {} ({} bytes)", packet.packet_type(), frame.declared_length());
        Ok((packet, frame.encode()?.freeze()))
    }

    /// Reads one length-prefixed record and returns it whole, prefix included.
    pub async fn read_raw(&mut self) -> Result<Bytes, ClientError> {
        let frame = self.read_frame().await?;
        Ok(frame.encode()?.freeze())
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Writes frames to an async byte sink.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one frame. A sink that stops accepting bytes part way through
    /// yields [`ClientError::PartialWrite`].
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ClientError> {
        let encoded = frame.encode()?;
        let mut written = 0;
        while written < encoded.len() {
            let n = self.inner.write(&encoded[written..]).await?;
            if n == 0 {
                return Err(ClientError::PartialWrite {
                    written,
                    expected: encoded.len(),
                });
            }
            written += n;
        }
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn write_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        tracing::debug!("sending {}", packet.packet_type());
        self.write_frame(&packet.to_frame()).await
    }

    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
