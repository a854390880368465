//! PTP/IP packet framing.
//!
//! Standard framing (8 bytes header + body):
//!
//! ```text
//! +-----------+-----------+-------------------------------+
//! |  length   |   type    |  body                         |
//! |  4 bytes  |  4 bytes  |  length - 8 bytes             |
//! +-----------+-----------+-------------------------------+
//! ```
//!
//! Length-only framing drops the type field. It carries the bare
//! pre-handshake rejection signal (a 4-byte packet with no body) and the
//! Fuji operation, response and event envelopes.
//!
//! All integers are little-endian and `length` counts the header itself.

use crate::error::ProtocolError;
use crate::MAX_PACKET_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the standard header: length + type.
pub const HEADER_SIZE: usize = 8;

/// Size of the length prefix alone.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// How packets on a socket are delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Length and type tag.
    Tagged,
    /// Length only, no type tag.
    LengthOnly,
}

impl Framing {
    pub const fn header_size(self) -> usize {
        match self {
            Framing::Tagged => HEADER_SIZE,
            Framing::LengthOnly => LENGTH_PREFIX_SIZE,
        }
    }
}

/// The standard packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub length: u32,
    pub packet_type: u32,
}

/// One packet as it travels on a socket: optional tag plus raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Type tag, absent under length-only framing.
    pub tag: Option<u32>,
    pub body: Bytes,
}

impl Frame {
    pub fn tagged(tag: u32, body: impl Into<Bytes>) -> Self {
        Self {
            tag: Some(tag),
            body: body.into(),
        }
    }

    pub fn length_only(body: impl Into<Bytes>) -> Self {
        Self {
            tag: None,
            body: body.into(),
        }
    }

    pub fn framing(&self) -> Framing {
        if self.tag.is_some() {
            Framing::Tagged
        } else {
            Framing::LengthOnly
        }
    }

    /// The length field this frame carries on the wire.
    pub fn declared_length(&self) -> u32 {
        (self.framing().header_size() + self.body.len()) as u32
    }

    pub fn header(&self) -> Option<Header> {
        self.tag.map(|packet_type| Header {
            length: self.declared_length(),
            packet_type,
        })
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let total = self.framing().header_size() + self.body.len();
        if total > MAX_PACKET_SIZE as usize {
            return Err(ProtocolError::PacketTooLarge {
                size: total,
                max: MAX_PACKET_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u32_le(total as u32);
        if let Some(tag) = self.tag {
            buf.put_u32_le(tag);
        }
        buf.put_slice(&self.body);
        Ok(buf)
    }

    /// Decodes a frame from bytes.
    ///
    /// Returns `Ok(Some(frame))` if a complete frame was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on protocol errors.
    ///
    /// Under tagged framing a bare 4-byte length is the degenerate rejection
    /// signal; it decodes as an empty untagged frame.
    pub fn decode(buf: &mut BytesMut, framing: Framing) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the length without consuming
        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if framing == Framing::Tagged && length == LENGTH_PREFIX_SIZE {
            buf.advance(LENGTH_PREFIX_SIZE);
            return Ok(Some(Self::length_only(Bytes::new())));
        }

        let header_size = framing.header_size();
        if buf.len() < header_size {
            return Ok(None);
        }
        if length < header_size {
            return Err(ProtocolError::malformed(format!(
                "declared length {} below header size {}",
                length, header_size
            )));
        }
        if length > MAX_PACKET_SIZE as usize {
            return Err(ProtocolError::PacketTooLarge {
                size: length,
                max: MAX_PACKET_SIZE,
            });
        }
        if buf.len() < length {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let tag = match framing {
            Framing::Tagged => Some(buf.get_u32_le()),
            Framing::LengthOnly => None,
        };
        let body = buf.split_to(length - header_size).freeze();

        Ok(Some(Self { tag, body }))
    }
}

/// Accumulates socket reads and yields complete frames.
pub struct Decoder {
    buffer: BytesMut,
    framing: Framing,
}

impl Decoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            framing,
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer, self.framing)
    }

    /// Gives the decoder's buffer to a reader so it can append directly.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Switches framing, e.g. once a Fuji handshake completes.
    pub fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
