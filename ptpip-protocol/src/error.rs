//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing, encoding or decoding PTP/IP packets.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The declared length is inconsistent with what the packet kind requires,
    /// or a field holds a value the kind does not allow.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("truncated packet: need {needed} bytes, {available} available")]
    TruncatedPacket { needed: usize, available: usize },

    #[error("unsupported packet type: {0:#010x}")]
    UnsupportedPacketType(u32),

    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: u32 },
}

impl ProtocolError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ProtocolError::MalformedPacket(msg.into())
    }

    pub(crate) fn truncated(needed: usize, available: usize) -> Self {
        ProtocolError::TruncatedPacket { needed, available }
    }
}
