//! # ptpip-protocol
//!
//! Wire protocol implementation for PTP/IP (Picture Transfer Protocol over
//! TCP/IP, CIPA DC-X005).
//!
//! This crate provides:
//! - Packet framing with a length prefix and optional type tag
//! - A schema-driven little-endian codec for packet bodies
//! - The fourteen packet kinds of the generic protocol
//! - PTP operation, response, event and property code tables
//! - DeviceInfo and DevicePropDesc dataset parsing
//! - Fuji's non-standard init and operation envelopes
//!
//! It performs no I/O.

pub mod codec;
pub mod codes;
pub mod dataset;
pub mod error;
pub mod frame;
pub mod fuji;
pub mod packet;

pub use codec::{Body, Field};
pub use codes::{
    vendor_code, DataPhase, DevicePropCode, EventCode, FailReason, OperationCode, ResponseCode,
    VendorExtension, FUJI_PROTOCOL_VERSION, PROTOCOL_VERSION_1_0,
};
pub use dataset::{DataType, DeviceInfo, DevicePropDesc, PropForm};
pub use error::ProtocolError;
pub use frame::{Decoder, Frame, Framing, Header, HEADER_SIZE, LENGTH_PREFIX_SIZE};
pub use packet::{Packet, PacketType};

/// Default responder port.
pub const DEFAULT_PORT: u16 = 15740;

/// Placeholder responder address, normally overridden by configuration.
pub const DEFAULT_ADDRESS: &str = "192.168.0.1";

/// Maximum packet size accepted or produced (64 MiB).
pub const MAX_PACKET_SIZE: u32 = 64 * 1024 * 1024;
