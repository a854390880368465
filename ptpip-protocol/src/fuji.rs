//! Fuji deviations from the generic wire layout.
//!
//! Fuji responders expect the protocol version first in the init request
//! and, once the command handshake is done, drop the type tag from every
//! operation, response and event packet. The data phase shrinks to 16 bits
//! and shares a 32-bit word with the operation code:
//!
//! ```text
//! +-----------+-------+--------+-----------+---------------------+
//! |  length   | phase | opcode |  tid      |  params (5 x u32)   |
//! |  4 bytes  |  u16  |  u16   |  4 bytes  |  20 bytes           |
//! +-----------+-------+--------+-----------+---------------------+
//! ```

use crate::codec::{decode_body, encode_body, Body, Field, FieldReader, FieldWriter};
use crate::codes::{DevicePropCode, EventCode, OperationCode, ResponseCode, FUJI_PROTOCOL_VERSION};
use crate::dataset::DevicePropDesc;
use crate::error::ProtocolError;
use crate::frame::{Frame, LENGTH_PREFIX_SIZE};
use crate::packet::{EVENT_PARAMETERS, OPERATION_PARAMETERS};
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use uuid::Uuid;

/// Fuji data phase values.
pub mod phase {
    /// Request without outgoing data.
    pub const NO_DATA: u16 = 0x0001;
    /// Request or response carrying data.
    pub const DATA: u16 = 0x0002;
    /// Zero-payload end of a data phase.
    pub const END: u16 = 0x0003;
    /// Value Fuji puts in the phase slot of events.
    pub const EVENT: u16 = 0x0004;
}

/// Bytes of a streamer packet before the image data, length prefix included.
pub const STREAM_FRAME_OFFSET: usize = 18;

/// Value written to `FUJI_INIT_SEQUENCE` during the command-data init.
pub const INIT_SEQUENCE: u32 = 0x0000_0005;

const OPERATION_PARAMETER_RECORD: &[Field] = &[Field::U32; OPERATION_PARAMETERS];
const EVENT_PARAMETER_RECORD: &[Field] = &[Field::U32; EVENT_PARAMETERS];

/// Fuji's InitCommandRequest: protocol version moved to the front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FujiInitCommandRequest {
    pub protocol_version: u32,
    pub guid: Uuid,
    pub friendly_name: String,
}

impl FujiInitCommandRequest {
    pub fn new(guid: Uuid, friendly_name: impl Into<String>) -> Self {
        Self {
            protocol_version: FUJI_PROTOCOL_VERSION,
            guid,
            friendly_name: friendly_name.into(),
        }
    }
}

impl Body for FujiInitCommandRequest {
    const SCHEMA: &'static [Field] = &[Field::U32, Field::Guid, Field::Utf16String];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(self.protocol_version);
        w.put_guid(&self.guid);
        w.put_utf16(&self.friendly_name);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            protocol_version: r.get_u32()?,
            guid: r.get_guid()?,
            friendly_name: r.get_utf16()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FujiOperationRequest {
    pub data_phase: u16,
    pub operation_code: OperationCode,
    pub transaction_id: u32,
    pub parameters: [u32; OPERATION_PARAMETERS],
}

impl FujiOperationRequest {
    pub fn new(operation_code: OperationCode, transaction_id: u32, parameter: u32) -> Self {
        Self {
            data_phase: phase::NO_DATA,
            operation_code,
            transaction_id,
            parameters: [parameter, 0, 0, 0, 0],
        }
    }

    /// The first body word as the responder sees it: `(opcode << 16) | phase`.
    pub fn envelope_tag(&self) -> u32 {
        (u32::from(self.operation_code.0) << 16) | u32::from(self.data_phase)
    }

    pub fn to_frame(&self) -> Frame {
        Frame::length_only(encode_body(self).freeze())
    }

    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        self.to_frame().encode()
    }

    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        decode_body(&frame.body, frame.declared_length(), LENGTH_PREFIX_SIZE)
    }
}

impl Body for FujiOperationRequest {
    const SCHEMA: &'static [Field] = &[
        Field::U16,
        Field::U16,
        Field::U32,
        Field::Record(OPERATION_PARAMETER_RECORD),
    ];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u16(self.data_phase);
        w.put_u16(self.operation_code.0);
        w.put_u32(self.transaction_id);
        w.put_u32_array(&self.parameters);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            data_phase: r.get_u16()?,
            operation_code: OperationCode(r.get_u16()?),
            transaction_id: r.get_u32()?,
            parameters: r.get_u32_array()?,
        })
    }
}

/// Response envelope. `data` holds whatever follows the fixed fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FujiOperationResponse {
    pub data_phase: u16,
    /// A response code, or the operation code for data packets.
    pub code: u16,
    pub transaction_id: u32,
    pub data: Bytes,
}

impl FujiOperationResponse {
    pub fn end(transaction_id: u32, response_code: ResponseCode) -> Self {
        Self {
            data_phase: phase::END,
            code: response_code.0,
            transaction_id,
            data: Bytes::new(),
        }
    }

    pub fn data(operation_code: OperationCode, transaction_id: u32, data: impl Into<Bytes>) -> Self {
        Self {
            data_phase: phase::DATA,
            code: operation_code.0,
            transaction_id,
            data: data.into(),
        }
    }

    pub fn is_data(&self) -> bool {
        self.data_phase == phase::DATA
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode(self.code)
    }

    /// Whether `code` means success for a request of `operation`.
    ///
    /// Data packets echo the operation code, and OpenSession also accepts
    /// SessionAlreadyOpen.
    pub fn is_success_for(&self, operation: OperationCode) -> bool {
        if self.code == ResponseCode::OK.0 {
            return true;
        }
        match operation {
            OperationCode::OPEN_SESSION => self.code == ResponseCode::SESSION_ALREADY_OPEN.0,
            OperationCode::GET_DEVICE_PROP_VALUE
            | OperationCode::GET_DEVICE_PROP_DESC
            | OperationCode::FUJI_GET_DEVICE_INFO
            | OperationCode::FUJI_GET_CAPTURE_PREVIEW => self.is_data() && self.code == operation.0,
            _ => false,
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::length_only(encode_body(self).freeze())
    }

    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        self.to_frame().encode()
    }

    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        decode_body(&frame.body, frame.declared_length(), LENGTH_PREFIX_SIZE)
    }
}

impl Body for FujiOperationResponse {
    const SCHEMA: &'static [Field] = &[Field::U16, Field::U16, Field::U32, Field::TrailingBlob];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u16(self.data_phase);
        w.put_u16(self.code);
        w.put_u32(self.transaction_id);
        w.put_blob(&self.data);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            data_phase: r.get_u16()?,
            code: r.get_u16()?,
            transaction_id: r.get_u32()?,
            data: r.get_trailing_blob()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FujiEvent {
    pub data_phase: u16,
    pub event_code: EventCode,
    /// Unidentified; observed as 1.
    pub amount: u32,
    pub transaction_id: u32,
    pub parameters: [u32; EVENT_PARAMETERS],
}

impl FujiEvent {
    pub fn new(event_code: EventCode, transaction_id: u32, parameters: [u32; EVENT_PARAMETERS]) -> Self {
        Self {
            data_phase: phase::EVENT,
            event_code,
            amount: 1,
            transaction_id,
            parameters,
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::length_only(encode_body(self).freeze())
    }

    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        decode_body(&frame.body, frame.declared_length(), LENGTH_PREFIX_SIZE)
    }
}

impl Body for FujiEvent {
    const SCHEMA: &'static [Field] = &[
        Field::U16,
        Field::U16,
        Field::U32,
        Field::U32,
        Field::Record(EVENT_PARAMETER_RECORD),
    ];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u16(self.data_phase);
        w.put_u16(self.event_code.0);
        w.put_u32(self.amount);
        w.put_u32(self.transaction_id);
        w.put_u32_array(&self.parameters);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            data_phase: r.get_u16()?,
            event_code: EventCode(r.get_u16()?),
            amount: r.get_u32()?,
            transaction_id: r.get_u32()?,
            parameters: r.get_u32_array()?,
        })
    }
}

/// One entry of the Fuji current-state list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PropertyState {
    pub code: DevicePropCode,
    pub value: u32,
}

/// Parses the reply to GetDevicePropValue(`FUJI_CURRENT_STATE`):
/// a `u16` count followed by `(u16 code, u32 value)` pairs.
pub fn parse_device_state(buf: &[u8]) -> Result<Vec<PropertyState>, ProtocolError> {
    let mut r = FieldReader::new(buf, 0);
    let count = r.get_u16()? as usize;
    if count * 6 > r.remaining() {
        return Err(ProtocolError::truncated(count * 6, r.remaining()));
    }
    (0..count)
        .map(|_| {
            Ok(PropertyState {
                code: DevicePropCode(r.get_u16()?),
                value: r.get_u32()?,
            })
        })
        .collect()
}

/// Parses the reply to Fuji GetDeviceInfo: a `u32` count followed by
/// length-prefixed DevicePropDesc datasets.
pub fn parse_device_info(buf: &[u8]) -> Result<Vec<DevicePropDesc>, ProtocolError> {
    let mut r = FieldReader::new(buf, 0);
    let count = r.get_u32()? as usize;
    let mut list = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        let length = r.get_u32()? as usize;
        // The length counts its own four bytes
        let raw = r.get_bytes(length.saturating_sub(4))?;
        list.push(DevicePropDesc::parse(raw)?);
    }
    Ok(list)
}
