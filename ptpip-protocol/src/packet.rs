//! The PTP/IP packet catalog.
//!
//! Fourteen packet kinds, each with a fixed type tag and a static body
//! schema. [`Packet::from_tag`] resolves a tag to an empty instance of the
//! matching kind; [`Packet::decode`] fills one from a received frame.

use crate::codec::{decode_body, encode_body, Body, Field, FieldReader, FieldWriter};
use crate::codes::{DataPhase, EventCode, FailReason, OperationCode, ResponseCode};
use crate::error::ProtocolError;
use crate::frame::{Frame, HEADER_SIZE};
use bytes::{Bytes, BytesMut};
use std::fmt;
use uuid::Uuid;

/// Number of parameter slots in operation requests and responses.
pub const OPERATION_PARAMETERS: usize = 5;

/// Number of parameter slots in events.
pub const EVENT_PARAMETERS: usize = 3;

/// StartData total length meaning "not known ahead of time".
pub const UNKNOWN_DATA_LENGTH: u64 = u64::MAX;

const OPERATION_PARAMETER_RECORD: &[Field] = &[Field::U32; OPERATION_PARAMETERS];
const EVENT_PARAMETER_RECORD: &[Field] = &[Field::U32; EVENT_PARAMETERS];

/// Wire type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PacketType {
    InitCommandRequest = 0x01,
    InitCommandAck = 0x02,
    InitEventRequest = 0x03,
    InitEventAck = 0x04,
    InitFail = 0x05,
    OperationRequest = 0x06,
    OperationResponse = 0x07,
    Event = 0x08,
    StartData = 0x09,
    Data = 0x0A,
    Cancel = 0x0B,
    EndData = 0x0C,
    ProbeRequest = 0x0D,
    ProbeResponse = 0x0E,
}

impl TryFrom<u32> for PacketType {
    type Error = ProtocolError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        Ok(match tag {
            0x01 => PacketType::InitCommandRequest,
            0x02 => PacketType::InitCommandAck,
            0x03 => PacketType::InitEventRequest,
            0x04 => PacketType::InitEventAck,
            0x05 => PacketType::InitFail,
            0x06 => PacketType::OperationRequest,
            0x07 => PacketType::OperationResponse,
            0x08 => PacketType::Event,
            0x09 => PacketType::StartData,
            0x0A => PacketType::Data,
            0x0B => PacketType::Cancel,
            0x0C => PacketType::EndData,
            0x0D => PacketType::ProbeRequest,
            0x0E => PacketType::ProbeResponse,
            other => return Err(ProtocolError::UnsupportedPacketType(other)),
        })
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opens a command-data connection. Generic field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitCommandRequest {
    pub guid: Uuid,
    pub friendly_name: String,
    pub protocol_version: u32,
}

impl Body for InitCommandRequest {
    const SCHEMA: &'static [Field] = &[Field::Guid, Field::Utf16String, Field::U32];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_guid(&self.guid);
        w.put_utf16(&self.friendly_name);
        w.put_u32(self.protocol_version);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            guid: r.get_guid()?,
            friendly_name: r.get_utf16()?,
            protocol_version: r.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitCommandAck {
    pub connection_number: u32,
    pub responder_guid: Uuid,
    pub responder_friendly_name: String,
    pub responder_protocol_version: u32,
}

impl Body for InitCommandAck {
    const SCHEMA: &'static [Field] = &[Field::U32, Field::Guid, Field::Utf16String, Field::U32];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(self.connection_number);
        w.put_guid(&self.responder_guid);
        w.put_utf16(&self.responder_friendly_name);
        w.put_u32(self.responder_protocol_version);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            connection_number: r.get_u32()?,
            responder_guid: r.get_guid()?,
            responder_friendly_name: r.get_utf16()?,
            responder_protocol_version: r.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitEventRequest {
    pub connection_number: u32,
}

impl Body for InitEventRequest {
    const SCHEMA: &'static [Field] = &[Field::U32];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(self.connection_number);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            connection_number: r.get_u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitFail {
    pub reason: FailReason,
}

impl Body for InitFail {
    const SCHEMA: &'static [Field] = &[Field::U32];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(self.reason.code());
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            reason: FailReason::from(r.get_u32()?),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationRequest {
    pub data_phase: DataPhase,
    pub operation_code: OperationCode,
    pub session_id: u32,
    pub transaction_id: u32,
    /// Unused slots are zero.
    pub parameters: [u32; OPERATION_PARAMETERS],
}

impl Body for OperationRequest {
    const SCHEMA: &'static [Field] = &[
        Field::U32,
        Field::U16,
        Field::U32,
        Field::U32,
        Field::Record(OPERATION_PARAMETER_RECORD),
    ];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(self.data_phase as u32);
        w.put_u16(self.operation_code.0);
        w.put_u32(self.session_id);
        w.put_u32(self.transaction_id);
        w.put_u32_array(&self.parameters);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            data_phase: DataPhase::try_from(r.get_u32()?)?,
            operation_code: OperationCode(r.get_u16()?),
            session_id: r.get_u32()?,
            transaction_id: r.get_u32()?,
            parameters: r.get_u32_array()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationResponse {
    pub response_code: ResponseCode,
    pub session_id: u32,
    pub transaction_id: u32,
    pub parameters: [u32; OPERATION_PARAMETERS],
}

impl Body for OperationResponse {
    const SCHEMA: &'static [Field] = &[
        Field::U16,
        Field::U32,
        Field::U32,
        Field::Record(OPERATION_PARAMETER_RECORD),
    ];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u16(self.response_code.0);
        w.put_u32(self.session_id);
        w.put_u32(self.transaction_id);
        w.put_u32_array(&self.parameters);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            response_code: ResponseCode(r.get_u16()?),
            session_id: r.get_u32()?,
            transaction_id: r.get_u32()?,
            parameters: r.get_u32_array()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Event {
    pub event_code: EventCode,
    pub session_id: u32,
    pub transaction_id: u32,
    pub parameters: [u32; EVENT_PARAMETERS],
}

impl Body for Event {
    const SCHEMA: &'static [Field] = &[
        Field::U16,
        Field::U32,
        Field::U32,
        Field::Record(EVENT_PARAMETER_RECORD),
    ];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u16(self.event_code.0);
        w.put_u32(self.session_id);
        w.put_u32(self.transaction_id);
        w.put_u32_array(&self.parameters);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            event_code: EventCode(r.get_u16()?),
            session_id: r.get_u32()?,
            transaction_id: r.get_u32()?,
            parameters: r.get_u32_array()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartData {
    pub transaction_id: u32,
    /// [`UNKNOWN_DATA_LENGTH`] when the sender cannot tell in advance.
    pub total_data_length: u64,
}

impl Default for StartData {
    fn default() -> Self {
        Self {
            transaction_id: 0,
            total_data_length: UNKNOWN_DATA_LENGTH,
        }
    }
}

impl Body for StartData {
    const SCHEMA: &'static [Field] = &[Field::U32, Field::U64];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(self.transaction_id);
        w.put_u64(self.total_data_length);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            transaction_id: r.get_u32()?,
            total_data_length: r.get_u64()?,
        })
    }
}

/// Body shared by Data and EndData.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataChunk {
    pub transaction_id: u32,
    pub payload: Bytes,
}

impl Body for DataChunk {
    const SCHEMA: &'static [Field] = &[Field::U32, Field::TrailingBlob];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(self.transaction_id);
        w.put_blob(&self.payload);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            transaction_id: r.get_u32()?,
            payload: r.get_trailing_blob()?,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cancel {
    pub transaction_id: u32,
}

impl Body for Cancel {
    const SCHEMA: &'static [Field] = &[Field::U32];

    fn write_fields(&self, w: &mut FieldWriter) {
        w.put_u32(self.transaction_id);
    }

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Self {
            transaction_id: r.get_u32()?,
        })
    }
}

/// Body of InitEventAck, ProbeRequest and ProbeResponse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Empty;

impl Body for Empty {
    const SCHEMA: &'static [Field] = &[];

    fn write_fields(&self, _w: &mut FieldWriter) {}

    fn read_fields(_r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        Ok(Empty)
    }
}

/// A decoded PTP/IP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    InitCommandRequest(InitCommandRequest),
    InitCommandAck(InitCommandAck),
    InitEventRequest(InitEventRequest),
    InitEventAck,
    InitFail(InitFail),
    OperationRequest(OperationRequest),
    OperationResponse(OperationResponse),
    Event(Event),
    StartData(StartData),
    Data(DataChunk),
    Cancel(Cancel),
    EndData(DataChunk),
    ProbeRequest,
    ProbeResponse,
}

impl Packet {
    /// Returns an empty packet of the kind identified by `tag`.
    pub fn from_tag(tag: u32) -> Result<Self, ProtocolError> {
        Ok(match PacketType::try_from(tag)? {
            PacketType::InitCommandRequest => Packet::InitCommandRequest(Default::default()),
            PacketType::InitCommandAck => Packet::InitCommandAck(Default::default()),
            PacketType::InitEventRequest => Packet::InitEventRequest(Default::default()),
            PacketType::InitEventAck => Packet::InitEventAck,
            PacketType::InitFail => Packet::InitFail(Default::default()),
            PacketType::OperationRequest => Packet::OperationRequest(Default::default()),
            PacketType::OperationResponse => Packet::OperationResponse(Default::default()),
            PacketType::Event => Packet::Event(Default::default()),
            PacketType::StartData => Packet::StartData(Default::default()),
            PacketType::Data => Packet::Data(Default::default()),
            PacketType::Cancel => Packet::Cancel(Default::default()),
            PacketType::EndData => Packet::EndData(Default::default()),
            PacketType::ProbeRequest => Packet::ProbeRequest,
            PacketType::ProbeResponse => Packet::ProbeResponse,
        })
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::InitCommandRequest(_) => PacketType::InitCommandRequest,
            Packet::InitCommandAck(_) => PacketType::InitCommandAck,
            Packet::InitEventRequest(_) => PacketType::InitEventRequest,
            Packet::InitEventAck => PacketType::InitEventAck,
            Packet::InitFail(_) => PacketType::InitFail,
            Packet::OperationRequest(_) => PacketType::OperationRequest,
            Packet::OperationResponse(_) => PacketType::OperationResponse,
            Packet::Event(_) => PacketType::Event,
            Packet::StartData(_) => PacketType::StartData,
            Packet::Data(_) => PacketType::Data,
            Packet::Cancel(_) => PacketType::Cancel,
            Packet::EndData(_) => PacketType::EndData,
            Packet::ProbeRequest => PacketType::ProbeRequest,
            Packet::ProbeResponse => PacketType::ProbeResponse,
        }
    }

    /// The transaction this packet belongs to, if its kind carries one.
    pub fn transaction_id(&self) -> Option<u32> {
        match self {
            Packet::OperationRequest(p) => Some(p.transaction_id),
            Packet::OperationResponse(p) => Some(p.transaction_id),
            Packet::Event(p) => Some(p.transaction_id),
            Packet::StartData(p) => Some(p.transaction_id),
            Packet::Data(p) | Packet::EndData(p) => Some(p.transaction_id),
            Packet::Cancel(p) => Some(p.transaction_id),
            _ => None,
        }
    }

    /// Encodes the body alone.
    pub fn encode_body(&self) -> BytesMut {
        match self {
            Packet::InitCommandRequest(p) => encode_body(p),
            Packet::InitCommandAck(p) => encode_body(p),
            Packet::InitEventRequest(p) => encode_body(p),
            Packet::InitFail(p) => encode_body(p),
            Packet::OperationRequest(p) => encode_body(p),
            Packet::OperationResponse(p) => encode_body(p),
            Packet::Event(p) => encode_body(p),
            Packet::StartData(p) => encode_body(p),
            Packet::Data(p) | Packet::EndData(p) => encode_body(p),
            Packet::Cancel(p) => encode_body(p),
            Packet::InitEventAck | Packet::ProbeRequest | Packet::ProbeResponse => {
                encode_body(&Empty)
            }
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame::tagged(self.packet_type() as u32, self.encode_body().freeze())
    }

    /// Encodes header and body.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        self.to_frame().encode()
    }

    /// Decodes a tagged frame into a packet.
    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        let tag = frame
            .tag
            .ok_or_else(|| ProtocolError::malformed("packet has no type tag"))?;
        Self::decode_body(tag, &frame.body, frame.declared_length())
    }

    /// Decodes a body given its tag and the declared total length.
    pub fn decode_body(tag: u32, body: &[u8], declared_length: u32) -> Result<Self, ProtocolError> {
        let len = declared_length;
        Ok(match PacketType::try_from(tag)? {
            PacketType::InitCommandRequest => {
                Packet::InitCommandRequest(decode_body(body, len, HEADER_SIZE)?)
            }
            PacketType::InitCommandAck => Packet::InitCommandAck(decode_body(body, len, HEADER_SIZE)?),
            PacketType::InitEventRequest => {
                Packet::InitEventRequest(decode_body(body, len, HEADER_SIZE)?)
            }
            PacketType::InitEventAck => {
                decode_body::<Empty>(body, len, HEADER_SIZE)?;
                Packet::InitEventAck
            }
            PacketType::InitFail => Packet::InitFail(decode_body(body, len, HEADER_SIZE)?),
            PacketType::OperationRequest => {
                Packet::OperationRequest(decode_body(body, len, HEADER_SIZE)?)
            }
            PacketType::OperationResponse => {
                Packet::OperationResponse(decode_body(body, len, HEADER_SIZE)?)
            }
            PacketType::Event => Packet::Event(decode_body(body, len, HEADER_SIZE)?),
            PacketType::StartData => Packet::StartData(decode_body(body, len, HEADER_SIZE)?),
            PacketType::Data => Packet::Data(decode_body(body, len, HEADER_SIZE)?),
            PacketType::Cancel => Packet::Cancel(decode_body(body, len, HEADER_SIZE)?),
            PacketType::EndData => Packet::EndData(decode_body(body, len, HEADER_SIZE)?),
            PacketType::ProbeRequest => {
                decode_body::<Empty>(body, len, HEADER_SIZE)?;
                Packet::ProbeRequest
            }
            PacketType::ProbeResponse => {
                decode_body::<Empty>(body, len, HEADER_SIZE)?;
                Packet::ProbeResponse
            }
        })
    }
}
