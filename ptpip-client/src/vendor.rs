//! Vendor extension dispatch.
//!
//! The vendor is resolved once, from its name, when a connection is
//! configured. Every place the wire layout or the connection setup differs
//! between responders goes through [`Vendor`]; the generic path never looks at
//! Fuji packets and vice versa.

use crate::connection::{CommandChannel, Initiator, Request, ResponderEvent, ResponderInfo, Response};
use crate::error::{ClientError, OperationError};
use crate::stream::{FrameReader, FrameWriter};
use bytes::{Bytes, BytesMut};
use ptpip_protocol::codec::encode_body;
use ptpip_protocol::dataset::widen_u32;
use ptpip_protocol::fuji::{
    self, phase, FujiEvent, FujiInitCommandRequest, FujiOperationRequest, FujiOperationResponse,
};
use ptpip_protocol::packet::{
    DataChunk, InitCommandRequest, InitEventRequest, OperationRequest, StartData,
    OPERATION_PARAMETERS, UNKNOWN_DATA_LENGTH,
};
use ptpip_protocol::{
    vendor_code, DataPhase, DevicePropCode, FailReason, Frame, Framing, OperationCode, Packet,
    PacketType, ProtocolError, ResponseCode, VendorExtension, LENGTH_PREFIX_SIZE,
    PROTOCOL_VERSION_1_0,
};
use serde::Serialize;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// The closed set of supported vendor behaviours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Vendor {
    /// Plain PTP/IP as standardised.
    #[default]
    Generic,
    Fuji,
}

/// What can arrive on the event socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EventSocketPacket {
    Event(ResponderEvent),
    ProbeRequest,
    ProbeResponse,
    Other(PacketType),
}

impl Vendor {
    /// Resolves a vendor name through the vendor code table. Unknown names
    /// get the generic behaviour.
    pub fn select(name: &str) -> Self {
        Self::from_code(vendor_code(name))
    }

    pub fn from_code(code: u32) -> Self {
        match VendorExtension::from_code(code) {
            Some(VendorExtension::Fuji) => Vendor::Fuji,
            _ => Vendor::Generic,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Vendor::Generic => "generic",
            Vendor::Fuji => VendorExtension::Fuji.short_name(),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Vendor::Generic => 0,
            Vendor::Fuji => VendorExtension::Fuji.code(),
        }
    }

    /// Builds the InitCommandRequest this vendor's responders accept.
    pub fn build_init_packet(&self, initiator: &Initiator) -> Frame {
        match self {
            Vendor::Generic => Packet::InitCommandRequest(InitCommandRequest {
                guid: initiator.guid,
                friendly_name: initiator.friendly_name.clone(),
                protocol_version: PROTOCOL_VERSION_1_0,
            })
            .to_frame(),
            Vendor::Fuji => {
                let body = FujiInitCommandRequest::new(initiator.guid, initiator.friendly_name.clone());
                Frame::tagged(PacketType::InitCommandRequest as u32, encode_body(&body).freeze())
            }
        }
    }

    /// Framing of operation traffic once the handshake is done.
    pub fn operation_framing(&self) -> Framing {
        match self {
            Vendor::Generic => Framing::Tagged,
            Vendor::Fuji => Framing::LengthOnly,
        }
    }

    /// Bytes at the start of a streamer packet that precede the image.
    pub fn stream_frame_offset(&self) -> usize {
        match self {
            Vendor::Generic => LENGTH_PREFIX_SIZE,
            Vendor::Fuji => fuji::STREAM_FRAME_OFFSET,
        }
    }

    pub fn supports_probe(&self) -> bool {
        matches!(self, Vendor::Generic)
    }

    /// Sends the init packet, reads the ack and runs whatever the vendor
    /// needs on top before the event socket is dialed.
    pub(crate) async fn init_command_data(
        &self,
        channel: &mut CommandChannel,
        initiator: &Initiator,
    ) -> Result<ResponderInfo, ClientError> {
        tracing::debug!("Sending {} InitCommandRequest", self.name());
        channel.writer.write_frame(&self.build_init_packet(initiator)).await?;

        let reply = channel.read_frame("InitCommandAck").await?;
        let ack = match init_reply(&reply)? {
            Packet::InitCommandAck(ack) => ack,
            other => return Err(violation("InitCommandAck", &other)),
        };
        let responder = ResponderInfo {
            connection_number: ack.connection_number,
            guid: ack.responder_guid,
            friendly_name: ack.responder_friendly_name,
            protocol_version: ack.responder_protocol_version,
        };

        channel.reader.set_framing(self.operation_framing());
        if let Vendor::Fuji = self {
            // No event handshake follows, so numbering starts here
            channel.sequencer.seed();
            self.fuji_open_capture(channel, &responder).await?;
        }
        Ok(responder)
    }

    async fn fuji_open_capture(
        &self,
        channel: &mut CommandChannel,
        responder: &ResponderInfo,
    ) -> Result<(), ClientError> {
        tracing::info!("Opening a session...");
        channel
            .execute(*self, &Request::new(OperationCode::OPEN_SESSION).with_param(1))
            .await?
            .check()?;

        tracing::info!(
            "Setting init sequence; accept the connection on {} if prompted",
            responder.friendly_name
        );
        channel
            .execute(*self, &set_value_request(DevicePropCode::FUJI_INIT_SEQUENCE, fuji::INIT_SEQUENCE))
            .await?
            .check()?;

        let version = channel
            .execute(
                *self,
                &Request::new(OperationCode::GET_DEVICE_PROP_VALUE)
                    .with_param(u32::from(DevicePropCode::FUJI_APP_VERSION.0)),
            )
            .await?
            .check()?;
        let version = widen_u32(&version.data);
        tracing::info!("Acknowledging minimum application version {:#x}", version);
        channel
            .execute(*self, &set_value_request(DevicePropCode::FUJI_APP_VERSION, version))
            .await?
            .check()?;

        tracing::info!("Initiating open capture...");
        channel
            .execute(*self, &Request::new(OperationCode::INITIATE_OPEN_CAPTURE))
            .await?
            .check()?;
        Ok(())
    }

    /// Completes the event socket setup and returns its halves.
    ///
    /// Generic responders answer InitEventRequest with InitEventAck, which
    /// seeds the transaction counter. Fuji needs no exchange at all.
    pub(crate) async fn init_event(
        &self,
        stream: TcpStream,
        responder: &ResponderInfo,
        channel: &mut CommandChannel,
        shutdown: watch::Receiver<bool>,
        read_timeout: Duration,
    ) -> Result<(FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>), ClientError> {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(read_half, Framing::Tagged).with_shutdown(shutdown);
        let mut writer = FrameWriter::new(write_half);

        match self {
            Vendor::Generic => {
                writer
                    .write_packet(&Packet::InitEventRequest(InitEventRequest {
                        connection_number: responder.connection_number,
                    }))
                    .await?;
                let reply = tokio::time::timeout(read_timeout, reader.read_frame())
                    .await
                    .map_err(|_| ClientError::Timeout("InitEventAck"))??;
                match init_reply(&reply)? {
                    Packet::InitEventAck => channel.sequencer.seed(),
                    other => return Err(violation("InitEventAck", &other)),
                }
            }
            Vendor::Fuji => {
                reader.set_framing(Framing::LengthOnly);
                tracing::debug!("Fuji event socket needs no handshake");
            }
        }
        Ok((reader, writer))
    }

    /// Wraps a dialed streamer socket. No packets are exchanged.
    pub(crate) fn init_streamer(
        &self,
        stream: TcpStream,
        shutdown: watch::Receiver<bool>,
    ) -> (FrameReader<OwnedReadHalf>, OwnedWriteHalf) {
        let (read_half, write_half) = stream.into_split();
        (
            FrameReader::new(read_half, Framing::LengthOnly).with_shutdown(shutdown),
            write_half,
        )
    }

    /// Runs one transaction on the command-data socket.
    pub(crate) async fn exchange(
        &self,
        channel: &mut CommandChannel,
        request: &Request,
    ) -> Result<Response, ClientError> {
        match self {
            Vendor::Generic => generic_exchange(channel, request).await,
            Vendor::Fuji => fuji_exchange(channel, request).await,
        }
    }

    pub(crate) fn decode_event_frame(&self, frame: &Frame) -> Result<EventSocketPacket, ProtocolError> {
        match self {
            Vendor::Generic => Ok(match Packet::decode(frame)? {
                Packet::Event(event) => EventSocketPacket::Event(event.into()),
                Packet::ProbeRequest => EventSocketPacket::ProbeRequest,
                Packet::ProbeResponse => EventSocketPacket::ProbeResponse,
                other => EventSocketPacket::Other(other.packet_type()),
            }),
            Vendor::Fuji => Ok(EventSocketPacket::Event(FujiEvent::decode(frame)?.into())),
        }
    }
}

/// SetDevicePropValue carrying a 32-bit value.
pub(crate) fn set_value_request(code: DevicePropCode, value: u32) -> Request {
    Request::new(OperationCode::SET_DEVICE_PROP_VALUE)
        .with_param(u32::from(code.0))
        .with_data(Bytes::copy_from_slice(&value.to_le_bytes()))
}

/// Maps a handshake reply to a packet, turning rejections into errors.
fn init_reply(frame: &Frame) -> Result<Packet, ClientError> {
    if frame.tag.is_none() {
        tracing::debug!("Responder sent a bare rejection");
        return Err(ClientError::RejectedByResponder(FailReason::Unspecified));
    }
    match Packet::decode(frame)? {
        Packet::InitFail(fail) => {
            tracing::debug!("Responder rejected us: {}", fail.reason);
            Err(ClientError::RejectedByResponder(fail.reason))
        }
        packet => Ok(packet),
    }
}

fn violation(expected: &'static str, received: &Packet) -> ClientError {
    ClientError::ProtocolViolation {
        expected,
        received: received.packet_type().to_string(),
    }
}

async fn generic_exchange(
    channel: &mut CommandChannel,
    request: &Request,
) -> Result<Response, ClientError> {
    let transaction_id = if request.reserved_transaction {
        channel.sequencer.issue_reserved()
    } else {
        channel.sequencer.next_id()
    };
    let data_phase = if request.data.is_some() {
        DataPhase::DataOut
    } else {
        DataPhase::NoDataOrDataIn
    };

    channel
        .writer
        .write_packet(&Packet::OperationRequest(OperationRequest {
            data_phase,
            operation_code: request.operation,
            session_id: channel.sequencer.session_id(),
            transaction_id,
            parameters: request.parameters,
        }))
        .await?;

    if let Some(payload) = &request.data {
        channel
            .writer
            .write_packet(&Packet::StartData(StartData {
                transaction_id,
                total_data_length: payload.len() as u64,
            }))
            .await?;
        channel
            .writer
            .write_packet(&Packet::EndData(DataChunk {
                transaction_id,
                payload: payload.clone(),
            }))
            .await?;
    }

    let mut data = BytesMut::new();
    let mut raw = Vec::new();
    let mut announced = None;

    loop {
        let frame = channel.read_frame("operation response").await?;
        let packet = Packet::decode(&frame)?;
        if let Some(received) = packet.transaction_id() {
            if channel.sequencer.is_stale(received) {
                tracing::debug!(
                    "Discarding late {} for transaction {}",
                    packet.packet_type(),
                    received
                );
                continue;
            }
            channel.sequencer.validate(received)?;
        }
        raw.push(frame.encode()?.freeze());

        match packet {
            Packet::StartData(start) => {
                if start.total_data_length != UNKNOWN_DATA_LENGTH {
                    announced = Some(start.total_data_length);
                }
            }
            Packet::Data(chunk) | Packet::EndData(chunk) => data.extend_from_slice(&chunk.payload),
            Packet::Cancel(cancel) => {
                return Err(OperationError::Cancelled {
                    transaction_id: cancel.transaction_id,
                }
                .into())
            }
            Packet::OperationResponse(response) => {
                if let Some(expected) = announced {
                    if expected != data.len() as u64 {
                        tracing::warn!(
                            "{}: announced {} data bytes, received {}",
                            request.operation,
                            expected,
                            data.len()
                        );
                    }
                }
                return Ok(Response {
                    operation: request.operation,
                    transaction_id: response.transaction_id,
                    code: response.response_code,
                    parameters: response.parameters,
                    data: data.freeze(),
                    raw,
                });
            }
            other => return Err(violation("OperationResponse", &other)),
        }
    }
}

/// Fuji numbers every request from the counter, OpenSession included.
async fn fuji_exchange(
    channel: &mut CommandChannel,
    request: &Request,
) -> Result<Response, ClientError> {
    let transaction_id = channel.sequencer.next_id();
    let mut envelope = FujiOperationRequest {
        data_phase: phase::NO_DATA,
        operation_code: request.operation,
        transaction_id,
        parameters: request.parameters,
    };
    tracing::debug!("sending Fuji request {:#010x}", envelope.envelope_tag());
    channel.writer.write_frame(&envelope.to_frame()).await?;

    if let Some(payload) = &request.data {
        // Same transaction, value in the first slot; only this one is answered
        envelope.data_phase = phase::DATA;
        envelope.parameters = [0; OPERATION_PARAMETERS];
        envelope.parameters[0] = widen_u32(payload);
        channel.writer.write_frame(&envelope.to_frame()).await?;
    }

    let mut data = BytesMut::new();
    let mut raw = Vec::new();

    loop {
        let frame = channel.read_frame("operation response").await?;
        let response = FujiOperationResponse::decode(&frame)?;
        if channel.sequencer.is_stale(response.transaction_id) {
            tracing::debug!(
                "Discarding late Fuji response for transaction {}",
                response.transaction_id
            );
            continue;
        }
        channel.sequencer.validate(response.transaction_id)?;
        raw.push(frame.encode()?.freeze());
        data.extend_from_slice(&response.data);
        if response.is_data() {
            continue;
        }

        let code = if response.is_success_for(request.operation) {
            ResponseCode::OK
        } else {
            response.response_code()
        };
        return Ok(Response {
            operation: request.operation,
            transaction_id,
            code,
            parameters: [0; OPERATION_PARAMETERS],
            data: data.freeze(),
            raw,
        });
    }
}
