//! In-process responder for handshake and end-to-end tests.
//!
//! Listens on two ephemeral loopback ports: one shared by the command-data
//! and event sockets (accepted in that order) and one for the streamer.

use crate::error::ClientError;
use crate::stream::{FrameReader, FrameWriter};
use bytes::{Bytes, BytesMut};
use ptpip_protocol::fuji::{self, phase, FujiEvent, FujiOperationRequest, FujiOperationResponse};
use ptpip_protocol::packet::{
    DataChunk, Event, InitCommandAck, InitFail, OperationRequest, OperationResponse, StartData,
};
use ptpip_protocol::{
    DataPhase, DevicePropCode, EventCode, FailReason, Frame, Framing, OperationCode, Packet,
    ResponseCode, FUJI_PROTOCOL_VERSION, PROTOCOL_VERSION_1_0,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub(crate) const MOCK_GUID: &str = "3e8626cc-5059-4225-bdd6-d160b2e6a60f";
pub(crate) const MOCK_NAME: &str = "mock responder";
pub(crate) const MOCK_APP_VERSION: u32 = 0x0002_0001;
/// Stand-in JPEG used for capture previews and live view frames.
pub(crate) const MOCK_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0xFF, 0xD9];
pub(crate) const MOCK_FRAME_COUNT: usize = 3;

const SIGNAL_TIMEOUT: Duration = Duration::from_secs(2);
/// How long [`MockBehavior::SlowFirstReply`] holds back its first response.
pub(crate) const SLOW_REPLY_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockBehavior {
    Generic,
    Fuji,
    /// Answers InitCommandRequest with InitFail(RejectedInitiator).
    RejectInitiator,
    /// Answers InitCommandRequest with a bare 4-byte length.
    DegenerateReject,
    /// Answers InitCommandRequest with InitEventAck.
    WrongAck,
    /// Answers InitEventRequest with InitFail(Busy).
    RejectEvent,
    /// Answers InitEventRequest with ProbeResponse.
    WrongEventAck,
    /// Replies with a transaction id the initiator never issued.
    WrongTransactionId,
    /// Never answers ProbeRequest.
    SilentProbe,
    /// Reads operation requests and never replies.
    Unresponsive,
    /// Holds back the first operation response, then answers normally.
    SlowFirstReply,
}

/// An operation request as the mock received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecordedRequest {
    pub operation: OperationCode,
    pub data_phase: u32,
    pub transaction_id: u32,
    pub parameters: [u32; 5],
}

struct Shared {
    behavior: MockBehavior,
    events_tx: mpsc::UnboundedSender<Frame>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    command_closed: watch::Sender<bool>,
    probe_answered: Notify,
    properties: parking_lot::Mutex<HashMap<u16, Vec<u8>>>,
    requests: parking_lot::Mutex<Vec<RecordedRequest>>,
}

impl Shared {
    fn record(&self, request: RecordedRequest) {
        self.requests.lock().push(request);
    }

    fn property(&self, code: u32) -> Option<Vec<u8>> {
        self.properties.lock().get(&(code as u16)).cloned()
    }
}

pub(crate) struct MockResponder {
    addr: SocketAddr,
    streamer_addr: SocketAddr,
    shared: Arc<Shared>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockResponder {
    pub(crate) async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let streamer = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let streamer_addr = streamer.local_addr().unwrap();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (command_closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            behavior,
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            command_closed,
            probe_answered: Notify::new(),
            properties: parking_lot::Mutex::new(initial_properties(behavior)),
            requests: parking_lot::Mutex::new(Vec::new()),
        });

        let sockets = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                let Ok((command, _)) = listener.accept().await else {
                    return;
                };
                let command_task = tokio::spawn(serve_command(command, Arc::clone(&shared)));
                if let Ok((event, _)) = listener.accept().await {
                    serve_event(event, shared).await;
                }
                let _ = command_task.await;
            })
        };
        let stream = tokio::spawn(async move {
            if let Ok((socket, _)) = streamer.accept().await {
                serve_streamer(socket, behavior).await;
            }
        });

        Self {
            addr,
            streamer_addr,
            shared,
            tasks: vec![sockets, stream],
        }
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn streamer_addr(&self) -> SocketAddr {
        self.streamer_addr
    }

    /// Queues a frame for the event socket.
    pub(crate) fn send_event(&self, frame: Frame) {
        let _ = self.shared.events_tx.send(frame);
    }

    /// Waits for the initiator to close the command-data socket.
    pub(crate) async fn command_socket_closed(&self) -> bool {
        let mut closed = self.shared.command_closed.subscribe();
        let closed_ok = matches!(
            tokio::time::timeout(SIGNAL_TIMEOUT, closed.wait_for(|closed| *closed)).await,
            Ok(Ok(_))
        );
        closed_ok
    }

    /// Probes the initiator over the event socket.
    pub(crate) async fn probe_initiator(&self) -> bool {
        self.send_event(Packet::ProbeRequest.to_frame());
        tokio::time::timeout(SIGNAL_TIMEOUT, self.shared.probe_answered.notified())
            .await
            .is_ok()
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().clone()
    }

    pub(crate) fn property(&self, code: DevicePropCode) -> Option<Vec<u8>> {
        self.shared.property(u32::from(code.0))
    }
}

impl Drop for MockResponder {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn initial_properties(behavior: MockBehavior) -> HashMap<u16, Vec<u8>> {
    let mut properties = HashMap::new();
    if behavior == MockBehavior::Fuji {
        properties.insert(DevicePropCode::FUJI_INIT_SEQUENCE.0, vec![0, 0, 0, 0]);
        properties.insert(
            DevicePropCode::FUJI_APP_VERSION.0,
            MOCK_APP_VERSION.to_le_bytes().to_vec(),
        );
        properties.insert(DevicePropCode::FUJI_EXPOSURE_INDEX.0, vec![0x00, 0x19, 0x00, 0x80]);
        properties.insert(DevicePropCode::FUJI_FILM_SIMULATION.0, vec![0x01, 0x00]);
    } else {
        properties.insert(DevicePropCode::BATTERY_LEVEL.0, vec![80]);
        properties.insert(DevicePropCode::EXPOSURE_INDEX.0, 400u16.to_le_bytes().to_vec());
    }
    properties
}

pub(crate) fn mock_guid() -> Uuid {
    Uuid::parse_str(MOCK_GUID).unwrap()
}

fn ptp_string(s: &str) -> Vec<u8> {
    if s.is_empty() {
        return vec![0];
    }
    let units: Vec<u16> = s.encode_utf16().chain(std::iter::once(0)).collect();
    let mut out = vec![units.len() as u8];
    for unit in units {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

fn u16_array(values: &[u16]) -> Vec<u8> {
    let mut out = (values.len() as u32).to_le_bytes().to_vec();
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub(crate) fn device_info_dataset() -> Vec<u8> {
    let mut raw = Vec::new();
    raw.extend_from_slice(&100u16.to_le_bytes());
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.extend_from_slice(&0u16.to_le_bytes());
    raw.extend(ptp_string(""));
    raw.extend_from_slice(&0u16.to_le_bytes());
    raw.extend(u16_array(&[0x1001, 0x1002, 0x1003, 0x100E, 0x1014, 0x1015, 0x1016]));
    raw.extend(u16_array(&[0x400D]));
    raw.extend(u16_array(&[0x5001, 0x500F]));
    raw.extend(u16_array(&[0x3801]));
    raw.extend(u16_array(&[0x3801]));
    raw.extend(ptp_string("Mock"));
    raw.extend(ptp_string("Responder 1"));
    raw.extend(ptp_string("1.0"));
    raw.extend(ptp_string("0001"));
    raw
}

/// ExposureIndex: UINT16, read-write, enumerated.
fn exposure_index_desc(current: &[u8]) -> Vec<u8> {
    let mut raw = vec![0x0F, 0x50, 0x04, 0x00, 0x01];
    raw.extend_from_slice(&200u16.to_le_bytes());
    raw.extend_from_slice(current);
    raw.push(2);
    raw.extend_from_slice(&4u16.to_le_bytes());
    for iso in [200u16, 400, 800, 1600] {
        raw.extend_from_slice(&iso.to_le_bytes());
    }
    raw
}

/// FilmSimulation: UINT16, read-write, enumerated 1..=11.
pub(crate) fn film_simulation_desc() -> Vec<u8> {
    let mut raw = vec![0x01, 0xd0, 0x04, 0x00, 0x01, 0x01, 0x00, 0x01, 0x00, 0x02, 0x0b, 0x00];
    for v in 1u16..=11 {
        raw.extend_from_slice(&v.to_le_bytes());
    }
    raw
}

fn fuji_state_list(properties: &HashMap<u16, Vec<u8>>) -> Vec<u8> {
    let mut codes: Vec<&u16> = properties.keys().collect();
    codes.sort();
    let mut raw = (codes.len() as u16).to_le_bytes().to_vec();
    for code in codes {
        raw.extend_from_slice(&code.to_le_bytes());
        raw.extend_from_slice(&ptpip_protocol::dataset::widen_u32(&properties[code]).to_le_bytes());
    }
    raw
}

async fn serve_command(socket: TcpStream, shared: Arc<Shared>) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half, Framing::Tagged);
    let mut writer = FrameWriter::new(write_half);

    let Ok(init) = reader.read_frame().await else {
        return;
    };

    let rejection = match shared.behavior {
        MockBehavior::RejectInitiator => Some(
            Packet::InitFail(InitFail {
                reason: FailReason::RejectedInitiator,
            })
            .to_frame(),
        ),
        MockBehavior::DegenerateReject => Some(Frame::length_only(Bytes::new())),
        MockBehavior::WrongAck => Some(Packet::InitEventAck.to_frame()),
        MockBehavior::Fuji if !init.body.starts_with(&FUJI_PROTOCOL_VERSION.to_le_bytes()) => Some(
            Packet::InitFail(InitFail {
                reason: FailReason::FujiInvalidParameter,
            })
            .to_frame(),
        ),
        _ => None,
    };
    if let Some(rejection) = rejection {
        let _ = writer.write_frame(&rejection).await;
        // Anything but more data means the initiator hung up
        let closed = reader.read_frame().await.is_err();
        shared.command_closed.send_replace(closed);
        return;
    }

    let ack = Packet::InitCommandAck(InitCommandAck {
        connection_number: 1,
        responder_guid: mock_guid(),
        responder_friendly_name: MOCK_NAME.to_string(),
        responder_protocol_version: PROTOCOL_VERSION_1_0,
    });
    if writer.write_packet(&ack).await.is_err() {
        return;
    }

    let result = if shared.behavior == MockBehavior::Fuji {
        reader.set_framing(Framing::LengthOnly);
        serve_fuji_operations(&mut reader, &mut writer, &shared).await
    } else {
        serve_generic_operations(&mut reader, &mut writer, &shared).await
    };
    tracing::debug!("mock command socket done: {:?}", result.err());
    shared.command_closed.send_replace(true);
}

async fn serve_generic_operations<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    shared: &Shared,
) -> Result<(), ClientError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut answered = 0usize;

    loop {
        let (packet, _) = reader.read_packet().await?;
        let Packet::OperationRequest(request) = packet else {
            continue;
        };
        shared.record(RecordedRequest {
            operation: request.operation_code,
            data_phase: request.data_phase as u32,
            transaction_id: request.transaction_id,
            parameters: request.parameters,
        });

        let mut incoming = None;
        if request.data_phase == DataPhase::DataOut {
            let mut payload = BytesMut::new();
            loop {
                match reader.read_packet().await?.0 {
                    Packet::StartData(_) => {}
                    Packet::Data(chunk) => payload.extend_from_slice(&chunk.payload),
                    Packet::EndData(chunk) => {
                        payload.extend_from_slice(&chunk.payload);
                        break;
                    }
                    _ => break,
                }
            }
            incoming = Some(payload.to_vec());
        }

        if shared.behavior == MockBehavior::Unresponsive {
            continue;
        }

        let transaction_id = if shared.behavior == MockBehavior::WrongTransactionId {
            request.transaction_id.wrapping_add(7)
        } else {
            request.transaction_id
        };
        let (code, data) = generic_reply(&request, incoming, shared);

        if shared.behavior == MockBehavior::SlowFirstReply && answered == 0 {
            tokio::time::sleep(SLOW_REPLY_DELAY).await;
        }
        answered += 1;

        if let Some(data) = data {
            let split = data.len() / 2;
            writer
                .write_packet(&Packet::StartData(StartData {
                    transaction_id,
                    total_data_length: data.len() as u64,
                }))
                .await?;
            writer
                .write_packet(&Packet::Data(DataChunk {
                    transaction_id,
                    payload: Bytes::copy_from_slice(&data[..split]),
                }))
                .await?;
            writer
                .write_packet(&Packet::EndData(DataChunk {
                    transaction_id,
                    payload: Bytes::copy_from_slice(&data[split..]),
                }))
                .await?;
        }
        writer
            .write_packet(&Packet::OperationResponse(OperationResponse {
                response_code: code,
                session_id: request.session_id,
                transaction_id,
                parameters: [0; 5],
            }))
            .await?;

        if request.operation_code == OperationCode::INITIATE_CAPTURE && code.is_ok() {
            let _ = shared.events_tx.send(
                Packet::Event(Event {
                    event_code: EventCode::CAPTURE_COMPLETE,
                    session_id: request.session_id,
                    transaction_id,
                    parameters: [0; 3],
                })
                .to_frame(),
            );
        }
    }
}

fn generic_reply(
    request: &OperationRequest,
    incoming: Option<Vec<u8>>,
    shared: &Shared,
) -> (ResponseCode, Option<Vec<u8>>) {
    let param = request.parameters[0];
    match request.operation_code {
        OperationCode::OPEN_SESSION if request.transaction_id != 0 => {
            (ResponseCode::INVALID_TRANSACTION_ID, None)
        }
        OperationCode::OPEN_SESSION if param == 0 => (ResponseCode::INVALID_PARAMETER, None),
        OperationCode::OPEN_SESSION | OperationCode::CLOSE_SESSION => (ResponseCode::OK, None),
        OperationCode::GET_DEVICE_INFO => (ResponseCode::OK, Some(device_info_dataset())),
        OperationCode::GET_DEVICE_PROP_DESC => {
            match (param as u16, shared.property(param)) {
                (code, Some(current)) if code == DevicePropCode::EXPOSURE_INDEX.0 => {
                    (ResponseCode::OK, Some(exposure_index_desc(&current)))
                }
                _ => (ResponseCode::DEVICE_PROP_NOT_SUPPORTED, None),
            }
        }
        OperationCode::GET_DEVICE_PROP_VALUE => match shared.property(param) {
            Some(value) => (ResponseCode::OK, Some(value)),
            None => (ResponseCode::DEVICE_PROP_NOT_SUPPORTED, None),
        },
        OperationCode::SET_DEVICE_PROP_VALUE => {
            let mut properties = shared.properties.lock();
            match (properties.get_mut(&(param as u16)), incoming) {
                (Some(slot), Some(value)) if value.len() == slot.len() => {
                    *slot = value;
                    (ResponseCode::OK, None)
                }
                (Some(_), _) => (ResponseCode::INVALID_DEVICE_PROP_VALUE, None),
                (None, _) => (ResponseCode::DEVICE_PROP_NOT_SUPPORTED, None),
            }
        }
        OperationCode::INITIATE_CAPTURE => (ResponseCode::OK, None),
        _ => (ResponseCode::OPERATION_NOT_SUPPORTED, None),
    }
}

async fn serve_fuji_operations<R, W>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    shared: &Shared,
) -> Result<(), ClientError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut session_open = false;

    loop {
        let frame = reader.read_frame().await?;
        let request = FujiOperationRequest::decode(&frame)?;
        shared.record(RecordedRequest {
            operation: request.operation_code,
            data_phase: u32::from(request.data_phase),
            transaction_id: request.transaction_id,
            parameters: request.parameters,
        });

        let tid = request.transaction_id;
        let op = request.operation_code;
        let param = request.parameters[0];

        let (data, code) = match op {
            OperationCode::SET_DEVICE_PROP_VALUE => {
                // The value follows in a second request under the same tid
                let value = FujiOperationRequest::decode(&reader.read_frame().await?)?;
                shared.record(RecordedRequest {
                    operation: value.operation_code,
                    data_phase: u32::from(value.data_phase),
                    transaction_id: value.transaction_id,
                    parameters: value.parameters,
                });
                let mut properties = shared.properties.lock();
                if value.transaction_id != tid || value.data_phase != phase::DATA {
                    (None, ResponseCode::INVALID_PARAMETER)
                } else if let Some(slot) = properties.get_mut(&(param as u16)) {
                    *slot = value.parameters[0].to_le_bytes().to_vec();
                    (None, ResponseCode::OK)
                } else {
                    (None, ResponseCode::DEVICE_PROP_NOT_SUPPORTED)
                }
            }
            OperationCode::OPEN_SESSION if session_open => (None, ResponseCode::SESSION_ALREADY_OPEN),
            OperationCode::OPEN_SESSION => {
                session_open = true;
                (None, ResponseCode::OK)
            }
            OperationCode::GET_DEVICE_PROP_VALUE
                if param == u32::from(DevicePropCode::FUJI_CURRENT_STATE.0) =>
            {
                let state = fuji_state_list(&shared.properties.lock());
                (Some(state), ResponseCode::OK)
            }
            OperationCode::GET_DEVICE_PROP_VALUE => match shared.property(param) {
                Some(value) => (Some(value), ResponseCode::OK),
                None => (None, ResponseCode::DEVICE_PROP_NOT_SUPPORTED),
            },
            OperationCode::GET_DEVICE_PROP_DESC => {
                if param == u32::from(DevicePropCode::FUJI_FILM_SIMULATION.0) {
                    (Some(film_simulation_desc()), ResponseCode::OK)
                } else {
                    (Some(Vec::new()), ResponseCode::OK)
                }
            }
            OperationCode::FUJI_GET_DEVICE_INFO => {
                let desc = film_simulation_desc();
                let mut list = 1u32.to_le_bytes().to_vec();
                list.extend_from_slice(&(desc.len() as u32 + 4).to_le_bytes());
                list.extend(desc);
                (Some(list), ResponseCode::OK)
            }
            OperationCode::INITIATE_OPEN_CAPTURE => (None, ResponseCode::OK),
            OperationCode::INITIATE_CAPTURE => {
                for (code, params) in [
                    (EventCode::FUJI_OBJECT_ADDED, [tid, 0, 0]),
                    (EventCode::FUJI_PREVIEW_AVAILABLE, [tid, MOCK_JPEG.len() as u32, 0]),
                ] {
                    let _ = shared.events_tx.send(FujiEvent::new(code, tid, params).to_frame());
                }
                (None, ResponseCode::OK)
            }
            OperationCode::FUJI_GET_CAPTURE_PREVIEW => {
                let _ = shared.events_tx.send(
                    FujiEvent::new(EventCode::CAPTURE_COMPLETE, tid, [tid, 0, 0]).to_frame(),
                );
                (Some(MOCK_JPEG.to_vec()), ResponseCode::OK)
            }
            _ => (None, ResponseCode::OPERATION_NOT_SUPPORTED),
        };

        if let Some(data) = data {
            writer
                .write_frame(&FujiOperationResponse::data(op, tid, data).to_frame())
                .await?;
        }
        writer
            .write_frame(&FujiOperationResponse::end(tid, code).to_frame())
            .await?;
    }
}

async fn serve_event(socket: TcpStream, shared: Arc<Shared>) {
    let (read_half, write_half) = socket.into_split();
    let mut reader = FrameReader::new(read_half, Framing::Tagged);
    let mut writer = FrameWriter::new(write_half);

    if shared.behavior == MockBehavior::Fuji {
        reader.set_framing(Framing::LengthOnly);
    } else {
        let reply = match (reader.read_packet().await, shared.behavior) {
            (Ok((Packet::InitEventRequest(_), _)), MockBehavior::RejectEvent) => {
                Packet::InitFail(InitFail {
                    reason: FailReason::Busy,
                })
            }
            (Ok((Packet::InitEventRequest(_), _)), MockBehavior::WrongEventAck) => {
                Packet::ProbeResponse
            }
            (Ok((Packet::InitEventRequest(request), _)), _) if request.connection_number == 1 => {
                Packet::InitEventAck
            }
            _ => Packet::InitFail(InitFail {
                reason: FailReason::Unspecified,
            }),
        };
        if writer.write_packet(&reply).await.is_err() {
            return;
        }
    }

    let Some(mut outgoing) = shared.events_rx.lock().take() else {
        return;
    };

    loop {
        tokio::select! {
            frame = outgoing.recv() => {
                let Some(frame) = frame else { return };
                if writer.write_frame(&frame).await.is_err() {
                    return;
                }
            }
            incoming = reader.read_frame() => {
                let Ok(frame) = incoming else { return };
                match Packet::decode(&frame) {
                    Ok(Packet::ProbeRequest) if shared.behavior != MockBehavior::SilentProbe => {
                        if writer.write_packet(&Packet::ProbeResponse).await.is_err() {
                            return;
                        }
                    }
                    Ok(Packet::ProbeResponse) => shared.probe_answered.notify_one(),
                    _ => {}
                }
            }
        }
    }
}

async fn serve_streamer(socket: TcpStream, behavior: MockBehavior) {
    let mut writer = FrameWriter::new(socket);
    for index in 0..MOCK_FRAME_COUNT {
        let mut body = Vec::new();
        if behavior == MockBehavior::Fuji {
            // Preamble: four zero bytes, a frame counter, then filler
            body.resize(fuji::STREAM_FRAME_OFFSET - ptpip_protocol::LENGTH_PREFIX_SIZE, 0);
            body[4] = index as u8;
        }
        body.extend_from_slice(MOCK_JPEG);
        body.push(index as u8);
        if writer.write_frame(&Frame::length_only(body)).await.is_err() {
            return;
        }
    }
    // Hold the socket open until the initiator leaves
    std::future::pending::<()>().await;
}
