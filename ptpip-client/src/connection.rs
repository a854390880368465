//! Connection management.
//!
//! A [`Connection`] owns up to three sockets to one responder and walks them
//! through the PTP/IP handshake:
//!
//! ```text
//! Idle -> CommandDataDialing -> CommandDataHandshaking
//!      -> EventDialing -> EventHandshaking
//!      -> [StreamerDialing] -> Ready
//! ```
//!
//! Any handshake failure closes the sockets opened so far and leaves the
//! connection in `Failed`. A streamer that cannot be reached only costs live
//! view.

use crate::error::{ClientError, OperationError};
use crate::sequencer::TransactionSequencer;
use crate::stream::{FrameReader, FrameWriter};
use crate::vendor::{EventSocketPacket, Vendor};
use bytes::Bytes;
use ptpip_protocol::fuji::FujiEvent;
use ptpip_protocol::packet::{Event, EVENT_PARAMETERS, OPERATION_PARAMETERS};
use ptpip_protocol::{EventCode, Frame, Framing, OperationCode, Packet, ResponseCode};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Default number of dial attempts per socket.
pub const DEFAULT_DIAL_ATTEMPTS: u32 = 3;

/// Default pause between dial attempts.
pub const DEFAULT_DIAL_DELAY: Duration = Duration::from_millis(250);

/// Friendly name announced when none is configured.
pub const DEFAULT_FRIENDLY_NAME: &str = "ptpip-rs initiator";

/// Live view frames buffered before the streamer reader waits.
pub const FRAME_CHANNEL_CAPACITY: usize = 50;

/// Default capacity for the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The local side of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Initiator {
    pub guid: Uuid,
    pub friendly_name: String,
}

impl Initiator {
    /// Creates an initiator with a random GUID.
    pub fn new(friendly_name: impl Into<String>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            friendly_name: friendly_name.into(),
        }
    }

    pub fn with_guid(mut self, guid: Uuid) -> Self {
        self.guid = guid;
        self
    }
}

impl Default for Initiator {
    fn default() -> Self {
        Self::new(DEFAULT_FRIENDLY_NAME)
    }
}

/// What the responder told us in its InitCommandAck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponderInfo {
    pub connection_number: u32,
    pub guid: Uuid,
    pub friendly_name: String,
    pub protocol_version: u32,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Command-data socket address.
    pub command_addr: SocketAddr,
    /// Event socket address.
    pub event_addr: SocketAddr,
    /// Streamer socket address, only dialed when `streaming` is set.
    pub streamer_addr: SocketAddr,
    pub vendor: Vendor,
    pub initiator: Initiator,
    /// Dial attempts per socket before giving up.
    pub dial_attempts: u32,
    /// Pause between dial attempts.
    pub dial_delay: Duration,
    /// Timeout for a single TCP connect.
    pub connect_timeout: Duration,
    /// Deadline for each packet read on the command-data path.
    pub read_timeout: Duration,
    /// Deadline for a ProbeResponse.
    pub probe_timeout: Duration,
    /// Dial the streamer socket for live view.
    pub streaming: bool,
}

impl ConnectionConfig {
    /// Targets all three sockets at `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            command_addr: addr,
            event_addr: addr,
            streamer_addr: addr,
            vendor: Vendor::Generic,
            initiator: Initiator::default(),
            dial_attempts: DEFAULT_DIAL_ATTEMPTS,
            dial_delay: DEFAULT_DIAL_DELAY,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            streaming: false,
        }
    }

    pub fn with_event_addr(mut self, addr: SocketAddr) -> Self {
        self.event_addr = addr;
        self
    }

    pub fn with_streamer_addr(mut self, addr: SocketAddr) -> Self {
        self.streamer_addr = addr;
        self
    }

    pub fn with_vendor(mut self, vendor: Vendor) -> Self {
        self.vendor = vendor;
        self
    }

    pub fn with_initiator(mut self, initiator: Initiator) -> Self {
        self.initiator = initiator;
        self
    }

    pub fn with_friendly_name(mut self, name: impl Into<String>) -> Self {
        self.initiator.friendly_name = name.into();
        self
    }

    /// At least one attempt is always made.
    pub fn with_dial_attempts(mut self, attempts: u32) -> Self {
        self.dial_attempts = attempts.max(1);
        self
    }

    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = delay;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    CommandDataDialing,
    CommandDataHandshaking,
    EventDialing,
    EventHandshaking,
    StreamerDialing,
    Ready,
    /// Terminal. Build a new connection to try again.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::CommandDataDialing => "dialing command-data socket",
            ConnectionState::CommandDataHandshaking => "command-data handshake",
            ConnectionState::EventDialing => "dialing event socket",
            ConnectionState::EventHandshaking => "event handshake",
            ConnectionState::StreamerDialing => "dialing streamer socket",
            ConnectionState::Ready => "ready",
            ConnectionState::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// An event as delivered to subscribers, whatever the vendor's wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResponderEvent {
    pub code: EventCode,
    pub session_id: u32,
    pub transaction_id: u32,
    pub parameters: [u32; EVENT_PARAMETERS],
}

impl From<Event> for ResponderEvent {
    fn from(event: Event) -> Self {
        Self {
            code: event.event_code,
            session_id: event.session_id,
            transaction_id: event.transaction_id,
            parameters: event.parameters,
        }
    }
}

impl From<FujiEvent> for ResponderEvent {
    fn from(event: FujiEvent) -> Self {
        Self {
            code: event.event_code,
            session_id: 0,
            transaction_id: event.transaction_id,
            parameters: event.parameters,
        }
    }
}

/// One operation to run on the command-data socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    pub operation: OperationCode,
    /// Unused slots are zero.
    pub parameters: [u32; OPERATION_PARAMETERS],
    /// Payload for a data-out phase.
    pub data: Option<Bytes>,
    /// Send with the reserved TransactionID 0 instead of the next counter value.
    pub reserved_transaction: bool,
}

impl Request {
    pub fn new(operation: OperationCode) -> Self {
        Self {
            operation,
            ..Default::default()
        }
    }

    /// Sets the first parameter.
    pub fn with_param(mut self, parameter: u32) -> Self {
        self.parameters[0] = parameter;
        self
    }

    pub fn with_params(mut self, parameters: &[u32]) -> Result<Self, ClientError> {
        if parameters.len() > OPERATION_PARAMETERS {
            return Err(ClientError::InvalidArgument(format!(
                "at most {} parameters, got {}",
                OPERATION_PARAMETERS,
                parameters.len()
            )));
        }
        self.parameters = [0; OPERATION_PARAMETERS];
        self.parameters[..parameters.len()].copy_from_slice(parameters);
        Ok(self)
    }

    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_reserved_transaction(mut self) -> Self {
        self.reserved_transaction = true;
        self
    }
}

/// The outcome of one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub operation: OperationCode,
    pub transaction_id: u32,
    pub code: ResponseCode,
    pub parameters: [u32; OPERATION_PARAMETERS],
    /// Data-in payload, empty when the operation had none.
    pub data: Bytes,
    /// Every packet read for this transaction, length prefix included.
    pub raw: Vec<Bytes>,
}

impl Response {
    pub fn is_ok(&self) -> bool {
        self.code.is_ok()
    }

    /// Turns a non-OK response code into an error.
    pub fn check(self) -> Result<Self, ClientError> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(OperationError::Response {
                operation: self.operation,
                code: self.code,
            }
            .into())
        }
    }
}

/// The command-data socket and the sequencer that numbers its traffic.
pub(crate) struct CommandChannel {
    pub(crate) reader: FrameReader<OwnedReadHalf>,
    pub(crate) writer: FrameWriter<OwnedWriteHalf>,
    pub(crate) sequencer: TransactionSequencer,
    read_timeout: Duration,
}

impl CommandChannel {
    pub(crate) fn new(
        stream: TcpStream,
        shutdown: watch::Receiver<bool>,
        read_timeout: Duration,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: FrameReader::new(read_half, Framing::Tagged).with_shutdown(shutdown),
            writer: FrameWriter::new(write_half),
            sequencer: TransactionSequencer::new(),
            read_timeout,
        }
    }

    /// Reads one frame under the read deadline.
    pub(crate) async fn read_frame(&mut self, what: &'static str) -> Result<Frame, ClientError> {
        tokio::time::timeout(self.read_timeout, self.reader.read_frame())
            .await
            .map_err(|_| {
                tracing::debug!("Timed out waiting for {}", what);
                ClientError::Timeout(what)
            })?
    }

    /// Runs one transaction and keeps the session id in step with
    /// OpenSession and CloseSession.
    ///
    /// A transaction that fails after its request went out is abandoned:
    /// whatever the responder still sends for it is discarded by the next
    /// exchange instead of being taken as that exchange's reply.
    pub(crate) async fn execute(
        &mut self,
        vendor: Vendor,
        request: &Request,
    ) -> Result<Response, ClientError> {
        let response = match vendor.exchange(self, request).await {
            Ok(response) => {
                self.sequencer.settle();
                response
            }
            Err(err) => {
                if let Some(id) = self.sequencer.last_issued() {
                    tracing::debug!("Abandoning transaction {}: {}", id, err);
                    self.sequencer.abandon(id);
                }
                // The rest of a foreign data phase carries the same id
                if let ClientError::Operation(OperationError::TransactionMismatch {
                    received, ..
                }) = &err
                {
                    self.sequencer.abandon(*received);
                }
                return Err(err);
            }
        };
        if response.is_ok() {
            match request.operation {
                OperationCode::OPEN_SESSION => self.sequencer.open_session(request.parameters[0]),
                OperationCode::CLOSE_SESSION => self.sequencer.close_session(),
                _ => {}
            }
        }
        Ok(response)
    }
}

/// Opens a TCP socket, retrying a bounded number of times.
pub(crate) async fn dial(
    addr: SocketAddr,
    config: &ConnectionConfig,
) -> Result<TcpStream, ClientError> {
    let attempts = config.dial_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        tracing::debug!("Dialing {} (attempt {}/{})", addr, attempt, attempts);
        match tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Ok(Err(e)) => {
                tracing::debug!("Dial {} failed: {}", addr, e);
                last_error = Some(e);
            }
            Err(_) => {
                tracing::debug!("Dial {} timed out", addr);
                last_error = Some(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ));
            }
        }
        if attempt < attempts {
            tokio::time::sleep(config.dial_delay).await;
        }
    }

    Err(ClientError::DialFailure {
        addr,
        attempts,
        source: last_error
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "no dial attempted")),
    })
}

/// A connection to one PTP/IP responder.
pub struct Connection {
    config: ConnectionConfig,
    state: parking_lot::Mutex<ConnectionState>,
    responder: parking_lot::RwLock<Option<ResponderInfo>>,
    /// Command-data path. One transaction at a time.
    command: Mutex<Option<CommandChannel>>,
    /// Event socket write half, shared with the event reader for probe replies.
    event_writer: Arc<Mutex<Option<FrameWriter<OwnedWriteHalf>>>>,
    /// Keeps the streamer socket open while its reader runs.
    streamer_writer: parking_lot::Mutex<Option<OwnedWriteHalf>>,
    events: broadcast::Sender<ResponderEvent>,
    frames: parking_lot::Mutex<Option<mpsc::Receiver<Bytes>>>,
    probe_waiter: Arc<parking_lot::Mutex<Option<oneshot::Sender<()>>>>,
    /// Flipped to unblock every pending socket read.
    shutdown: watch::Sender<bool>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            state: parking_lot::Mutex::new(ConnectionState::Idle),
            responder: parking_lot::RwLock::new(None),
            command: Mutex::new(None),
            event_writer: Arc::new(Mutex::new(None)),
            streamer_writer: parking_lot::Mutex::new(None),
            events,
            frames: parking_lot::Mutex::new(None),
            probe_waiter: Arc::new(parking_lot::Mutex::new(None)),
            shutdown,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn vendor(&self) -> Vendor {
        self.config.vendor
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        tracing::debug!("Connection state -> {}", state);
        *self.state.lock() = state;
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Responder details, available once the command-data handshake is done.
    pub fn responder(&self) -> Option<ResponderInfo> {
        self.responder.read().clone()
    }

    /// Subscribes to events from the event socket.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ResponderEvent> {
        self.events.subscribe()
    }

    /// Takes the live view frame queue. Only one consumer can hold it.
    pub fn take_frames(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.frames.lock().take()
    }

    /// Runs the full handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Idle {
                return Err(ClientError::InvalidState(*state));
            }
            *state = ConnectionState::CommandDataDialing;
        }

        match self.establish().await {
            Ok(()) => {
                self.set_state(ConnectionState::Ready);
                tracing::info!(
                    "Connected to {} ({} vendor)",
                    self.config.command_addr,
                    self.config.vendor.name()
                );
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Handshake failed: {}", e);
                self.teardown().await;
                self.set_state(ConnectionState::Failed);
                Err(e)
            }
        }
    }

    async fn establish(&self) -> Result<(), ClientError> {
        let vendor = self.config.vendor;

        let stream = dial(self.config.command_addr, &self.config).await?;
        self.set_state(ConnectionState::CommandDataHandshaking);
        let mut channel =
            CommandChannel::new(stream, self.shutdown.subscribe(), self.config.read_timeout);
        let responder = vendor
            .init_command_data(&mut channel, &self.config.initiator)
            .await?;
        tracing::info!(
            "Command-data handshake complete: {} (connection {})",
            responder.friendly_name,
            responder.connection_number
        );
        *self.responder.write() = Some(responder.clone());

        self.set_state(ConnectionState::EventDialing);
        let stream = dial(self.config.event_addr, &self.config).await?;
        self.set_state(ConnectionState::EventHandshaking);
        let (reader, writer) = vendor
            .init_event(
                stream,
                &responder,
                &mut channel,
                self.shutdown.subscribe(),
                self.config.read_timeout,
            )
            .await?;
        tracing::info!("Event handshake complete");

        *self.command.lock().await = Some(channel);
        *self.event_writer.lock().await = Some(writer);
        self.spawn_event_reader(reader);

        if self.config.streaming {
            self.set_state(ConnectionState::StreamerDialing);
            match dial(self.config.streamer_addr, &self.config).await {
                Ok(stream) => self.spawn_streamer(vendor.init_streamer(stream, self.shutdown.subscribe())),
                Err(e) => tracing::warn!("Streamer unavailable, continuing without live view: {}", e),
            }
        }

        Ok(())
    }

    fn spawn_event_reader(&self, mut reader: FrameReader<OwnedReadHalf>) {
        let vendor = self.config.vendor;
        let events = self.events.clone();
        let writer = Arc::clone(&self.event_writer);
        let probe_waiter = Arc::clone(&self.probe_waiter);

        let handle = tokio::spawn(async move {
            loop {
                let frame = match reader.read_frame().await {
                    Ok(frame) => frame,
                    Err(ClientError::ConnectionClosed) => {
                        tracing::debug!("event reader: connection closed");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("event reader exiting: {}", e);
                        break;
                    }
                };

                match vendor.decode_event_frame(&frame) {
                    Ok(EventSocketPacket::Event(event)) => {
                        tracing::debug!("event reader: {} (tid {})", event.code, event.transaction_id);
                        // No subscribers is fine
                        let _ = events.send(event);
                    }
                    Ok(EventSocketPacket::ProbeRequest) => {
                        if let Some(writer) = writer.lock().await.as_mut() {
                            if let Err(e) = writer.write_packet(&Packet::ProbeResponse).await {
                                tracing::warn!("event reader: failed to answer probe: {}", e);
                            }
                        }
                    }
                    Ok(EventSocketPacket::ProbeResponse) => {
                        if let Some(tx) = probe_waiter.lock().take() {
                            let _ = tx.send(());
                        }
                    }
                    Ok(EventSocketPacket::Other(kind)) => {
                        tracing::warn!("event reader: unexpected {} on event socket", kind);
                    }
                    Err(e) => {
                        tracing::warn!("event reader: dropping undecodable packet: {}", e);
                    }
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    fn spawn_streamer(&self, (mut reader, write_half): (FrameReader<OwnedReadHalf>, OwnedWriteHalf)) {
        let skip = self.config.vendor.stream_frame_offset() - ptpip_protocol::LENGTH_PREFIX_SIZE;
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        *self.frames.lock() = Some(rx);
        *self.streamer_writer.lock() = Some(write_half);

        let handle = tokio::spawn(async move {
            loop {
                let frame = match reader.read_frame().await {
                    Ok(frame) => frame,
                    Err(ClientError::ConnectionClosed) => break,
                    Err(e) => {
                        tracing::warn!("streamer reader exiting: {}", e);
                        break;
                    }
                };
                if frame.body.len() < skip {
                    tracing::warn!("streamer: short frame of {} bytes", frame.body.len());
                    continue;
                }
                if tx.send(frame.body.slice(skip..)).await.is_err() {
                    tracing::debug!("streamer: frame consumer went away");
                    break;
                }
            }
        });
        self.tasks.lock().push(handle);
        tracing::info!("Streamer connected");
    }

    fn ensure_ready(&self) -> Result<(), ClientError> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Idle => Err(ClientError::NotConnected),
            state => Err(ClientError::InvalidState(state)),
        }
    }

    /// Runs one operation and waits for its complete reply.
    ///
    /// A non-OK response code is not an error here; see [`Response::check`].
    pub async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        self.ensure_ready()?;
        let mut guard = self.command.lock().await;
        let channel = guard.as_mut().ok_or(ClientError::NotConnected)?;
        tracing::debug!("Executing {}", request.operation);
        channel.execute(self.config.vendor, &request).await
    }

    /// The TransactionID the next operation will carry.
    pub async fn next_transaction_id(&self) -> Option<u32> {
        self.command
            .lock()
            .await
            .as_ref()
            .map(|channel| channel.sequencer.peek())
    }

    /// The session currently open, 0 when none is.
    pub async fn session_id(&self) -> u32 {
        self.command
            .lock()
            .await
            .as_ref()
            .map(|channel| channel.sequencer.session_id())
            .unwrap_or(0)
    }

    /// Sends a ProbeRequest and waits for the ProbeResponse.
    ///
    /// Returns the round trip time. A responder that stays silent past the
    /// probe timeout is treated as gone and the connection is closed.
    pub async fn probe(&self) -> Result<Duration, ClientError> {
        self.ensure_ready()?;
        let vendor = self.config.vendor;
        if !vendor.supports_probe() {
            return Err(ClientError::Unsupported {
                vendor: vendor.name(),
                operation: "probe",
            });
        }

        let (tx, rx) = oneshot::channel();
        *self.probe_waiter.lock() = Some(tx);
        let started = Instant::now();
        {
            let mut guard = self.event_writer.lock().await;
            let writer = guard.as_mut().ok_or(ClientError::NotConnected)?;
            writer.write_packet(&Packet::ProbeRequest).await?;
        }

        match tokio::time::timeout(self.config.probe_timeout, rx).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                tracing::warn!(
                    "No probe response within {:?}, closing connection",
                    self.config.probe_timeout
                );
                self.probe_waiter.lock().take();
                self.close().await?;
                Err(ClientError::Timeout("probe response"))
            }
        }
    }

    /// Closes all sockets.
    pub async fn close(&self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection...");
        self.teardown().await;
        let mut state = self.state.lock();
        if *state != ConnectionState::Failed {
            *state = ConnectionState::Idle;
        }
        tracing::debug!("Connection closed");
        Ok(())
    }

    async fn teardown(&self) {
        // Unblocks readers first so the command lock can be taken
        self.shutdown.send_replace(true);

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for handle in tasks {
            handle.abort();
        }

        if let Some(mut channel) = self.command.lock().await.take() {
            let _ = channel.writer.shutdown().await;
        }
        if let Some(mut writer) = self.event_writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.streamer_writer.lock().take();
        self.frames.lock().take();
        self.probe_waiter.lock().take();

        self.shutdown.send_replace(false);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBehavior, MockResponder, SLOW_REPLY_DELAY};
    use ptpip_protocol::{DevicePropCode, FailReason};

    fn fast_config(addr: SocketAddr) -> ConnectionConfig {
        ConnectionConfig::new(addr)
            .with_dial_delay(Duration::from_millis(10))
            .with_read_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1:15740".parse().unwrap());
        assert_eq!(config.dial_attempts, DEFAULT_DIAL_ATTEMPTS);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
        assert_eq!(config.vendor, Vendor::Generic);
        assert_eq!(config.initiator.friendly_name, DEFAULT_FRIENDLY_NAME);
        assert_eq!(config.event_addr, config.command_addr);
        assert!(!config.streaming);
    }

    #[test]
    fn test_config_dial_attempts_floor() {
        let config = ConnectionConfig::new("127.0.0.1:15740".parse().unwrap()).with_dial_attempts(0);
        assert_eq!(config.dial_attempts, 1);
    }

    #[test]
    fn test_request_params() {
        let request = Request::new(OperationCode::GET_DEVICE_PROP_DESC)
            .with_params(&[0xD02A, 7])
            .unwrap();
        assert_eq!(request.parameters, [0xD02A, 7, 0, 0, 0]);
        assert!(Request::new(OperationCode::OPEN_SESSION)
            .with_params(&[1, 2, 3, 4, 5, 6])
            .is_err());
    }

    #[tokio::test]
    async fn test_handshake_success() {
        let mock = MockResponder::start(MockBehavior::Generic).await;
        let conn = Connection::new(fast_config(mock.addr()));
        conn.connect().await.unwrap();

        assert_eq!(conn.state(), ConnectionState::Ready);
        let responder = conn.responder().unwrap();
        assert_ne!(responder.connection_number, 0);
        assert_eq!(responder.friendly_name, "mock responder");
        assert_eq!(conn.next_transaction_id().await, Some(1));

        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_handshake_rejected() {
        let mock = MockResponder::start(MockBehavior::RejectInitiator).await;
        let conn = Connection::new(fast_config(mock.addr()));
        let result = conn.connect().await;

        assert!(matches!(
            result,
            Err(ClientError::RejectedByResponder(FailReason::RejectedInitiator))
        ));
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(mock.command_socket_closed().await);

        // Failed is terminal
        assert!(matches!(
            conn.connect().await,
            Err(ClientError::InvalidState(ConnectionState::Failed))
        ));
    }

    #[tokio::test]
    async fn test_handshake_degenerate_rejection() {
        let mock = MockResponder::start(MockBehavior::DegenerateReject).await;
        let conn = Connection::new(fast_config(mock.addr()));
        assert!(matches!(
            conn.connect().await,
            Err(ClientError::RejectedByResponder(FailReason::Unspecified))
        ));
    }

    #[tokio::test]
    async fn test_handshake_unexpected_reply() {
        let mock = MockResponder::start(MockBehavior::WrongAck).await;
        let conn = Connection::new(fast_config(mock.addr()));

        match conn.connect().await {
            Err(ClientError::ProtocolViolation { expected, received }) => {
                assert_eq!(expected, "InitCommandAck");
                assert_eq!(received, "InitEventAck");
            }
            other => panic!("expected ProtocolViolation, got {:?}", other),
        }
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(mock.command_socket_closed().await);
    }

    #[tokio::test]
    async fn test_event_handshake_rejected() {
        let mock = MockResponder::start(MockBehavior::RejectEvent).await;
        let conn = Connection::new(fast_config(mock.addr()));

        assert!(matches!(
            conn.connect().await,
            Err(ClientError::RejectedByResponder(FailReason::Busy))
        ));
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(mock.command_socket_closed().await);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_event_handshake_unexpected_reply() {
        let mock = MockResponder::start(MockBehavior::WrongEventAck).await;
        let conn = Connection::new(fast_config(mock.addr()));

        match conn.connect().await {
            Err(ClientError::ProtocolViolation { expected, received }) => {
                assert_eq!(expected, "InitEventAck");
                assert_eq!(received, "ProbeResponse");
            }
            other => panic!("expected ProtocolViolation, got {:?}", other),
        }
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(mock.command_socket_closed().await);
    }

    #[tokio::test]
    async fn test_dial_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let conn = Connection::new(fast_config(addr).with_dial_attempts(2));
        match conn.connect().await {
            Err(ClientError::DialFailure { addr: failed, attempts, .. }) => {
                assert_eq!(failed, addr);
                assert_eq!(attempts, 2);
            }
            other => panic!("expected DialFailure, got {:?}", other.map(|_| ())),
        }
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_streamer_failure_is_not_fatal() {
        let mock = MockResponder::start(MockBehavior::Generic).await;
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let conn = Connection::new(
            fast_config(mock.addr())
                .with_streaming(true)
                .with_streamer_addr(dead)
                .with_dial_attempts(1),
        );
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert!(conn.take_frames().is_none());
    }

    #[tokio::test]
    async fn test_execute_requires_ready() {
        let conn = Connection::new(ConnectionConfig::new("127.0.0.1:9".parse().unwrap()));
        let result = conn.execute(Request::new(OperationCode::GET_DEVICE_INFO)).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_transaction_mismatch() {
        let mock = MockResponder::start(MockBehavior::WrongTransactionId).await;
        let conn = Connection::new(fast_config(mock.addr()));
        conn.connect().await.unwrap();

        let result = conn.execute(Request::new(OperationCode::GET_DEVICE_INFO)).await;
        assert!(matches!(
            result,
            Err(ClientError::Operation(OperationError::TransactionMismatch {
                expected: 1,
                received: 8
            }))
        ));
        // The session survives
        assert!(conn.is_connected());

        // The rest of the foreign data phase is skipped, so the next
        // operation sees its own (still wrong) reply
        let result = conn.execute(Request::new(OperationCode::GET_DEVICE_INFO)).await;
        assert!(matches!(
            result,
            Err(ClientError::Operation(OperationError::TransactionMismatch {
                expected: 2,
                received: 9
            }))
        ));
    }

    #[tokio::test]
    async fn test_late_reply_after_timeout_is_discarded() {
        let mock = MockResponder::start(MockBehavior::SlowFirstReply).await;
        let conn = Connection::new(
            fast_config(mock.addr()).with_read_timeout(Duration::from_millis(100)),
        );
        conn.connect().await.unwrap();
        let battery = || {
            Request::new(OperationCode::GET_DEVICE_PROP_VALUE)
                .with_param(u32::from(DevicePropCode::BATTERY_LEVEL.0))
        };

        let result = conn.execute(battery()).await;
        assert!(matches!(result, Err(ClientError::Timeout("operation response"))));
        assert!(conn.is_connected());

        // Let the held-back reply to transaction 1 land in the socket
        tokio::time::sleep(SLOW_REPLY_DELAY).await;

        for expected in [2, 3] {
            let response = conn.execute(battery()).await.unwrap();
            assert!(response.is_ok());
            assert_eq!(response.transaction_id, expected);
            assert_eq!(response.data.as_ref(), &[80]);
        }
        let ids: Vec<u32> = mock.requests().iter().map(|r| r.transaction_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_probe_roundtrip() {
        let mock = MockResponder::start(MockBehavior::Generic).await;
        let conn = Connection::new(fast_config(mock.addr()));
        conn.connect().await.unwrap();
        conn.probe().await.unwrap();
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_probe_timeout_closes() {
        let mock = MockResponder::start(MockBehavior::SilentProbe).await;
        let conn = Connection::new(
            fast_config(mock.addr()).with_probe_timeout(Duration::from_millis(100)),
        );
        conn.connect().await.unwrap();

        let result = conn.probe().await;
        assert!(matches!(result, Err(ClientError::Timeout("probe response"))));
        assert_eq!(conn.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_responder_probe_answered() {
        let mock = MockResponder::start(MockBehavior::Generic).await;
        let conn = Connection::new(fast_config(mock.addr()));
        conn.connect().await.unwrap();
        assert!(mock.probe_initiator().await);
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_operation() {
        let mock = MockResponder::start(MockBehavior::Unresponsive).await;
        let conn = Arc::new(Connection::new(fast_config(mock.addr())));
        conn.connect().await.unwrap();

        let pending = {
            let conn = Arc::clone(&conn);
            tokio::spawn(async move { conn.execute(Request::new(OperationCode::GET_DEVICE_INFO)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        conn.close().await.unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }
}
