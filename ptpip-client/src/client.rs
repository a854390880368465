//! High-level client API.

use crate::connection::{
    Connection, ConnectionConfig, ConnectionState, Request, ResponderEvent, ResponderInfo, Response,
};
use crate::error::ClientError;
use crate::vendor::{set_value_request, Vendor};
use bytes::Bytes;
use ptpip_protocol::dataset::widen_u32;
use ptpip_protocol::fuji::{self, PropertyState};
use ptpip_protocol::{DeviceInfo, DevicePropCode, DevicePropDesc, EventCode, OperationCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Session opened by [`Client::open_session`].
pub const DEFAULT_SESSION_ID: u32 = 1;

/// What GetDeviceInfo returns, depending on the vendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "info", rename_all = "lowercase")]
pub enum DeviceDescription {
    /// The standard DeviceInfo dataset.
    Standard(DeviceInfo),
    /// Fuji's list of property descriptors.
    Fuji(Vec<DevicePropDesc>),
}

/// High-level client for one PTP/IP responder.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Dials the responder and runs the handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    /// Closes every socket.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    pub fn vendor(&self) -> Vendor {
        self.conn.vendor()
    }

    /// What the responder said about itself in its InitCommandAck.
    pub fn responder(&self) -> Option<ResponderInfo> {
        self.conn.responder()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ResponderEvent> {
        self.conn.subscribe_events()
    }

    /// Live view frames. Only the first caller gets the receiver.
    pub fn take_frames(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.conn.take_frames()
    }

    /// Round trip of a liveness probe.
    pub async fn probe(&self) -> Result<Duration, ClientError> {
        self.conn.probe().await
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        self.conn.execute(request).await?.check()
    }

    fn unsupported(&self, operation: &'static str) -> ClientError {
        ClientError::Unsupported {
            vendor: self.vendor().name(),
            operation,
        }
    }

    async fn next_event(
        &self,
        events: &mut broadcast::Receiver<ResponderEvent>,
    ) -> Result<ResponderEvent, ClientError> {
        let timeout = self.conn.config().read_timeout;
        loop {
            match tokio::time::timeout(timeout, events.recv()).await {
                Ok(Ok(event)) => {
                    tracing::debug!("Received event {}", event.code);
                    return Ok(event);
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!("Event subscriber lagged, {} events dropped", skipped);
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(ClientError::ConnectionClosed)
                }
                Err(_) => return Err(ClientError::Timeout("event")),
            }
        }
    }

    async fn expect_event(
        &self,
        events: &mut broadcast::Receiver<ResponderEvent>,
        code: EventCode,
        expected: &'static str,
    ) -> Result<ResponderEvent, ClientError> {
        let event = self.next_event(events).await?;
        if event.code != code {
            return Err(ClientError::ProtocolViolation {
                expected,
                received: event.code.to_string(),
            });
        }
        Ok(event)
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    /// Opens session [`DEFAULT_SESSION_ID`] and returns the active session id.
    ///
    /// Generic responders get the reserved TransactionID 0. A Fuji session
    /// is already open after connect; reopening it is harmless.
    pub async fn open_session(&self) -> Result<u32, ClientError> {
        let mut request = Request::new(OperationCode::OPEN_SESSION).with_param(DEFAULT_SESSION_ID);
        if self.vendor() == Vendor::Generic {
            request = request.with_reserved_transaction();
        }
        self.execute(request).await?;
        Ok(self.conn.session_id().await)
    }

    pub async fn close_session(&self) -> Result<(), ClientError> {
        self.execute(Request::new(OperationCode::CLOSE_SESSION)).await?;
        Ok(())
    }

    // =========================================================================
    // Device properties
    // =========================================================================

    pub async fn get_device_info(&self) -> Result<DeviceDescription, ClientError> {
        match self.vendor() {
            Vendor::Generic => {
                let response = self.execute(Request::new(OperationCode::GET_DEVICE_INFO)).await?;
                Ok(DeviceDescription::Standard(DeviceInfo::parse(&response.data)?))
            }
            Vendor::Fuji => {
                let response = self
                    .execute(Request::new(OperationCode::FUJI_GET_DEVICE_INFO))
                    .await?;
                Ok(DeviceDescription::Fuji(fuji::parse_device_info(&response.data)?))
            }
        }
    }

    /// Reads a property value, zero-extended to 32 bits.
    pub async fn get_property(&self, code: DevicePropCode) -> Result<u32, ClientError> {
        let response = self
            .execute(Request::new(OperationCode::GET_DEVICE_PROP_VALUE).with_param(u32::from(code.0)))
            .await?;
        Ok(widen_u32(&response.data))
    }

    /// Reads a property descriptor. `None` when the responder answers
    /// without a dataset.
    pub async fn describe_property(
        &self,
        code: DevicePropCode,
    ) -> Result<Option<DevicePropDesc>, ClientError> {
        let response = self
            .execute(Request::new(OperationCode::GET_DEVICE_PROP_DESC).with_param(u32::from(code.0)))
            .await?;
        if response.data.is_empty() {
            return Ok(None);
        }
        Ok(Some(DevicePropDesc::parse(&response.data)?))
    }

    /// Writes a property value.
    ///
    /// Generic responders expect the value at the property's own width, so
    /// the descriptor is fetched first. Fuji always takes 32 bits.
    pub async fn set_property(&self, code: DevicePropCode, value: u32) -> Result<(), ClientError> {
        let request = match self.vendor() {
            Vendor::Fuji => set_value_request(code, value),
            Vendor::Generic => {
                let desc = self.describe_property(code).await?.ok_or_else(|| {
                    ClientError::InvalidArgument(format!("property {} has no descriptor", code))
                })?;
                if !desc.is_writable() {
                    return Err(ClientError::InvalidArgument(format!(
                        "property {} is read-only",
                        code
                    )));
                }
                let width = desc.data_type.value_size().ok_or_else(|| {
                    ClientError::InvalidArgument(format!("property {} holds a string", code))
                })?;
                if width < 4 && u64::from(value) >> (width * 8) != 0 {
                    return Err(ClientError::InvalidArgument(format!(
                        "value {:#x} does not fit property {} ({} bytes)",
                        value, code, width
                    )));
                }
                let raw = u128::from(value).to_le_bytes();
                Request::new(OperationCode::SET_DEVICE_PROP_VALUE)
                    .with_param(u32::from(code.0))
                    .with_data(Bytes::copy_from_slice(&raw[..width]))
            }
        };
        self.execute(request).await?;
        Ok(())
    }

    /// Every property the responder reports in its current-state list.
    pub async fn device_state(&self) -> Result<Vec<PropertyState>, ClientError> {
        if self.vendor() != Vendor::Fuji {
            return Err(self.unsupported("device state"));
        }
        let response = self
            .execute(
                Request::new(OperationCode::GET_DEVICE_PROP_VALUE)
                    .with_param(u32::from(DevicePropCode::FUJI_CURRENT_STATE.0)),
            )
            .await?;
        Ok(fuji::parse_device_state(&response.data)?)
    }

    // =========================================================================
    // Capture
    // =========================================================================

    /// Releases the shutter and waits for the capture to complete.
    ///
    /// Fuji responders hand back a preview of the image; the preview must be
    /// fetched before the camera reports completion.
    pub async fn initiate_capture(&self) -> Result<Option<Bytes>, ClientError> {
        let mut events = self.subscribe_events();
        tracing::info!("Releasing shutter...");
        self.execute(Request::new(OperationCode::INITIATE_CAPTURE)).await?;

        match self.vendor() {
            Vendor::Generic => {
                self.expect_event(&mut events, EventCode::CAPTURE_COMPLETE, "CaptureComplete event")
                    .await?;
                Ok(None)
            }
            Vendor::Fuji => {
                self.expect_event(&mut events, EventCode::FUJI_OBJECT_ADDED, "ObjectAdded event")
                    .await?;
                let available = self
                    .expect_event(
                        &mut events,
                        EventCode::FUJI_PREVIEW_AVAILABLE,
                        "PreviewAvailable event",
                    )
                    .await?;
                let expected = available.parameters[1] as usize;
                tracing::debug!("Preview size is {} bytes", expected);

                let response = self
                    .execute(Request::new(OperationCode::FUJI_GET_CAPTURE_PREVIEW))
                    .await?;
                self.expect_event(&mut events, EventCode::CAPTURE_COMPLETE, "CaptureComplete event")
                    .await?;

                if response.data.len() != expected {
                    tracing::warn!(
                        "Preview size mismatch: expected {}, got {}",
                        expected,
                        response.data.len()
                    );
                }
                Ok(Some(response.data))
            }
        }
    }

    // =========================================================================
    // Raw operations
    // =========================================================================

    /// Runs an arbitrary operation. The response code is not checked and
    /// every packet read is kept in [`Response::raw`].
    pub async fn operation_request_raw(
        &self,
        operation: OperationCode,
        parameters: &[u32],
    ) -> Result<Response, ClientError> {
        let request = Request::new(operation).with_params(parameters)?;
        self.conn.execute(request).await
    }
}
