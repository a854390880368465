//! Client error types.

use crate::connection::ConnectionState;
use ptpip_protocol::{FailReason, OperationCode, ProtocolError, ResponseCode};
use std::net::SocketAddr;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to {addr} after {attempts} attempts: {source}")]
    DialFailure {
        addr: SocketAddr,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol violation: expected {expected}, received {received}")]
    ProtocolViolation {
        expected: &'static str,
        received: String,
    },

    #[error("rejected by responder: {0}")]
    RejectedByResponder(FailReason),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("partial write: {written} of {expected} bytes")]
    PartialWrite { written: usize, expected: usize },

    #[error("operation failed: {0}")]
    Operation(#[from] OperationError),

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("invalid connection state: {0}")]
    InvalidState(ConnectionState),

    #[error("{operation} is not supported by the {vendor} vendor extension")]
    Unsupported {
        vendor: &'static str,
        operation: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Errors scoped to a single transaction. The session survives them.
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("transaction id mismatch: expected {expected}, received {received}")]
    TransactionMismatch { expected: u32, received: u32 },

    #[error("{operation} returned {code}")]
    Response {
        operation: OperationCode,
        code: ResponseCode,
    },

    #[error("transaction {transaction_id} cancelled by responder")]
    Cancelled { transaction_id: u32 },
}

impl ClientError {
    /// Returns whether this error is retryable.
    ///
    /// A timed-out operation leaves the session usable: the command channel
    /// abandons the transaction and discards its late reply, so a retry
    /// reads only its own response.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Timeout(_) => true,
            ClientError::ConnectionClosed => true,
            ClientError::DialFailure { .. } => true,
            ClientError::RejectedByResponder(reason) => reason.is_transient(),
            ClientError::Operation(OperationError::Response { code, .. }) => {
                *code == ResponseCode::DEVICE_BUSY
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Timeout("operation response").is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(ClientError::RejectedByResponder(FailReason::Busy).is_retryable());
        assert!(!ClientError::RejectedByResponder(FailReason::RejectedInitiator).is_retryable());
        assert!(!ClientError::NotConnected.is_retryable());

        let busy = ClientError::Operation(OperationError::Response {
            operation: OperationCode::INITIATE_CAPTURE,
            code: ResponseCode::DEVICE_BUSY,
        });
        assert!(busy.is_retryable());

        let mismatch = ClientError::Operation(OperationError::TransactionMismatch {
            expected: 2,
            received: 9,
        });
        assert!(!mismatch.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::ProtocolViolation {
            expected: "InitCommandAck",
            received: "Event".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "protocol violation: expected InitCommandAck, received Event"
        );

        let err = ClientError::Operation(OperationError::TransactionMismatch {
            expected: 4,
            received: 9,
        });
        assert!(err.to_string().contains("expected 4, received 9"));
    }
}
