//! # ptpip-client
//!
//! PTP/IP initiator.
//!
//! This crate provides:
//! - The three-socket connection handshake (command-data, event, streamer)
//! - Transaction numbering and session bookkeeping
//! - Vendor extension dispatch (generic and Fuji)
//! - A high-level [`Client`] for device info, properties and capture
//! - YAML and environment configuration
//! - A small text command language for shells and daemons

pub mod client;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod sequencer;
pub mod stream;
pub mod vendor;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{Client, DeviceDescription};
pub use command::{Command, CommandError, CommandOutput};
pub use config::{Config, ConfigError};
pub use connection::{
    Connection, ConnectionConfig, ConnectionState, Initiator, Request, ResponderEvent,
    ResponderInfo, Response,
};
pub use error::{ClientError, OperationError};
pub use sequencer::TransactionSequencer;
pub use vendor::Vendor;
