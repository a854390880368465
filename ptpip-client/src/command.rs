//! Text commands shared by the CLI, its REPL and the daemon.
//!
//! ```text
//! info | state | get <code> | set <code> <value> | describe <code>
//! capture | opreq <code> [params...] | probe
//! ```
//!
//! Numbers accept `0x` hex or decimal.

use crate::client::{Client, DeviceDescription};
use crate::error::ClientError;
use bytes::Bytes;
use ptpip_protocol::fuji::PropertyState;
use ptpip_protocol::packet::OPERATION_PARAMETERS;
use ptpip_protocol::{DevicePropCode, DevicePropDesc, OperationCode, PropForm, ResponseCode};
use serde::Serialize;
use std::fmt::Write;
use thiserror::Error;

pub const USAGE: &str = "\
  info                        Device info
  state                       Current property values (Fuji)
  get <code>                  Read a property
  set <code> <value>          Write a property
  describe <code>             Property descriptor
  capture                     Release the shutter
  opreq <code> [params...]    Raw operation, up to 5 parameters
  probe                       Liveness probe round trip";

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid number: {0}")]
    InvalidNumber(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Info,
    State,
    Get(DevicePropCode),
    Set(DevicePropCode, u32),
    Describe(DevicePropCode),
    Capture,
    OpReq {
        operation: OperationCode,
        parameters: Vec<u32>,
    },
    Probe,
}

/// Parses `0x`-prefixed hex or decimal.
pub fn parse_number(text: &str) -> Result<u32, CommandError> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| CommandError::InvalidNumber(text.to_string()))
}

fn parse_code(text: &str) -> Result<u16, CommandError> {
    let value = parse_number(text)?;
    u16::try_from(value).map_err(|_| CommandError::InvalidNumber(text.to_string()))
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((name, args)) = parts.split_first() else {
            return Err(CommandError::Usage("<command> [args...]"));
        };

        match (name.to_lowercase().as_str(), args) {
            ("info", []) => Ok(Command::Info),
            ("state", []) => Ok(Command::State),
            ("get", [code]) => Ok(Command::Get(DevicePropCode(parse_code(code)?))),
            ("get", _) => Err(CommandError::Usage("get <code>")),
            ("set", [code, value]) => Ok(Command::Set(
                DevicePropCode(parse_code(code)?),
                parse_number(value)?,
            )),
            ("set", _) => Err(CommandError::Usage("set <code> <value>")),
            ("describe", [code]) => Ok(Command::Describe(DevicePropCode(parse_code(code)?))),
            ("describe", _) => Err(CommandError::Usage("describe <code>")),
            ("capture", []) => Ok(Command::Capture),
            ("opreq", [code, params @ ..]) if params.len() <= OPERATION_PARAMETERS => {
                Ok(Command::OpReq {
                    operation: OperationCode(parse_code(code)?),
                    parameters: params
                        .iter()
                        .map(|p| parse_number(p))
                        .collect::<Result<_, _>>()?,
                })
            }
            ("opreq", _) => Err(CommandError::Usage("opreq <code> [params...] (at most 5)")),
            ("probe", []) => Ok(Command::Probe),
            ("info" | "state" | "capture" | "probe", _) => {
                Err(CommandError::Usage("command takes no arguments"))
            }
            (other, _) => Err(CommandError::Unknown(other.to_string())),
        }
    }

    pub async fn execute(&self, client: &Client) -> Result<CommandOutput, CommandError> {
        let output = match self {
            Command::Info => CommandOutput::Info(client.get_device_info().await?),
            Command::State => CommandOutput::State(client.device_state().await?),
            Command::Get(code) => CommandOutput::Property {
                code: *code,
                value: client.get_property(*code).await?,
            },
            Command::Set(code, value) => {
                client.set_property(*code, *value).await?;
                CommandOutput::Set {
                    code: *code,
                    value: *value,
                }
            }
            Command::Describe(code) => CommandOutput::Describe {
                code: *code,
                desc: client.describe_property(*code).await?,
            },
            Command::Capture => {
                let preview = client.initiate_capture().await?;
                CommandOutput::Capture {
                    preview_size: preview.as_ref().map(Bytes::len),
                    preview,
                }
            }
            Command::OpReq {
                operation,
                parameters,
            } => {
                let response = client.operation_request_raw(*operation, parameters).await?;
                CommandOutput::Raw {
                    operation: *operation,
                    code: response.code,
                    parameters: response.parameters,
                    packets: response.raw.iter().map(hex::encode).collect(),
                }
            }
            Command::Probe => CommandOutput::Probe {
                round_trip_ms: client.probe().await?.as_secs_f64() * 1000.0,
            },
        };
        Ok(output)
    }
}

/// The result of a command, renderable as text or JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandOutput {
    Info(DeviceDescription),
    State(Vec<PropertyState>),
    Property {
        code: DevicePropCode,
        value: u32,
    },
    Set {
        code: DevicePropCode,
        value: u32,
    },
    Describe {
        code: DevicePropCode,
        desc: Option<DevicePropDesc>,
    },
    Capture {
        preview_size: Option<usize>,
        #[serde(skip)]
        preview: Option<Bytes>,
    },
    Raw {
        operation: OperationCode,
        code: ResponseCode,
        parameters: [u32; OPERATION_PARAMETERS],
        /// Hex dump of each packet read, length prefix included.
        packets: Vec<String>,
    },
    Probe {
        round_trip_ms: f64,
    },
}

impl CommandOutput {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Plain text rendering, one item per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.render_into(&mut out);
        out.trim_end().to_string()
    }

    fn render_into(&self, out: &mut String) -> std::fmt::Result {
        match self {
            CommandOutput::Info(DeviceDescription::Standard(info)) => {
                writeln!(out, "Manufacturer: {}", info.manufacturer)?;
                writeln!(out, "Model: {}", info.model)?;
                writeln!(out, "Version: {}", info.device_version)?;
                writeln!(out, "Serial: {}", info.serial_number)?;
                writeln!(out, "Operations: {}", join(&info.operations_supported))?;
                writeln!(out, "Events: {}", join(&info.events_supported))?;
                writeln!(out, "Properties: {}", join(&info.device_properties_supported))?;
            }
            CommandOutput::Info(DeviceDescription::Fuji(list)) => {
                for desc in list {
                    render_desc(out, desc)?;
                }
            }
            CommandOutput::State(state) => {
                for entry in state {
                    writeln!(out, "{}: {:#010x}", entry.code, entry.value)?;
                }
            }
            CommandOutput::Property { code, value } => {
                writeln!(out, "{} = {} ({:#x})", code, value, value)?;
            }
            CommandOutput::Set { code, value } => {
                writeln!(out, "{} set to {} ({:#x})", code, value, value)?;
            }
            CommandOutput::Describe { code, desc: None } => {
                writeln!(out, "{}: no descriptor", code)?;
            }
            CommandOutput::Describe { desc: Some(desc), .. } => render_desc(out, desc)?,
            CommandOutput::Capture { preview_size, .. } => match preview_size {
                Some(size) => writeln!(out, "Captured, preview is {} bytes", size)?,
                None => writeln!(out, "Captured")?,
            },
            CommandOutput::Raw {
                operation,
                code,
                parameters,
                packets,
            } => {
                writeln!(out, "{} -> {}", operation, code)?;
                writeln!(out, "Parameters: {:x?}", parameters)?;
                for packet in packets {
                    writeln!(out, "  {}", packet)?;
                }
            }
            CommandOutput::Probe { round_trip_ms } => {
                writeln!(out, "Probe answered in {:.2} ms", round_trip_ms)?;
            }
        }
        Ok(())
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_desc(out: &mut String, desc: &DevicePropDesc) -> std::fmt::Result {
    let access = if desc.is_writable() { "rw" } else { "ro" };
    writeln!(
        out,
        "{} {:?} {} current={:#x} default={:#x}",
        desc.code,
        desc.data_type,
        access,
        desc.current_value_u64(),
        ptpip_protocol::dataset::widen_u64(&desc.factory_default)
    )?;
    match &desc.form {
        PropForm::None => {}
        PropForm::Range { min, max, step } => writeln!(
            out,
            "  range {:#x}..={:#x} step {:#x}",
            ptpip_protocol::dataset::widen_u64(min),
            ptpip_protocol::dataset::widen_u64(max),
            ptpip_protocol::dataset::widen_u64(step)
        )?,
        PropForm::Enum { values } => {
            let values: Vec<String> = values
                .iter()
                .map(|v| format!("{:#x}", ptpip_protocol::dataset::widen_u64(v)))
                .collect();
            writeln!(out, "  values {}", values.join(", "))?;
        }
    }
    Ok(())
}
