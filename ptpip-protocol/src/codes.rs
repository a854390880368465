//! PTP and PTP/IP code tables.
//!
//! Operation, response, event and property codes are open sets (vendors add
//! their own), so they are newtypes with named constants rather than enums.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// PTP/IP protocol version 1.0.
pub const PROTOCOL_VERSION_1_0: u32 = 0x0001_0000;

/// Protocol version a Fuji responder requires at the start of the init packet.
pub const FUJI_PROTOCOL_VERSION: u32 = 0x8F53_E4F2;

/// Data phase announced by an operation request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum DataPhase {
    #[default]
    NoDataOrDataIn = 1,
    DataOut = 2,
    Unknown = 3,
}

impl TryFrom<u32> for DataPhase {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(DataPhase::NoDataOrDataIn),
            2 => Ok(DataPhase::DataOut),
            3 => Ok(DataPhase::Unknown),
            other => Err(ProtocolError::malformed(format!(
                "invalid data phase {:#x}",
                other
            ))),
        }
    }
}

/// Reason carried by an InitFail packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailReason {
    RejectedInitiator,
    Busy,
    #[default]
    Unspecified,
    /// Fuji: the camera is busy or in a state that refuses connections.
    FujiDeviceBusy,
    /// Fuji: the init packet carried the wrong protocol version.
    FujiInvalidParameter,
    Other(u32),
}

impl FailReason {
    pub fn code(&self) -> u32 {
        match self {
            FailReason::RejectedInitiator => 0x0000_0001,
            FailReason::Busy => 0x0000_0002,
            FailReason::Unspecified => 0x0000_0003,
            FailReason::FujiDeviceBusy => 0x0000_2019,
            FailReason::FujiInvalidParameter => 0x0000_201D,
            FailReason::Other(code) => *code,
        }
    }

    /// Busy responders may accept a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, FailReason::Busy | FailReason::FujiDeviceBusy)
    }
}

impl From<u32> for FailReason {
    fn from(code: u32) -> Self {
        match code {
            0x0000_0001 => FailReason::RejectedInitiator,
            0x0000_0002 => FailReason::Busy,
            0x0000_0003 => FailReason::Unspecified,
            0x0000_2019 => FailReason::FujiDeviceBusy,
            0x0000_201D => FailReason::FujiInvalidParameter,
            other => FailReason::Other(other),
        }
    }
}

impl fmt::Display for FailReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailReason::RejectedInitiator => "initiator rejected",
            FailReason::Busy => "responder busy",
            FailReason::Unspecified => "unspecified failure",
            FailReason::FujiDeviceBusy => "camera busy or not in a connectable state",
            FailReason::FujiInvalidParameter => "unknown protocol version",
            FailReason::Other(_) => "vendor-specific failure",
        };
        write!(f, "{} ({:#x})", text, self.code())
    }
}

/// PTP operation code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationCode(pub u16);

impl OperationCode {
    pub const GET_DEVICE_INFO: Self = Self(0x1001);
    pub const OPEN_SESSION: Self = Self(0x1002);
    pub const CLOSE_SESSION: Self = Self(0x1003);
    pub const INITIATE_CAPTURE: Self = Self(0x100E);
    pub const GET_DEVICE_PROP_DESC: Self = Self(0x1014);
    pub const GET_DEVICE_PROP_VALUE: Self = Self(0x1015);
    pub const SET_DEVICE_PROP_VALUE: Self = Self(0x1016);
    pub const INITIATE_OPEN_CAPTURE: Self = Self(0x101C);

    pub const FUJI_GET_CAPTURE_PREVIEW: Self = Self(0x9022);
    pub const FUJI_GET_DEVICE_INFO: Self = Self(0x902B);

    pub fn name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::GET_DEVICE_INFO => "GetDeviceInfo",
            Self::OPEN_SESSION => "OpenSession",
            Self::CLOSE_SESSION => "CloseSession",
            Self::INITIATE_CAPTURE => "InitiateCapture",
            Self::GET_DEVICE_PROP_DESC => "GetDevicePropDesc",
            Self::GET_DEVICE_PROP_VALUE => "GetDevicePropValue",
            Self::SET_DEVICE_PROP_VALUE => "SetDevicePropValue",
            Self::INITIATE_OPEN_CAPTURE => "InitiateOpenCapture",
            Self::FUJI_GET_CAPTURE_PREVIEW => "FujiGetCapturePreview",
            Self::FUJI_GET_DEVICE_INFO => "FujiGetDeviceInfo",
            _ => return None,
        })
    }
}

impl fmt::Display for OperationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#06x})", name, self.0),
            None => write!(f, "{:#06x}", self.0),
        }
    }
}

/// PTP response code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseCode(pub u16);

impl ResponseCode {
    pub const OK: Self = Self(0x2001);
    pub const GENERAL_ERROR: Self = Self(0x2002);
    pub const SESSION_NOT_OPEN: Self = Self(0x2003);
    pub const INVALID_TRANSACTION_ID: Self = Self(0x2004);
    pub const OPERATION_NOT_SUPPORTED: Self = Self(0x2005);
    pub const DEVICE_PROP_NOT_SUPPORTED: Self = Self(0x200A);
    pub const DEVICE_BUSY: Self = Self(0x2019);
    pub const INVALID_DEVICE_PROP_VALUE: Self = Self(0x201C);
    pub const INVALID_PARAMETER: Self = Self(0x201D);
    pub const SESSION_ALREADY_OPEN: Self = Self(0x201E);
    pub const TRANSACTION_CANCELLED: Self = Self(0x201F);

    const NAMES: [&'static str; 32] = [
        "OK",
        "GeneralError",
        "SessionNotOpen",
        "InvalidTransactionID",
        "OperationNotSupported",
        "ParameterNotSupported",
        "IncompleteTransfer",
        "InvalidStorageID",
        "InvalidObjectHandle",
        "DevicePropNotSupported",
        "InvalidObjectFormatCode",
        "StoreFull",
        "ObjectWriteProtected",
        "StoreReadOnly",
        "AccessDenied",
        "NoThumbnailPresent",
        "SelfTestFailed",
        "PartialDeletion",
        "StoreNotAvailable",
        "SpecificationByFormatUnsupported",
        "NoValidObjectInfo",
        "InvalidCodeFormat",
        "UnknownVendorCode",
        "CaptureAlreadyTerminated",
        "DeviceBusy",
        "InvalidParentObject",
        "InvalidDevicePropFormat",
        "InvalidDevicePropValue",
        "InvalidParameter",
        "SessionAlreadyOpen",
        "TransactionCancelled",
        "SpecificationOfDestinationUnsupported",
    ];

    pub fn is_ok(&self) -> bool {
        *self == Self::OK
    }

    pub fn name(&self) -> Option<&'static str> {
        let index = self.0.checked_sub(Self::OK.0)? as usize;
        Self::NAMES.get(index).copied()
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({:#06x})", name, self.0),
            None => write!(f, "{:#06x}", self.0),
        }
    }
}

/// PTP event code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventCode(pub u16);

impl EventCode {
    pub const CANCEL_TRANSACTION: Self = Self(0x4001);
    pub const OBJECT_ADDED: Self = Self(0x4002);
    pub const DEVICE_PROP_CHANGED: Self = Self(0x4006);
    pub const CAPTURE_COMPLETE: Self = Self(0x400D);

    pub const FUJI_PREVIEW_AVAILABLE: Self = Self(0xC001);
    pub const FUJI_OBJECT_ADDED: Self = Self(0xC004);
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Device property code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevicePropCode(pub u16);

impl DevicePropCode {
    pub const BATTERY_LEVEL: Self = Self(0x5001);
    pub const EXPOSURE_INDEX: Self = Self(0x500F);

    pub const FUJI_FILM_SIMULATION: Self = Self(0xD001);
    pub const FUJI_EXPOSURE_INDEX: Self = Self(0xD02A);
    /// Returns `(code, value)` pairs for the current camera state.
    pub const FUJI_CURRENT_STATE: Self = Self(0xD212);
    pub const FUJI_INIT_SEQUENCE: Self = Self(0xDF01);
    pub const FUJI_APP_VERSION: Self = Self(0xDF24);
}

impl fmt::Display for DevicePropCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Vendor extension IDs assigned by PIMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VendorExtension {
    EastmanKodak,
    SeikoEpson,
    Agilent,
    Polaroid,
    AgfaGevaert,
    Microsoft,
    Equinox,
    ViewQuest,
    StMicroelectronics,
    Nikon,
    Canon,
    FotoNation,
    Pentax,
    Fuji,
    NddMedical,
    Samsung,
    Parrot,
    Panasonic,
}

impl VendorExtension {
    const TABLE: [(&'static str, VendorExtension, u32); 18] = [
        ("kodak", VendorExtension::EastmanKodak, 0x01),
        ("epson", VendorExtension::SeikoEpson, 0x02),
        ("agilent", VendorExtension::Agilent, 0x03),
        ("polaroid", VendorExtension::Polaroid, 0x04),
        ("agfa", VendorExtension::AgfaGevaert, 0x05),
        ("ms", VendorExtension::Microsoft, 0x06),
        ("equinox", VendorExtension::Equinox, 0x07),
        ("vq", VendorExtension::ViewQuest, 0x08),
        ("st", VendorExtension::StMicroelectronics, 0x09),
        ("nikon", VendorExtension::Nikon, 0x0A),
        ("canon", VendorExtension::Canon, 0x0B),
        ("fn", VendorExtension::FotoNation, 0x0C),
        ("pentax", VendorExtension::Pentax, 0x0D),
        ("fuji", VendorExtension::Fuji, 0x0E),
        ("ndd", VendorExtension::NddMedical, 0x12),
        ("samsung", VendorExtension::Samsung, 0x1A),
        ("parrot", VendorExtension::Parrot, 0x1B),
        ("panasonic", VendorExtension::Panasonic, 0x1C),
    ];

    /// Resolves a short vendor name such as `"fuji"`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::TABLE
            .iter()
            .find(|(n, _, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, vendor, _)| *vendor)
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(_, _, c)| *c == code)
            .map(|(_, vendor, _)| *vendor)
    }

    pub fn code(&self) -> u32 {
        Self::TABLE
            .iter()
            .find(|(_, vendor, _)| vendor == self)
            .map(|(_, _, code)| *code)
            .unwrap_or(0)
    }

    pub fn short_name(&self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(_, vendor, _)| vendor == self)
            .map(|(name, _, _)| *name)
            .unwrap_or("generic")
    }
}

/// Resolves a vendor name to its extension code; unknown names yield 0.
pub fn vendor_code(name: &str) -> u32 {
    VendorExtension::from_name(name)
        .map(|v| v.code())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_phase_values() {
        assert_eq!(DataPhase::DataOut as u32, 2);
        assert_eq!(DataPhase::try_from(3).unwrap(), DataPhase::Unknown);
        assert!(DataPhase::try_from(0).is_err());
    }

    #[test]
    fn test_fail_reason_mapping() {
        assert_eq!(FailReason::from(1), FailReason::RejectedInitiator);
        assert_eq!(FailReason::from(0x201D), FailReason::FujiInvalidParameter);
        assert_eq!(FailReason::from(0x77), FailReason::Other(0x77));
        assert_eq!(FailReason::FujiDeviceBusy.code(), 0x2019);
        assert!(FailReason::Busy.is_transient());
        assert!(!FailReason::RejectedInitiator.is_transient());
        assert!(FailReason::FujiInvalidParameter
            .to_string()
            .contains("protocol version"));
    }

    #[test]
    fn test_response_code_names() {
        assert_eq!(ResponseCode::OK.name(), Some("OK"));
        assert_eq!(ResponseCode(0x200C).name(), Some("StoreFull"));
        assert_eq!(ResponseCode::SESSION_ALREADY_OPEN.name(), Some("SessionAlreadyOpen"));
        assert_eq!(ResponseCode(0x2020).name(), Some("SpecificationOfDestinationUnsupported"));
        assert_eq!(ResponseCode(0x2021).name(), None);
        assert_eq!(ResponseCode(0x1015).name(), None);
        assert_eq!(ResponseCode::DEVICE_BUSY.to_string(), "DeviceBusy (0x2019)");
    }

    #[test]
    fn test_operation_code_display() {
        assert_eq!(
            OperationCode::GET_DEVICE_PROP_VALUE.to_string(),
            "GetDevicePropValue (0x1015)"
        );
        assert_eq!(OperationCode(0x9999).to_string(), "0x9999");
    }

    #[test]
    fn test_vendor_table() {
        assert_eq!(vendor_code("fuji"), 0x0E);
        assert_eq!(vendor_code(" FUJI "), 0x0E);
        assert_eq!(vendor_code("panasonic"), 0x1C);
        assert_eq!(vendor_code("ms"), 0x06);
        assert_eq!(vendor_code("hasselblad"), 0);
        assert_eq!(vendor_code("generic"), 0);
        assert_eq!(VendorExtension::from_code(0x12), Some(VendorExtension::NddMedical));
        assert_eq!(VendorExtension::Fuji.short_name(), "fuji");
    }
}
