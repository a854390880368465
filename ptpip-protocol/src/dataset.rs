//! PTP datasets carried in data phases.
//!
//! Unlike packet bodies these use the PTP dataset encoding: strings are a
//! `u8` character count (terminator included) followed by UTF-16LE code
//! units, and arrays are a `u32` element count followed by the elements.

use crate::codec::FieldReader;
use crate::codes::{DevicePropCode, EventCode, OperationCode};
use crate::error::ProtocolError;
use serde::Serialize;

/// PTP datatype codes used in property descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Int128,
    Uint128,
    String,
}

impl DataType {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x0001 => DataType::Int8,
            0x0002 => DataType::Uint8,
            0x0003 => DataType::Int16,
            0x0004 => DataType::Uint16,
            0x0005 => DataType::Int32,
            0x0006 => DataType::Uint32,
            0x0007 => DataType::Int64,
            0x0008 => DataType::Uint64,
            0x0009 => DataType::Int128,
            0x000A => DataType::Uint128,
            0xFFFF => DataType::String,
            _ => return None,
        })
    }

    pub fn code(&self) -> u16 {
        match self {
            DataType::Int8 => 0x0001,
            DataType::Uint8 => 0x0002,
            DataType::Int16 => 0x0003,
            DataType::Uint16 => 0x0004,
            DataType::Int32 => 0x0005,
            DataType::Uint32 => 0x0006,
            DataType::Int64 => 0x0007,
            DataType::Uint64 => 0x0008,
            DataType::Int128 => 0x0009,
            DataType::Uint128 => 0x000A,
            DataType::String => 0xFFFF,
        }
    }

    /// Width of one value, or `None` for strings.
    pub fn value_size(&self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::Uint8 => Some(1),
            DataType::Int16 | DataType::Uint16 => Some(2),
            DataType::Int32 | DataType::Uint32 => Some(4),
            DataType::Int64 | DataType::Uint64 => Some(8),
            DataType::Int128 | DataType::Uint128 => Some(16),
            DataType::String => None,
        }
    }
}

/// Allowed values of a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PropForm {
    None,
    Range {
        min: Vec<u8>,
        max: Vec<u8>,
        step: Vec<u8>,
    },
    Enum {
        values: Vec<Vec<u8>>,
    },
}

/// A DevicePropDesc dataset. Values are kept as raw little-endian bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DevicePropDesc {
    pub code: DevicePropCode,
    pub data_type: DataType,
    /// 0 = read-only, 1 = read-write.
    pub get_set: u8,
    pub factory_default: Vec<u8>,
    pub current_value: Vec<u8>,
    pub form: PropForm,
}

impl DevicePropDesc {
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = FieldReader::new(buf, 0);
        Self::read(&mut reader)
    }

    pub(crate) fn read(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError> {
        let code = DevicePropCode(r.get_u16()?);
        let raw_type = r.get_u16()?;
        let data_type = DataType::from_code(raw_type).ok_or_else(|| {
            ProtocolError::malformed(format!(
                "property {} has unknown datatype {:#06x}",
                code, raw_type
            ))
        })?;
        let get_set = r.get_u8()?;
        let factory_default = read_value(r, data_type)?;
        let current_value = read_value(r, data_type)?;

        let form = match r.get_u8()? {
            0 => PropForm::None,
            1 => PropForm::Range {
                min: read_value(r, data_type)?,
                max: read_value(r, data_type)?,
                step: read_value(r, data_type)?,
            },
            2 => {
                let count = r.get_u16()?;
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(read_value(r, data_type)?);
                }
                PropForm::Enum { values }
            }
            other => {
                return Err(ProtocolError::malformed(format!(
                    "property {} has unknown form flag {}",
                    code, other
                )))
            }
        };

        Ok(Self {
            code,
            data_type,
            get_set,
            factory_default,
            current_value,
            form,
        })
    }

    pub fn is_writable(&self) -> bool {
        self.get_set == 1
    }

    /// Current value zero-extended to 64 bits.
    pub fn current_value_u64(&self) -> u64 {
        widen_u64(&self.current_value)
    }
}

fn read_value(r: &mut FieldReader<'_>, data_type: DataType) -> Result<Vec<u8>, ProtocolError> {
    match data_type.value_size() {
        Some(size) => Ok(r.get_bytes(size)?.to_vec()),
        None => {
            // Keep the raw string encoding: count byte plus code units
            let count = r.get_u8()?;
            let mut raw = vec![count];
            raw.extend_from_slice(r.get_bytes(count as usize * 2)?);
            Ok(raw)
        }
    }
}

/// Widens up to four little-endian bytes into a `u32`.
pub fn widen_u32(bytes: &[u8]) -> u32 {
    let mut out = [0u8; 4];
    let n = bytes.len().min(4);
    out[..n].copy_from_slice(&bytes[..n]);
    u32::from_le_bytes(out)
}

/// Widens up to eight little-endian bytes into a `u64`.
pub fn widen_u64(bytes: &[u8]) -> u64 {
    let mut out = [0u8; 8];
    let n = bytes.len().min(8);
    out[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(out)
}

/// The DeviceInfo dataset returned by GetDeviceInfo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub standard_version: u16,
    pub vendor_extension_id: u32,
    pub vendor_extension_version: u16,
    pub vendor_extension_desc: String,
    pub functional_mode: u16,
    pub operations_supported: Vec<OperationCode>,
    pub events_supported: Vec<EventCode>,
    pub device_properties_supported: Vec<DevicePropCode>,
    pub capture_formats: Vec<u16>,
    pub image_formats: Vec<u16>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FieldReader::new(buf, 0);
        Ok(Self {
            standard_version: r.get_u16()?,
            vendor_extension_id: r.get_u32()?,
            vendor_extension_version: r.get_u16()?,
            vendor_extension_desc: read_ptp_string(&mut r)?,
            functional_mode: r.get_u16()?,
            operations_supported: read_u16_array(&mut r)?
                .into_iter()
                .map(OperationCode)
                .collect(),
            events_supported: read_u16_array(&mut r)?
                .into_iter()
                .map(EventCode)
                .collect(),
            device_properties_supported: read_u16_array(&mut r)?
                .into_iter()
                .map(DevicePropCode)
                .collect(),
            capture_formats: read_u16_array(&mut r)?,
            image_formats: read_u16_array(&mut r)?,
            manufacturer: read_ptp_string(&mut r)?,
            model: read_ptp_string(&mut r)?,
            device_version: read_ptp_string(&mut r)?,
            serial_number: read_ptp_string(&mut r)?,
        })
    }
}

/// Reads a PTP dataset string: `u8` count of UTF-16 units, NUL included.
pub(crate) fn read_ptp_string(r: &mut FieldReader<'_>) -> Result<String, ProtocolError> {
    let count = r.get_u8()? as usize;
    if count == 0 {
        return Ok(String::new());
    }
    let raw = r.get_bytes(count * 2)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
        .take_while(|unit| *unit != 0)
        .collect();
    String::from_utf16(&units).map_err(|_| ProtocolError::malformed("invalid UTF-16 string"))
}

fn read_u16_array(r: &mut FieldReader<'_>) -> Result<Vec<u16>, ProtocolError> {
    let count = r.get_u32()? as usize;
    if count > r.remaining() / 2 {
        return Err(ProtocolError::truncated(count * 2, r.remaining()));
    }
    (0..count).map(|_| r.get_u16()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Writes a PTP dataset string.
    pub(crate) fn ptp_string(s: &str) -> Vec<u8> {
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

    pub(crate) fn film_simulation_desc() -> Vec<u8> {
        let mut raw = vec![0x01, 0xd0, 0x04, 0x00, 0x01, 0x01, 0x00, 0x01, 0x00, 0x02, 0x0b, 0x00];
        for v in 1u16..=11 {
            raw.extend_from_slice(&v.to_le_bytes());
        }
        raw
    }

    #[test]
    fn test_film_simulation_descriptor() {
        let desc = DevicePropDesc::parse(&film_simulation_desc()).unwrap();
        assert_eq!(desc.code, DevicePropCode::FUJI_FILM_SIMULATION);
        assert_eq!(desc.data_type, DataType::Uint16);
        assert!(desc.is_writable());
        assert_eq!(desc.factory_default, vec![1, 0]);
        assert_eq!(desc.current_value_u64(), 1);

        let PropForm::Enum { values } = &desc.form else {
            panic!("expected enum form, got {:?}", desc.form);
        };
        assert_eq!(values.len(), 11);
        assert_eq!(values[10], vec![0x0b, 0x00]);
    }

    #[test]
    fn test_range_descriptor() {
        // ExposureBias: INT16, read-write, range -3000..=3000 step 333
        let mut raw = vec![0x10, 0x50, 0x03, 0x00, 0x01];
        raw.extend_from_slice(&0i16.to_le_bytes());
        raw.extend_from_slice(&(-1000i16).to_le_bytes());
        raw.push(1);
        for v in [-3000i16, 3000, 333] {
            raw.extend_from_slice(&v.to_le_bytes());
        }

        let desc = DevicePropDesc::parse(&raw).unwrap();
        assert_eq!(desc.data_type, DataType::Int16);
        assert_eq!(desc.current_value, (-1000i16).to_le_bytes().to_vec());
        assert_eq!(
            desc.form,
            PropForm::Range {
                min: (-3000i16).to_le_bytes().to_vec(),
                max: 3000i16.to_le_bytes().to_vec(),
                step: 333i16.to_le_bytes().to_vec(),
            }
        );
    }

    #[test]
    fn test_descriptor_without_form() {
        let raw = [0x01, 0x50, 0x02, 0x00, 0x00, 0x64, 0x32, 0x00];
        let desc = DevicePropDesc::parse(&raw).unwrap();
        assert_eq!(desc.code, DevicePropCode::BATTERY_LEVEL);
        assert!(!desc.is_writable());
        assert_eq!(desc.current_value, vec![0x32]);
        assert_eq!(desc.form, PropForm::None);
    }

    #[test]
    fn test_descriptor_unknown_datatype() {
        let raw = [0x01, 0x50, 0x42, 0x00, 0x00];
        assert!(matches!(
            DevicePropDesc::parse(&raw),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_descriptor_truncated_enum() {
        let raw = film_simulation_desc();
        assert!(matches!(
            DevicePropDesc::parse(&raw[..raw.len() - 1]),
            Err(ProtocolError::TruncatedPacket { .. })
        ));
    }

    #[test]
    fn test_widen() {
        assert_eq!(widen_u32(&[0x00, 0x19, 0x00, 0x80]), 0x8000_1900);
        assert_eq!(widen_u32(&[0x05]), 5);
        assert_eq!(widen_u32(&[1, 0, 0, 0, 9]), 1);
        assert_eq!(widen_u64(&[0xff, 0xff]), 0xffff);
    }

    #[test]
    fn test_device_info() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&100u16.to_le_bytes());
        raw.extend_from_slice(&0x0Eu32.to_le_bytes());
        raw.extend_from_slice(&100u16.to_le_bytes());
        raw.extend(ptp_string("fujifilm.co.jp: 1.0;"));
        raw.extend_from_slice(&0u16.to_le_bytes());
        // operations
        raw.extend_from_slice(&2u32.to_le_bytes());
        raw.extend_from_slice(&0x1001u16.to_le_bytes());
        raw.extend_from_slice(&0x1002u16.to_le_bytes());
        // events
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&0x400Du16.to_le_bytes());
        // properties
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&0x5001u16.to_le_bytes());
        // capture and image formats
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&0x3801u16.to_le_bytes());
        raw.extend(ptp_string("FUJIFILM"));
        raw.extend(ptp_string("X-T1"));
        raw.extend(ptp_string("1.10"));
        raw.extend(ptp_string(""));

        let info = DeviceInfo::parse(&raw).unwrap();
        assert_eq!(info.vendor_extension_id, 0x0E);
        assert_eq!(info.vendor_extension_desc, "fujifilm.co.jp: 1.0;");
        assert_eq!(
            info.operations_supported,
            vec![OperationCode::GET_DEVICE_INFO, OperationCode::OPEN_SESSION]
        );
        assert_eq!(info.events_supported, vec![EventCode::CAPTURE_COMPLETE]);
        assert_eq!(info.image_formats, vec![0x3801]);
        assert_eq!(info.model, "X-T1");
        assert_eq!(info.serial_number, "");
    }

    #[test]
    fn test_device_info_oversized_array() {
        let mut raw = vec![0u8; 8];
        raw.push(0); // empty extension description
        raw.extend_from_slice(&0u16.to_le_bytes());
        raw.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            DeviceInfo::parse(&raw),
            Err(ProtocolError::TruncatedPacket { .. })
        ));
    }
}
