//! Schema-driven little-endian codec for packet bodies.
//!
//! Every packet kind declares its layout as a static list of [`Field`]
//! descriptors. Fixed-width fields contribute to the kind's fixed footprint;
//! variable fields (UTF-16LE strings and a trailing blob) share whatever the
//! declared packet length leaves over:
//!
//! ```text
//! variable budget = declared_length - header_size - fixed_footprint
//! ```
//!
//! Fields travel in schema order. A string ends at its first NUL code unit
//! within the budget; a trailing blob takes the rest of the budget.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Size of a GUID on the wire.
pub const GUID_SIZE: usize = 16;

/// One entry of a packet body schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    U8,
    U16,
    U32,
    U64,
    /// Raw 16-byte GUID, no byte-order conversion.
    Guid,
    /// Nested fixed-width sub-record.
    Record(&'static [Field]),
    /// NUL-terminated UTF-16LE string.
    Utf16String,
    /// Raw bytes up to the end of the declared length.
    TrailingBlob,
}

impl Field {
    /// Returns the wire size of a fixed-width field, or 0 for variable fields.
    pub const fn fixed_size(&self) -> usize {
        match self {
            Field::U8 => 1,
            Field::U16 => 2,
            Field::U32 => 4,
            Field::U64 => 8,
            Field::Guid => GUID_SIZE,
            Field::Record(fields) => fixed_footprint(fields),
            Field::Utf16String | Field::TrailingBlob => 0,
        }
    }

    pub const fn is_variable(&self) -> bool {
        matches!(self, Field::Utf16String | Field::TrailingBlob)
    }
}

/// Sums the fixed-width fields of a schema, descending into sub-records.
pub const fn fixed_footprint(schema: &[Field]) -> usize {
    let mut total = 0;
    let mut i = 0;
    while i < schema.len() {
        total += schema[i].fixed_size();
        i += 1;
    }
    total
}

/// A packet body with a compile-time schema.
///
/// `write_fields` and `read_fields` must visit the fields in `SCHEMA` order.
pub trait Body: Sized {
    const SCHEMA: &'static [Field];

    /// Bytes taken by the fixed-width fields of `SCHEMA`.
    const FIXED_SIZE: usize = fixed_footprint(Self::SCHEMA);

    fn write_fields(&self, w: &mut FieldWriter);

    fn read_fields(r: &mut FieldReader<'_>) -> Result<Self, ProtocolError>;
}

/// Encodes a body without any header.
pub fn encode_body<T: Body>(body: &T) -> BytesMut {
    let mut writer = FieldWriter::with_capacity(T::FIXED_SIZE);
    body.write_fields(&mut writer);
    writer.into_inner()
}

/// Decodes a body received under a header of `header_size` bytes.
///
/// `declared_length` is the length field from the wire, header included.
/// Bytes beyond the declared length are ignored.
pub fn decode_body<T: Body>(
    body: &[u8],
    declared_length: u32,
    header_size: usize,
) -> Result<T, ProtocolError> {
    let declared = declared_length as usize;
    let minimum = header_size + T::FIXED_SIZE;
    if declared < minimum {
        return Err(ProtocolError::malformed(format!(
            "declared length {} below minimum {} for this packet kind",
            declared, minimum
        )));
    }

    let body_len = declared - header_size;
    if body.len() < body_len {
        return Err(ProtocolError::truncated(body_len, body.len()));
    }

    let mut reader = FieldReader::new(&body[..body_len], declared - minimum);
    T::read_fields(&mut reader)
}

/// Appends little-endian fields to a buffer.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: BytesMut,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn put_guid(&mut self, guid: &Uuid) {
        self.buf.put_slice(guid.as_bytes());
    }

    /// Writes `s` as UTF-16LE followed by a two-byte NUL.
    ///
    /// Characters after an embedded NUL are not sent.
    pub fn put_utf16(&mut self, s: &str) {
        let visible = s.split('\0').next().unwrap_or_default();
        for unit in visible.encode_utf16() {
            self.buf.put_u16_le(unit);
        }
        self.buf.put_u16_le(0);
    }

    pub fn put_blob(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn put_u32_array(&mut self, values: &[u32]) {
        for v in values {
            self.buf.put_u32_le(*v);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

/// Reads little-endian fields from a body slice.
#[derive(Debug)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    variable_budget: usize,
}

impl<'a> FieldReader<'a> {
    /// Creates a reader whose variable fields may consume at most
    /// `variable_budget` bytes in total.
    pub fn new(buf: &'a [u8], variable_budget: usize) -> Self {
        Self {
            buf,
            variable_budget,
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.buf.len() < n {
            return Err(ProtocolError::truncated(n, self.buf.len()));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?.get_u8())
    }

    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(self.take(2)?.get_u16_le())
    }

    pub fn get_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(self.take(4)?.get_u32_le())
    }

    pub fn get_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(self.take(8)?.get_u64_le())
    }

    pub fn get_guid(&mut self) -> Result<Uuid, ProtocolError> {
        let raw = self.take(GUID_SIZE)?;
        let mut bytes = [0u8; GUID_SIZE];
        bytes.copy_from_slice(raw);
        Ok(Uuid::from_bytes(bytes))
    }

    /// Reads `n` raw bytes outside the variable budget.
    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.take(n)
    }

    pub fn get_u32_array<const N: usize>(&mut self) -> Result<[u32; N], ProtocolError> {
        let mut values = [0u32; N];
        for v in values.iter_mut() {
            *v = self.get_u32()?;
        }
        Ok(values)
    }

    /// Reads a NUL-terminated UTF-16LE string from the variable budget.
    pub fn get_utf16(&mut self) -> Result<String, ProtocolError> {
        let window = self.variable_budget.min(self.buf.len());
        let terminator = self.buf[..window]
            .chunks_exact(2)
            .position(|unit| unit == [0, 0]);

        let Some(index) = terminator else {
            if self.variable_budget > self.buf.len() {
                return Err(ProtocolError::truncated(self.variable_budget, self.buf.len()));
            }
            return Err(ProtocolError::malformed(
                "string is not NUL-terminated within the declared length",
            ));
        };

        let consumed = (index + 1) * 2;
        let raw = self.take(consumed)?;
        self.variable_budget -= consumed;

        let units: Vec<u16> = raw[..index * 2]
            .chunks_exact(2)
            .map(|unit| u16::from_le_bytes([unit[0], unit[1]]))
            .collect();
        String::from_utf16(&units).map_err(|_| ProtocolError::malformed("invalid UTF-16 string"))
    }

    /// Takes every byte left in the variable budget.
    pub fn get_trailing_blob(&mut self) -> Result<Bytes, ProtocolError> {
        let raw = self.take(self.variable_budget)?;
        self.variable_budget = 0;
        Ok(Bytes::copy_from_slice(raw))
    }

    /// Bytes left in the body, fixed and variable.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }
}
