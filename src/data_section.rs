//! Data section encoding and decoding
//!
//! Implements the MMDB self-describing value encoding: a control byte
//! carrying a type tag (3 bits) and size descriptor (5 bits), followed by
//! the payload. Maps and arrays nest recursively; pointers back-reference
//! earlier values in the data section and are resolved transparently.
//!
//! # Supported Types
//!
//! - **String**: UTF-8 text data
//! - **Double**: 64-bit floating point (IEEE 754)
//! - **Bytes**: raw byte arrays
//! - **Uint16 / Uint32 / Uint64 / Uint128**: unsigned integers,
//!   variable-width big-endian on disk
//! - **Int32**: signed 32-bit integers
//! - **Map**: key-value pairs (string keys), ordered
//! - **Array**: ordered lists of values
//! - **Bool**: boolean values
//! - **Float**: 32-bit floating point (IEEE 754)
//!
//! Pointers (type tag 1) never appear in decoded output; the decoder
//! inlines the pointee. Redirection chains are depth-bounded so crafted
//! cycles fail instead of looping.
//!
//! See: <https://maxmind.github.io/MaxMind-DB/>

use crate::error::{MmdbError, Result};
use std::collections::BTreeMap;

/// Bound on pointer redirection chains. Well-formed files never chain
/// pointers, so anything deeper than this is a crafted loop.
pub const MAX_POINTER_DEPTH: u32 = 16;

/// Bound on total value nesting, matching libmaxminddb's limit.
const MAX_STRUCTURE_DEPTH: u32 = 512;

/// A decoded data section value
///
/// Plain tree of values; pointer back-references in the encoding are
/// resolved and inlined during decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only), ordered by key
    Map(BTreeMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Borrow as a map, if this value is one
    pub fn as_map(&self) -> Option<&BTreeMap<String, DataValue>> {
        match self {
            DataValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow as a string slice, if this value is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Widen any unsigned integer variant to u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            _ => None,
        }
    }

    /// Look up a key in a map value
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Convert to a `serde_json::Value` for display or interop
    ///
    /// Uint128 renders as a decimal string (JSON numbers cannot hold it);
    /// Bytes render as lowercase hex.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value};
        match self {
            DataValue::String(s) => json!(s),
            DataValue::Double(d) => json!(d),
            DataValue::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
                json!(hex)
            }
            DataValue::Uint16(n) => json!(n),
            DataValue::Uint32(n) => json!(n),
            DataValue::Map(m) => {
                let obj: serde_json::Map<String, Value> =
                    m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
                Value::Object(obj)
            }
            DataValue::Int32(n) => json!(n),
            DataValue::Uint64(n) => json!(n),
            DataValue::Uint128(n) => json!(n.to_string()),
            DataValue::Array(a) => Value::Array(a.iter().map(|v| v.to_json()).collect()),
            DataValue::Bool(b) => json!(b),
            DataValue::Float(f) => json!(f),
        }
    }
}

// Type tags from the format. Tags >= 8 are encoded as "extended": control
// byte tag 0 followed by a byte holding the tag minus 7.
const TAG_EXTENDED: u8 = 0;
const TAG_POINTER: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_BYTES: u8 = 4;
const TAG_UINT16: u8 = 5;
const TAG_UINT32: u8 = 6;
const TAG_MAP: u8 = 7;
const TAG_INT32: u8 = 8;
const TAG_UINT64: u8 = 9;
const TAG_UINT128: u8 = 10;
const TAG_ARRAY: u8 = 11;
const TAG_BOOL: u8 = 14;
const TAG_FLOAT: u8 = 15;

/// Data section decoder
///
/// Decodes one value from any byte offset of a data section buffer.
/// Offsets (including pointer targets) are relative to the buffer start,
/// i.e. the start of the data section. Decoding is a pure read; the
/// decoder is freely shareable across threads.
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    /// Create a decoder over a data section buffer
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Decode the value starting at `offset`
    pub fn decode(&self, offset: usize) -> Result<DataValue> {
        let mut cursor = offset;
        self.decode_at(&mut cursor, 0, 0)
    }

    /// Decode the value starting at `offset`, also returning the offset of
    /// the first byte after its encoding
    pub fn decode_advancing(&self, offset: usize) -> Result<(DataValue, usize)> {
        let mut cursor = offset;
        let value = self.decode_at(&mut cursor, 0, 0)?;
        Ok((value, cursor))
    }

    fn decode_at(&self, cursor: &mut usize, depth: u32, ptr_depth: u32) -> Result<DataValue> {
        if depth > MAX_STRUCTURE_DEPTH {
            return Err(MmdbError::CorruptFormat(
                "value nesting exceeds structure depth bound".to_string(),
            ));
        }

        let ctrl = self.take_byte(cursor)?;
        let tag = ctrl >> 5;
        let size_bits = ctrl & 0x1F;

        let tag = match tag {
            TAG_EXTENDED => {
                let ext = self.take_byte(cursor)?;
                match ext.checked_add(7) {
                    Some(t) if t <= TAG_FLOAT => t,
                    _ => return Err(MmdbError::UnknownTypeTag(ext)),
                }
            }
            TAG_POINTER => {
                return self.decode_pointer(cursor, size_bits, depth, ptr_depth);
            }
            t => t,
        };

        match tag {
            TAG_STRING => self.decode_string(cursor, size_bits),
            TAG_DOUBLE => self.decode_double(cursor, size_bits),
            TAG_BYTES => self.decode_bytes(cursor, size_bits),
            TAG_UINT16 => {
                let n = self.decode_uint(cursor, size_bits, 2)?;
                Ok(DataValue::Uint16(n as u16))
            }
            TAG_UINT32 => {
                let n = self.decode_uint(cursor, size_bits, 4)?;
                Ok(DataValue::Uint32(n as u32))
            }
            TAG_MAP => self.decode_map(cursor, size_bits, depth, ptr_depth),
            TAG_INT32 => {
                let n = self.decode_uint(cursor, size_bits, 4)?;
                Ok(DataValue::Int32(n as u32 as i32))
            }
            TAG_UINT64 => {
                let n = self.decode_uint(cursor, size_bits, 8)?;
                Ok(DataValue::Uint64(n as u64))
            }
            TAG_UINT128 => {
                let n = self.decode_uint(cursor, size_bits, 16)?;
                Ok(DataValue::Uint128(n))
            }
            TAG_ARRAY => self.decode_array(cursor, size_bits, depth, ptr_depth),
            TAG_BOOL => match size_bits {
                0 => Ok(DataValue::Bool(false)),
                1 => Ok(DataValue::Bool(true)),
                _ => Err(MmdbError::CorruptFormat(format!(
                    "boolean size descriptor {} is not 0 or 1",
                    size_bits
                ))),
            },
            TAG_FLOAT => self.decode_float(cursor, size_bits),
            tag => Err(MmdbError::UnknownTypeTag(tag)),
        }
    }

    /// Decode a pointer and inline its target value
    ///
    /// The 2-bit size class in the control byte selects 1-4 extra bytes;
    /// classes 0-2 fold the control byte's low 3 bits into the offset and
    /// add a tiered base. All targets are relative to the buffer start.
    /// The cursor advances past the pointer's own encoding, never past the
    /// pointee, so sequential map/array elements parse correctly.
    fn decode_pointer(
        &self,
        cursor: &mut usize,
        size_bits: u8,
        depth: u32,
        ptr_depth: u32,
    ) -> Result<DataValue> {
        if ptr_depth >= MAX_POINTER_DEPTH {
            return Err(MmdbError::PointerDepthExceeded);
        }

        let size_class = (size_bits >> 3) & 0x3;
        let low_bits = (size_bits & 0x7) as u32;

        let target = match size_class {
            0 => {
                let b = self.take(cursor, 1)?;
                (low_bits << 8) | b[0] as u32
            }
            1 => {
                let b = self.take(cursor, 2)?;
                2048 + ((low_bits << 16) | (b[0] as u32) << 8 | b[1] as u32)
            }
            2 => {
                let b = self.take(cursor, 3)?;
                526336
                    + ((low_bits << 24) | (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32)
            }
            _ => {
                let b = self.take(cursor, 4)?;
                u32::from_be_bytes([b[0], b[1], b[2], b[3]])
            }
        };

        let mut target_cursor = target as usize;
        self.decode_at(&mut target_cursor, depth + 1, ptr_depth + 1)
    }

    fn decode_string(&self, cursor: &mut usize, size_bits: u8) -> Result<DataValue> {
        let len = self.decode_size(cursor, size_bits)?;
        let bytes = self.take(cursor, len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|_| MmdbError::CorruptFormat("string is not valid UTF-8".to_string()))?;
        Ok(DataValue::String(s.to_string()))
    }

    fn decode_bytes(&self, cursor: &mut usize, size_bits: u8) -> Result<DataValue> {
        let len = self.decode_size(cursor, size_bits)?;
        let bytes = self.take(cursor, len)?;
        Ok(DataValue::Bytes(bytes.to_vec()))
    }

    fn decode_double(&self, cursor: &mut usize, size_bits: u8) -> Result<DataValue> {
        if size_bits != 8 {
            return Err(MmdbError::CorruptFormat(format!(
                "double has size {}, expected 8",
                size_bits
            )));
        }
        let b = self.take(cursor, 8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(b);
        Ok(DataValue::Double(f64::from_be_bytes(bytes)))
    }

    fn decode_float(&self, cursor: &mut usize, size_bits: u8) -> Result<DataValue> {
        if size_bits != 4 {
            return Err(MmdbError::CorruptFormat(format!(
                "float has size {}, expected 4",
                size_bits
            )));
        }
        let b = self.take(cursor, 4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(b);
        Ok(DataValue::Float(f32::from_be_bytes(bytes)))
    }

    /// Decode a variable-width big-endian unsigned integer
    ///
    /// The size descriptor is the payload byte count; zero bytes encode 0.
    fn decode_uint(&self, cursor: &mut usize, size_bits: u8, max_bytes: u8) -> Result<u128> {
        if size_bits > max_bytes {
            return Err(MmdbError::CorruptFormat(format!(
                "integer payload of {} bytes exceeds maximum {}",
                size_bits, max_bytes
            )));
        }
        let bytes = self.take(cursor, size_bits as usize)?;
        let mut value: u128 = 0;
        for &b in bytes {
            value = (value << 8) | b as u128;
        }
        Ok(value)
    }

    fn decode_map(
        &self,
        cursor: &mut usize,
        size_bits: u8,
        depth: u32,
        ptr_depth: u32,
    ) -> Result<DataValue> {
        let count = self.decode_size(cursor, size_bits)?;
        let mut map = BTreeMap::new();

        for _ in 0..count {
            // Keys may themselves be pointers to shared strings
            let key = match self.decode_at(cursor, depth + 1, ptr_depth)? {
                DataValue::String(s) => s,
                other => {
                    return Err(MmdbError::CorruptFormat(format!(
                        "map key is not a string: {:?}",
                        other
                    )))
                }
            };
            let value = self.decode_at(cursor, depth + 1, ptr_depth)?;
            map.insert(key, value);
        }

        Ok(DataValue::Map(map))
    }

    fn decode_array(
        &self,
        cursor: &mut usize,
        size_bits: u8,
        depth: u32,
        ptr_depth: u32,
    ) -> Result<DataValue> {
        let count = self.decode_size(cursor, size_bits)?;
        let mut array = Vec::new();

        for _ in 0..count {
            array.push(self.decode_at(cursor, depth + 1, ptr_depth)?);
        }

        Ok(DataValue::Array(array))
    }

    /// Decode a size descriptor
    ///
    /// 0-28 is the literal size; 29/30/31 add 1/2/3 extension bytes on top
    /// of bases 29, 285, and 65821.
    fn decode_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize> {
        match size_bits {
            0..=28 => Ok(size_bits as usize),
            29 => {
                let b = self.take(cursor, 1)?;
                Ok(29 + b[0] as usize)
            }
            30 => {
                let b = self.take(cursor, 2)?;
                Ok(285 + u16::from_be_bytes([b[0], b[1]]) as usize)
            }
            _ => {
                let b = self.take(cursor, 3)?;
                Ok(65821 + (((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize))
            }
        }
    }

    fn take_byte(&self, cursor: &mut usize) -> Result<u8> {
        let b = self.take(cursor, 1)?;
        Ok(b[0])
    }

    /// Bounds-checked read of `len` bytes at the cursor
    fn take(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8]> {
        let end = cursor.checked_add(len).ok_or_else(|| {
            MmdbError::TruncatedData(format!("offset {} overflows with length {}", cursor, len))
        })?;
        if end > self.buffer.len() {
            return Err(MmdbError::TruncatedData(format!(
                "read of {} bytes at offset {} exceeds buffer length {}",
                len,
                cursor,
                self.buffer.len()
            )));
        }
        let slice = &self.buffer[*cursor..end];
        *cursor = end;
        Ok(slice)
    }
}

/// Data section encoder
///
/// Builds a data section by encoding values and tracking offsets.
/// Identical values deduplicate to the same offset, which is how real
/// databases keep shared records small.
pub struct DataEncoder {
    buffer: Vec<u8>,
    dedup_map: std::collections::HashMap<Vec<u8>, u32>,
}

impl DataEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup_map: std::collections::HashMap::new(),
        }
    }

    /// Encode a value and return its data-section offset
    ///
    /// A previously encoded identical value returns its existing offset.
    pub fn encode(&mut self, value: &DataValue) -> u32 {
        let mut temp = Vec::new();
        Self::encode_to_buffer(value, &mut temp);

        if let Some(&offset) = self.dedup_map.get(&temp) {
            return offset;
        }

        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(&temp);
        self.dedup_map.insert(temp, offset);
        offset
    }

    /// Get the final encoded data section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current buffer size in bytes
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    fn encode_to_buffer(value: &DataValue, buffer: &mut Vec<u8>) {
        match value {
            DataValue::String(s) => {
                Self::write_ctrl(TAG_STRING, s.len(), buffer);
                buffer.extend_from_slice(s.as_bytes());
            }
            DataValue::Double(d) => {
                Self::write_ctrl(TAG_DOUBLE, 8, buffer);
                buffer.extend_from_slice(&d.to_be_bytes());
            }
            DataValue::Bytes(b) => {
                Self::write_ctrl(TAG_BYTES, b.len(), buffer);
                buffer.extend_from_slice(b);
            }
            DataValue::Uint16(n) => Self::write_uint(TAG_UINT16, *n as u128, buffer),
            DataValue::Uint32(n) => Self::write_uint(TAG_UINT32, *n as u128, buffer),
            DataValue::Map(m) => {
                Self::write_ctrl(TAG_MAP, m.len(), buffer);
                // BTreeMap iterates in key order, matching the sorted-key
                // convention of production writers
                for (key, val) in m {
                    Self::write_ctrl(TAG_STRING, key.len(), buffer);
                    buffer.extend_from_slice(key.as_bytes());
                    Self::encode_to_buffer(val, buffer);
                }
            }
            DataValue::Int32(n) => {
                // Signed values always use the full width so the sign bit
                // survives the round trip
                Self::write_ctrl(TAG_INT32, 4, buffer);
                buffer.extend_from_slice(&n.to_be_bytes());
            }
            DataValue::Uint64(n) => Self::write_uint(TAG_UINT64, *n as u128, buffer),
            DataValue::Uint128(n) => Self::write_uint(TAG_UINT128, *n, buffer),
            DataValue::Array(a) => {
                Self::write_ctrl(TAG_ARRAY, a.len(), buffer);
                for val in a {
                    Self::encode_to_buffer(val, buffer);
                }
            }
            DataValue::Bool(b) => Self::write_ctrl(TAG_BOOL, *b as usize, buffer),
            DataValue::Float(f) => {
                Self::write_ctrl(TAG_FLOAT, 4, buffer);
                buffer.extend_from_slice(&f.to_be_bytes());
            }
        }
    }

    /// Write an unsigned integer at its minimal byte width
    fn write_uint(tag: u8, value: u128, buffer: &mut Vec<u8>) {
        let bytes = value.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        let payload = &bytes[skip..];
        Self::write_ctrl(tag, payload.len(), buffer);
        buffer.extend_from_slice(payload);
    }

    /// Write a control byte (plus extended-type byte and size extension
    /// bytes as needed) for the given tag and size
    fn write_ctrl(tag: u8, size: usize, buffer: &mut Vec<u8>) {
        let tag_bits = if tag <= 7 { tag << 5 } else { 0 };

        if size < 29 {
            buffer.push(tag_bits | size as u8);
        } else if size < 285 {
            buffer.push(tag_bits | 29);
        } else if size < 65821 {
            buffer.push(tag_bits | 30);
        } else {
            buffer.push(tag_bits | 31);
        }

        if tag > 7 {
            buffer.push(tag - 7);
        }

        if size < 29 {
            // size fully in the control byte
        } else if size < 285 {
            buffer.push((size - 29) as u8);
        } else if size < 65821 {
            buffer.extend_from_slice(&((size - 285) as u16).to_be_bytes());
        } else {
            let adjusted = (size - 65821) as u32;
            buffer.extend_from_slice(&adjusted.to_be_bytes()[1..]);
        }
    }
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new()
    }
}
