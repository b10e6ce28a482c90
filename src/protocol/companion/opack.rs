//! OPACK serialization
//!
//! Apple's compact binary object format used by the Companion link.
//! Supports small-integer shortcuts, sized integers, typed floats,
//! length-prefixed strings and data, booleans, null, UUIDs, arrays,
//! string-keyed dictionaries and back-references ("pointers") to
//! previously serialized values.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// OPACK decode errors
#[derive(Debug, Error)]
pub enum OpackError {
    #[error("truncated value at offset {0}")]
    Truncated(usize),

    #[error("unsupported type byte 0x{0:02x}")]
    UnsupportedType(u8),

    #[error("bad pointer index {0}")]
    BadPointer(usize),

    #[error("dictionary key must be a string")]
    NonStringKey,

    #[error("invalid UTF-8 in string")]
    InvalidUtf8,
}

/// A decoded OPACK value.
#[derive(Debug, Clone, PartialEq)]
pub enum OpackValue {
    /// Boolean
    Bool(bool),
    /// Null
    Null,
    /// Signed integer
    Int(i64),
    /// Double-precision float
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// UUID (16 bytes)
    Uuid(uuid::Uuid),
    /// Ordered array
    Array(Vec<OpackValue>),
    /// String-keyed dictionary, insertion order preserved
    Dict(Vec<(String, OpackValue)>),
}

impl OpackValue {
    /// Dictionary constructor from pairs.
    #[must_use]
    pub fn dict<const N: usize>(entries: [(&str, OpackValue); N]) -> Self {
        Self::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    /// Look up a dictionary key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OpackValue> {
        match self {
            Self::Dict(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// String accessor.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer accessor.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Bytes accessor.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Values eligible for back-referencing. Encoder and decoder must agree
/// on this set for round-trips to hold.
fn pointer_eligible(value: &OpackValue) -> bool {
    matches!(
        value,
        OpackValue::Str(_) | OpackValue::Bytes(_) | OpackValue::Uuid(_)
    )
}

struct Encoder {
    out: Vec<u8>,
    seen: Vec<OpackValue>,
}

impl Encoder {
    fn emit_pointer(&mut self, index: usize) {
        if index <= 0x20 {
            #[allow(clippy::cast_possible_truncation)]
            self.out.push(0xA0 + index as u8);
        } else if index <= 0xFF {
            self.out.push(0xC1);
            #[allow(clippy::cast_possible_truncation)]
            self.out.push(index as u8);
        } else {
            self.out.push(0xC2);
            let mut buf = [0u8; 2];
            #[allow(clippy::cast_possible_truncation)]
            LittleEndian::write_u16(&mut buf, index as u16);
            self.out.extend_from_slice(&buf);
        }
    }

    fn encode(&mut self, value: &OpackValue) {
        if pointer_eligible(value)
            && let Some(index) = self.seen.iter().position(|seen| seen == value)
        {
            self.emit_pointer(index);
            return;
        }

        match value {
            OpackValue::Bool(true) => self.out.push(0x01),
            OpackValue::Bool(false) => self.out.push(0x02),
            OpackValue::Null => self.out.push(0x04),
            OpackValue::Uuid(uuid) => {
                self.out.push(0x05);
                self.out.extend_from_slice(uuid.as_bytes());
            }
            OpackValue::Int(v) => self.encode_int(*v),
            OpackValue::Float(v) => {
                self.out.push(0x36);
                let mut buf = [0u8; 8];
                LittleEndian::write_f64(&mut buf, *v);
                self.out.extend_from_slice(&buf);
            }
            OpackValue::Str(s) => self.encode_sized(0x40, 0x61, s.as_bytes()),
            OpackValue::Bytes(b) => self.encode_sized(0x70, 0x91, b),
            OpackValue::Array(items) => {
                if items.len() < 15 {
                    #[allow(clippy::cast_possible_truncation)]
                    self.out.push(0xD0 + items.len() as u8);
                    for item in items {
                        self.encode(item);
                    }
                } else {
                    self.out.push(0xDF);
                    for item in items {
                        self.encode(item);
                    }
                    self.out.push(0x03);
                }
            }
            OpackValue::Dict(entries) => {
                if entries.len() < 15 {
                    #[allow(clippy::cast_possible_truncation)]
                    self.out.push(0xE0 + entries.len() as u8);
                    for (key, item) in entries {
                        self.encode(&OpackValue::Str(key.clone()));
                        self.encode(item);
                    }
                } else {
                    self.out.push(0xEF);
                    for (key, item) in entries {
                        self.encode(&OpackValue::Str(key.clone()));
                        self.encode(item);
                    }
                    self.out.push(0x03);
                }
            }
        }

        if pointer_eligible(value) {
            self.seen.push(value.clone());
        }
    }

    fn encode_int(&mut self, v: i64) {
        if (0..=0x27).contains(&v) {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            self.out.push(0x08 + v as u8);
        } else if let Ok(v8) = i8::try_from(v) {
            self.out.push(0x30);
            #[allow(clippy::cast_sign_loss)]
            self.out.push(v8 as u8);
        } else if let Ok(v16) = i16::try_from(v) {
            self.out.push(0x31);
            let mut buf = [0u8; 2];
            #[allow(clippy::cast_sign_loss)]
            LittleEndian::write_u16(&mut buf, v16 as u16);
            self.out.extend_from_slice(&buf);
        } else if let Ok(v32) = i32::try_from(v) {
            self.out.push(0x32);
            let mut buf = [0u8; 4];
            #[allow(clippy::cast_sign_loss)]
            LittleEndian::write_u32(&mut buf, v32 as u32);
            self.out.extend_from_slice(&buf);
        } else {
            self.out.push(0x33);
            let mut buf = [0u8; 8];
            #[allow(clippy::cast_sign_loss)]
            LittleEndian::write_u64(&mut buf, v as u64);
            self.out.extend_from_slice(&buf);
        }
    }

    /// Short form `base + len` for lengths up to 0x20, otherwise sized
    /// forms with 1 to 4 little-endian length bytes.
    fn encode_sized(&mut self, short_base: u8, long_base: u8, data: &[u8]) {
        let len = data.len();
        if len <= 0x20 {
            #[allow(clippy::cast_possible_truncation)]
            self.out.push(short_base + len as u8);
        } else if len <= 0xFF {
            self.out.push(long_base);
            #[allow(clippy::cast_possible_truncation)]
            self.out.push(len as u8);
        } else if len <= 0xFFFF {
            self.out.push(long_base + 1);
            let mut buf = [0u8; 2];
            #[allow(clippy::cast_possible_truncation)]
            LittleEndian::write_u16(&mut buf, len as u16);
            self.out.extend_from_slice(&buf);
        } else if len <= 0xFF_FFFF {
            self.out.push(long_base + 2);
            #[allow(clippy::cast_possible_truncation)]
            self.out
                .extend_from_slice(&[len as u8, (len >> 8) as u8, (len >> 16) as u8]);
        } else {
            self.out.push(long_base + 3);
            let mut buf = [0u8; 4];
            #[allow(clippy::cast_possible_truncation)]
            LittleEndian::write_u32(&mut buf, len as u32);
            self.out.extend_from_slice(&buf);
        }
        self.out.extend_from_slice(data);
    }
}

/// Serialize a value.
#[must_use]
pub fn encode(value: &OpackValue) -> Vec<u8> {
    let mut encoder = Encoder {
        out: Vec::new(),
        seen: Vec::new(),
    };
    encoder.encode(value);
    encoder.out
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    seen: Vec<OpackValue>,
}

impl Decoder<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], OpackError> {
        if self.pos + n > self.data.len() {
            return Err(OpackError::Truncated(self.pos));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, OpackError> {
        Ok(self.take(1)?[0])
    }

    fn remember(&mut self, value: OpackValue) -> OpackValue {
        if pointer_eligible(&value) {
            self.seen.push(value.clone());
        }
        value
    }

    fn decode_sized_len(&mut self, type_byte: u8, long_base: u8) -> Result<usize, OpackError> {
        Ok(match type_byte - long_base {
            0 => usize::from(self.byte()?),
            1 => usize::from(LittleEndian::read_u16(self.take(2)?)),
            2 => {
                let bytes = self.take(3)?;
                usize::from(bytes[0])
                    | (usize::from(bytes[1]) << 8)
                    | (usize::from(bytes[2]) << 16)
            }
            _ => usize::try_from(LittleEndian::read_u32(self.take(4)?))
                .map_err(|_| OpackError::Truncated(self.pos))?,
        })
    }

    /// Returns `None` for the terminator byte (0x03).
    fn decode(&mut self) -> Result<Option<OpackValue>, OpackError> {
        let type_byte = self.byte()?;
        let value = match type_byte {
            0x01 => OpackValue::Bool(true),
            0x02 => OpackValue::Bool(false),
            0x03 => return Ok(None),
            0x04 => OpackValue::Null,
            0x05 => {
                let bytes: [u8; 16] = self
                    .take(16)?
                    .try_into()
                    .map_err(|_| OpackError::Truncated(self.pos))?;
                OpackValue::Uuid(uuid::Uuid::from_bytes(bytes))
            }
            0x08..=0x2F => OpackValue::Int(i64::from(type_byte - 0x08)),
            0x30 => {
                #[allow(clippy::cast_possible_wrap)]
                OpackValue::Int(i64::from(self.byte()? as i8))
            }
            0x31 => {
                #[allow(clippy::cast_possible_wrap)]
                OpackValue::Int(i64::from(LittleEndian::read_u16(self.take(2)?) as i16))
            }
            0x32 => {
                #[allow(clippy::cast_possible_wrap)]
                OpackValue::Int(i64::from(LittleEndian::read_u32(self.take(4)?) as i32))
            }
            0x33 => {
                #[allow(clippy::cast_possible_wrap)]
                OpackValue::Int(LittleEndian::read_u64(self.take(8)?) as i64)
            }
            0x35 => OpackValue::Float(f64::from(LittleEndian::read_f32(self.take(4)?))),
            0x36 => OpackValue::Float(LittleEndian::read_f64(self.take(8)?)),
            0x40..=0x60 => {
                let len = usize::from(type_byte - 0x40);
                let bytes = self.take(len)?;
                OpackValue::Str(
                    String::from_utf8(bytes.to_vec()).map_err(|_| OpackError::InvalidUtf8)?,
                )
            }
            0x61..=0x64 => {
                let len = self.decode_sized_len(type_byte, 0x61)?;
                let bytes = self.take(len)?;
                OpackValue::Str(
                    String::from_utf8(bytes.to_vec()).map_err(|_| OpackError::InvalidUtf8)?,
                )
            }
            0x70..=0x90 => {
                let len = usize::from(type_byte - 0x70);
                OpackValue::Bytes(self.take(len)?.to_vec())
            }
            0x91..=0x94 => {
                let len = self.decode_sized_len(type_byte, 0x91)?;
                OpackValue::Bytes(self.take(len)?.to_vec())
            }
            0xA0..=0xC0 => {
                let index = usize::from(type_byte - 0xA0);
                return self
                    .seen
                    .get(index)
                    .cloned()
                    .map(Some)
                    .ok_or(OpackError::BadPointer(index));
            }
            0xC1 => {
                let index = usize::from(self.byte()?);
                return self
                    .seen
                    .get(index)
                    .cloned()
                    .map(Some)
                    .ok_or(OpackError::BadPointer(index));
            }
            0xC2 => {
                let index = usize::from(LittleEndian::read_u16(self.take(2)?));
                return self
                    .seen
                    .get(index)
                    .cloned()
                    .map(Some)
                    .ok_or(OpackError::BadPointer(index));
            }
            0xD0..=0xDE => {
                let count = usize::from(type_byte - 0xD0);
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(
                        self.decode()?
                            .ok_or(OpackError::UnsupportedType(0x03))?,
                    );
                }
                OpackValue::Array(items)
            }
            0xDF => {
                let mut items = Vec::new();
                while let Some(item) = self.decode()? {
                    items.push(item);
                }
                OpackValue::Array(items)
            }
            0xE0..=0xEE => {
                let count = usize::from(type_byte - 0xE0);
                let mut entries = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = self
                        .decode()?
                        .ok_or(OpackError::UnsupportedType(0x03))?;
                    let OpackValue::Str(key) = key else {
                        return Err(OpackError::NonStringKey);
                    };
                    let value = self
                        .decode()?
                        .ok_or(OpackError::UnsupportedType(0x03))?;
                    entries.push((key, value));
                }
                OpackValue::Dict(entries)
            }
            0xEF => {
                let mut entries = Vec::new();
                loop {
                    let Some(key) = self.decode()? else {
                        break;
                    };
                    let OpackValue::Str(key) = key else {
                        return Err(OpackError::NonStringKey);
                    };
                    let value = self
                        .decode()?
                        .ok_or(OpackError::UnsupportedType(0x03))?;
                    entries.push((key, value));
                }
                OpackValue::Dict(entries)
            }
            other => return Err(OpackError::UnsupportedType(other)),
        };

        Ok(Some(self.remember(value)))
    }
}

/// Deserialize one value.
///
/// # Errors
///
/// Returns [`OpackError`] on malformed input.
pub fn decode(data: &[u8]) -> Result<OpackValue, OpackError> {
    let mut decoder = Decoder {
        data,
        pos: 0,
        seen: Vec::new(),
    };
    decoder
        .decode()?
        .ok_or(OpackError::UnsupportedType(0x03))
}
