//! TLV8 framing: one-byte type, one-byte length, value
//!
//! Values longer than 255 bytes are split across repeated entries of the
//! same type; the decoder coalesces them in order.

use std::collections::HashMap;
use thiserror::Error;

/// TLV type codes used by the pairing protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvType {
    /// Pairing method
    Method = 0x00,
    /// Pairing identifier
    Identifier = 0x01,
    /// SRP salt
    Salt = 0x02,
    /// Public key (SRP A/B or Curve25519)
    PublicKey = 0x03,
    /// SRP proof
    Proof = 0x04,
    /// Encrypted sub-TLV
    EncryptedData = 0x05,
    /// Handshake sequence number
    State = 0x06,
    /// Error code
    Error = 0x07,
    /// Suggested retry delay in seconds
    RetryDelay = 0x08,
    /// Certificate
    Certificate = 0x09,
    /// Ed25519 signature
    Signature = 0x0A,
    /// Permissions
    Permissions = 0x0B,
    /// Fragment data
    FragmentData = 0x0C,
    /// Last fragment
    FragmentLast = 0x0D,
    /// Session id
    SessionId = 0x0E,
    /// Pairing flags (bit 4 = transient)
    Flags = 0x13,
    /// Separator between items
    Separator = 0xFF,
}

/// TLV8 framing errors
#[derive(Debug, Error)]
pub enum TlvError {
    #[error("truncated TLV entry")]
    Truncated,

    #[error("missing required field {0:?}")]
    MissingField(TlvType),

    #[error("invalid value for field {0:?}")]
    InvalidValue(TlvType),
}

/// Builder-style TLV8 encoder
#[derive(Default)]
pub struct Tlv8Encoder {
    buffer: Vec<u8>,
}

impl Tlv8Encoder {
    /// Create an empty encoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, fragmenting values longer than 255 bytes.
    #[must_use]
    pub fn add(mut self, tlv_type: TlvType, value: &[u8]) -> Self {
        if value.is_empty() {
            self.buffer.push(tlv_type as u8);
            self.buffer.push(0);
            return self;
        }
        for chunk in value.chunks(255) {
            self.buffer.push(tlv_type as u8);
            #[allow(clippy::cast_possible_truncation)]
            self.buffer.push(chunk.len() as u8);
            self.buffer.extend_from_slice(chunk);
        }
        self
    }

    /// Add a single-byte entry.
    #[must_use]
    pub fn add_byte(self, tlv_type: TlvType, value: u8) -> Self {
        self.add(tlv_type, &[value])
    }

    /// Add the handshake state entry.
    #[must_use]
    pub fn add_state(self, state: u8) -> Self {
        self.add_byte(TlvType::State, state)
    }

    /// Finish and return the encoded bytes.
    #[must_use]
    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// TLV8 decoder with fragment coalescing
pub struct Tlv8Decoder {
    items: HashMap<u8, Vec<u8>>,
}

impl Tlv8Decoder {
    /// Decode a TLV8 blob.
    ///
    /// # Errors
    ///
    /// Returns [`TlvError::Truncated`] when an entry overruns the buffer.
    pub fn decode(data: &[u8]) -> Result<Self, TlvError> {
        let mut items: HashMap<u8, Vec<u8>> = HashMap::new();
        let mut pos = 0;

        while pos < data.len() {
            if pos + 2 > data.len() {
                return Err(TlvError::Truncated);
            }
            let tlv_type = data[pos];
            let length = data[pos + 1] as usize;
            pos += 2;

            if pos + length > data.len() {
                return Err(TlvError::Truncated);
            }
            items
                .entry(tlv_type)
                .or_default()
                .extend_from_slice(&data[pos..pos + length]);
            pos += length;
        }

        Ok(Self { items })
    }

    /// Get a value by type.
    #[must_use]
    pub fn get(&self, tlv_type: TlvType) -> Option<&[u8]> {
        self.items.get(&(tlv_type as u8)).map(Vec::as_slice)
    }

    /// Get a required value.
    ///
    /// # Errors
    ///
    /// Returns [`TlvError::MissingField`] when absent.
    pub fn get_required(&self, tlv_type: TlvType) -> Result<&[u8], TlvError> {
        self.get(tlv_type).ok_or(TlvError::MissingField(tlv_type))
    }

    /// Get the handshake state byte.
    ///
    /// # Errors
    ///
    /// Returns an error when missing or not exactly one byte.
    pub fn get_state(&self) -> Result<u8, TlvError> {
        let value = self.get_required(TlvType::State)?;
        if value.len() != 1 {
            return Err(TlvError::InvalidValue(TlvType::State));
        }
        Ok(value[0])
    }

    /// Device error code, when present.
    #[must_use]
    pub fn get_error(&self) -> Option<u8> {
        self.get(TlvType::Error).and_then(|v| v.first().copied())
    }

    /// Suggested retry delay, when present.
    #[must_use]
    pub fn get_retry_delay(&self) -> Option<std::time::Duration> {
        let value = self.get(TlvType::RetryDelay)?;
        let seconds = match value.len() {
            1 => u64::from(value[0]),
            2 => u64::from(u16::from_le_bytes([value[0], value[1]])),
            4 => u64::from(u32::from_le_bytes([value[0], value[1], value[2], value[3]])),
            _ => return None,
        };
        Some(std::time::Duration::from_secs(seconds))
    }
}
