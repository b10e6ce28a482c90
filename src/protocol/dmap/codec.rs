//! DMAP tag/length/value codec
//!
//! Stream of 4-byte ASCII tag, 4-byte big-endian length and payload.
//! Containers recurse; duplicate tags are preserved in order. Unknown
//! tags are skipped by length and logged once at debug level.

use super::tags::{TagKind, lookup};
use byteorder::{BigEndian, ByteOrder};
use std::collections::HashSet;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

/// DMAP codec errors
#[derive(Debug, Error)]
pub enum DmapError {
    #[error("malformed frame: length {length} exceeds remaining {remaining} bytes")]
    MalformedFrame { length: usize, remaining: usize },

    #[error("truncated tag header at offset {0}")]
    TruncatedHeader(usize),

    #[error("invalid integer width {0}")]
    BadIntegerWidth(usize),
}

/// A decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmapValue {
    /// Nested items, order preserved
    Container(Vec<DmapItem>),
    /// Unsigned integer of dictionary-defined width
    UInt(u64),
    /// UTF-8 string
    Str(String),
    /// Boolean
    Bool(bool),
    /// Opaque bytes
    Raw(Vec<u8>),
}

/// One decoded tag with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmapItem {
    /// Four-character tag
    pub tag: [u8; 4],
    /// Decoded value
    pub value: DmapValue,
}

impl DmapItem {
    /// Build an item.
    #[must_use]
    pub fn new(tag: &[u8; 4], value: DmapValue) -> Self {
        Self { tag: *tag, value }
    }
}

static WARNED_TAGS: Mutex<Option<HashSet<[u8; 4]>>> = Mutex::new(None);

fn warn_unknown_once(tag: [u8; 4]) {
    let mut guard = WARNED_TAGS.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    let warned = guard.get_or_insert_with(HashSet::new);
    if warned.insert(tag) {
        debug!("unknown DMAP tag {}", String::from_utf8_lossy(&tag));
    }
}

fn decode_uint(payload: &[u8]) -> Result<u64, DmapError> {
    Ok(match payload.len() {
        1 => u64::from(payload[0]),
        2 => u64::from(BigEndian::read_u16(payload)),
        4 => u64::from(BigEndian::read_u32(payload)),
        8 => BigEndian::read_u64(payload),
        other => return Err(DmapError::BadIntegerWidth(other)),
    })
}

/// Decode a DMAP blob into items.
///
/// # Errors
///
/// Returns [`DmapError::MalformedFrame`] when a declared length
/// overruns the buffer.
pub fn decode(data: &[u8]) -> Result<Vec<DmapItem>, DmapError> {
    let mut items = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if pos + 8 > data.len() {
            return Err(DmapError::TruncatedHeader(pos));
        }
        let tag: [u8; 4] = data[pos..pos + 4].try_into().unwrap_or([0; 4]);
        let length = BigEndian::read_u32(&data[pos + 4..pos + 8]) as usize;
        pos += 8;

        if length > data.len() - pos {
            return Err(DmapError::MalformedFrame {
                length,
                remaining: data.len() - pos,
            });
        }
        let payload = &data[pos..pos + length];
        pos += length;

        let Some(def) = lookup(&tag) else {
            warn_unknown_once(tag);
            continue;
        };

        let value = match def.kind {
            TagKind::Container => DmapValue::Container(decode(payload)?),
            TagKind::U8 | TagKind::U16 | TagKind::U32 | TagKind::U64 => {
                DmapValue::UInt(decode_uint(payload)?)
            }
            TagKind::Str => DmapValue::Str(String::from_utf8_lossy(payload).into_owned()),
            TagKind::Bool => DmapValue::Bool(payload.first().copied().unwrap_or(0) != 0),
            TagKind::Raw => DmapValue::Raw(payload.to_vec()),
            TagKind::Ignore => continue,
        };
        items.push(DmapItem { tag, value });
    }

    Ok(items)
}

/// Width comes from the dictionary so re-encoding is byte-exact.
#[allow(clippy::cast_possible_truncation)]
fn encode_uint(value: u64, kind: TagKind, out: &mut Vec<u8>) {
    match kind {
        TagKind::U8 => out.push(value as u8),
        TagKind::U16 => out.extend_from_slice(&(value as u16).to_be_bytes()),
        TagKind::U32 => out.extend_from_slice(&(value as u32).to_be_bytes()),
        TagKind::U64 => out.extend_from_slice(&value.to_be_bytes()),
        _ => {}
    }
}

fn encode_into(items: &[DmapItem], out: &mut Vec<u8>) {
    for item in items {
        out.extend_from_slice(&item.tag);
        let len_pos = out.len();
        out.extend_from_slice(&[0u8; 4]);

        let kind = lookup(&item.tag).map(|d| d.kind);
        match (&item.value, kind) {
            (DmapValue::Container(children), _) => encode_into(children, out),
            (DmapValue::UInt(value), Some(kind)) => encode_uint(*value, kind, out),
            (DmapValue::UInt(value), None) => out.extend_from_slice(&value.to_be_bytes()),
            (DmapValue::Str(s), _) => out.extend_from_slice(s.as_bytes()),
            (DmapValue::Bool(b), _) => out.push(u8::from(*b)),
            (DmapValue::Raw(bytes), _) => out.extend_from_slice(bytes),
        }

        let length = out.len() - len_pos - 4;
        #[allow(clippy::cast_possible_truncation)]
        BigEndian::write_u32(&mut out[len_pos..len_pos + 4], length as u32);
    }
}

/// Encode items back into a DMAP blob.
///
/// For blobs consisting of known tags, `encode(decode(b)) == b`.
#[must_use]
pub fn encode(items: &[DmapItem]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(items, &mut out);
    out
}

/// Find the first value at a tag path, descending through containers.
#[must_use]
pub fn first<'a>(items: &'a [DmapItem], path: &[&[u8; 4]]) -> Option<&'a DmapValue> {
    let (head, rest) = path.split_first()?;
    let item = items.iter().find(|i| &&i.tag == head)?;
    if rest.is_empty() {
        return Some(&item.value);
    }
    match &item.value {
        DmapValue::Container(children) => first(children, rest),
        _ => None,
    }
}

/// Convenience accessors over a decoded tree.
pub trait DmapLookup {
    /// Integer at path.
    fn uint_at(&self, path: &[&[u8; 4]]) -> Option<u64>;
    /// String at path.
    fn str_at(&self, path: &[&[u8; 4]]) -> Option<&str>;
}

impl DmapLookup for [DmapItem] {
    fn uint_at(&self, path: &[&[u8; 4]]) -> Option<u64> {
        match first(self, path)? {
            DmapValue::UInt(v) => Some(*v),
            DmapValue::Bool(b) => Some(u64::from(*b)),
            _ => None,
        }
    }

    fn str_at(&self, path: &[&[u8; 4]]) -> Option<&str> {
        match first(self, path)? {
            DmapValue::Str(s) => Some(s),
            _ => None,
        }
    }
}
