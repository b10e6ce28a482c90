//! Varint length-prefixed frame codec

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Frame codec errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("varint longer than 10 bytes")]
    VarintOverflow,

    #[error("frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

const MAX_FRAME: usize = 4 * 1024 * 1024;

/// Write a protobuf varint.
pub fn write_varint(mut value: u64, out: &mut BytesMut) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.put_u8(byte);
            return;
        }
        out.put_u8(byte | 0x80);
    }
}

/// Try to read a varint from the front of `buf` without consuming.
///
/// Returns the value and its encoded width, or `None` when incomplete.
///
/// # Errors
///
/// Returns [`FrameError::VarintOverflow`] for malformed prefixes.
pub fn peek_varint(buf: &[u8]) -> Result<Option<(u64, usize)>, FrameError> {
    let mut value: u64 = 0;
    for (index, byte) in buf.iter().enumerate() {
        if index >= 10 {
            return Err(FrameError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7F) << (7 * index);
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
    }
    Ok(None)
}

/// Codec turning a byte stream into variable-length frames.
#[derive(Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((length, width)) = peek_varint(src)? else {
            return Ok(None);
        };
        let length = usize::try_from(length).map_err(|_| FrameError::FrameTooLarge(usize::MAX))?;
        if length > MAX_FRAME {
            return Err(FrameError::FrameTooLarge(length));
        }
        if src.len() < width + length {
            return Ok(None);
        }
        src.advance(width);
        Ok(Some(src.split_to(length).to_vec()))
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &[u8], dst: &mut BytesMut) -> Result<(), Self::Error> {
        write_varint(item.len() as u64, dst);
        dst.extend_from_slice(item);
        Ok(())
    }
}
