//! Encrypted HAP session channel
//!
//! Wraps one TCP connection after pairing: outgoing writes are split
//! into blocks of at most 1024 bytes, each encrypted with a per-block
//! nonce counter and authenticated against its 2-byte little-endian
//! length header. Incoming bytes are buffered and decrypted
//! symmetrically.

use super::SessionKeys;
use crate::protocol::crypto::{ChaChaCipher, CryptoError, Nonce};
use byteorder::{ByteOrder, LittleEndian};
use bytes::{Buf, BytesMut};

const MAX_BLOCK: usize = 1024;
const TAG_LEN: usize = 16;

/// Keyed state for one encrypted connection.
///
/// Single-owner; nonce counters only move forward and the session dies
/// with its socket.
pub struct HapSession {
    output_cipher: ChaChaCipher,
    input_cipher: ChaChaCipher,
    output_nonce: u64,
    input_nonce: u64,
    incoming: BytesMut,
}

impl HapSession {
    /// Create a session from handshake keys.
    pub fn new(keys: &SessionKeys) -> Result<Self, CryptoError> {
        Ok(Self {
            output_cipher: ChaChaCipher::new(&keys.output_key)?,
            input_cipher: ChaChaCipher::new(&keys.input_key)?,
            output_nonce: 0,
            input_nonce: 0,
            incoming: BytesMut::new(),
        })
    }

    /// Number of blocks encrypted so far.
    #[must_use]
    pub fn output_nonce(&self) -> u64 {
        self.output_nonce
    }

    /// Encrypt an outgoing byte stream into length-prefixed blocks.
    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut output =
            Vec::with_capacity(data.len() + (data.len() / MAX_BLOCK + 1) * (2 + TAG_LEN));

        for chunk in data.chunks(MAX_BLOCK) {
            let mut header = [0u8; 2];
            #[allow(clippy::cast_possible_truncation)]
            LittleEndian::write_u16(&mut header, chunk.len() as u16);

            let nonce = Nonce::from_counter(self.output_nonce);
            let sealed = self.output_cipher.encrypt_with_aad(&nonce, &header, chunk)?;
            self.output_nonce += 1;

            output.extend_from_slice(&header);
            output.extend_from_slice(&sealed);
        }

        Ok(output)
    }

    /// Feed incoming bytes and decrypt every complete block.
    ///
    /// Partial blocks are retained until more data arrives, so this can
    /// be called with arbitrary TCP segment boundaries.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.incoming.extend_from_slice(data);
        let mut plaintext = Vec::new();

        loop {
            if self.incoming.len() < 2 {
                break;
            }
            let block_len = LittleEndian::read_u16(&self.incoming[..2]) as usize;
            let total = 2 + block_len + TAG_LEN;
            if self.incoming.len() < total {
                break;
            }

            let header = [self.incoming[0], self.incoming[1]];
            let nonce = Nonce::from_counter(self.input_nonce);
            let opened = self.input_cipher.decrypt_with_aad(
                &nonce,
                &header,
                &self.incoming[2..total],
            )?;
            self.input_nonce += 1;

            plaintext.extend_from_slice(&opened);
            self.incoming.advance(total);
        }

        Ok(plaintext)
    }
}
