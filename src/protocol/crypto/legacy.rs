use super::CryptoError;
use aes::Aes128;
use aes::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

/// AES-128-CTR cipher used by the proprietary legacy AirPlay pairing
/// handshake.
pub struct LegacyCipher {
    cipher: Ctr128BE<Aes128>,
}

impl LegacyCipher {
    /// Create with a 16-byte key and 16-byte IV.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let cipher = Ctr128BE::<Aes128>::new_from_slices(key, iv).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: 16,
                actual: key.len().max(iv.len()),
            }
        })?;
        Ok(Self { cipher })
    }

    /// XOR data with the keystream in place (encrypt == decrypt).
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }
}
