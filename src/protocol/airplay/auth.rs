//! Legacy AirPlay device authentication
//!
//! The proprietary pre-HAP handshake: an Ed25519 identity fixed at
//! pairing time, an X25519 exchange per session and an AES-128-CTR
//! encrypted signature proving key ownership. Produces and consumes
//! `identifier:private_key` credentials.

use crate::error::{AtvError, Result};
use crate::net::{HttpConnection, HttpRequest};
use crate::protocol::crypto::{
    Ed25519KeyPair, LegacyCipher, X25519KeyPair, X25519PublicKey,
};
use crate::types::LegacyCredentials;
use sha2::{Digest, Sha512};

/// Generate fresh legacy credentials (an 8-byte identifier and an
/// Ed25519 private key).
#[must_use]
pub fn new_credentials() -> LegacyCredentials {
    LegacyCredentials {
        identifier: rand::random(),
        private_key: Ed25519KeyPair::generate().secret_bytes(),
    }
}

/// Derive the AES key/IV pair for the verify exchange from the X25519
/// shared secret.
fn session_cipher(shared: &[u8; 32]) -> Result<LegacyCipher> {
    let mut key_hasher = Sha512::new();
    key_hasher.update(b"Pair-Verify-AES-Key");
    key_hasher.update(shared);
    let key = key_hasher.finalize();

    let mut iv_hasher = Sha512::new();
    iv_hasher.update(b"Pair-Verify-AES-IV");
    iv_hasher.update(shared);
    let iv = iv_hasher.finalize();

    LegacyCipher::new(&key[..16], &iv[..16]).map_err(AtvError::from)
}

/// Runs the two-step verify exchange over an AirPlay HTTP connection.
pub struct LegacyVerifier {
    credentials: LegacyCredentials,
}

impl LegacyVerifier {
    /// Create a verifier from stored credentials.
    #[must_use]
    pub fn new(credentials: LegacyCredentials) -> Self {
        Self { credentials }
    }

    /// Run `/pair-verify` against the device.
    ///
    /// # Errors
    ///
    /// Fails with [`AtvError::DeviceAuthRequired`] when the device
    /// rejects the identity.
    pub async fn verify(&self, connection: &mut HttpConnection) -> Result<()> {
        let signing = Ed25519KeyPair::from_bytes(&self.credentials.private_key)?;
        let ephemeral = X25519KeyPair::generate();

        // Step 1: flag byte, our ephemeral key, our identity key
        let mut body = Vec::with_capacity(4 + 32 + 32);
        body.extend_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        body.extend_from_slice(ephemeral.public_key().as_bytes());
        body.extend_from_slice(signing.public_key().as_bytes());

        let request = HttpRequest::http("POST", "/pair-verify")
            .with_header("Content-Type", "application/octet-stream")
            .with_header("X-Apple-Device-ID", hex::encode(self.credentials.identifier))
            .with_body(body);
        let response = connection.send(&request).await?;
        if !response.is_ok() {
            return Err(AtvError::DeviceAuthRequired);
        }
        if response.body.len() < 32 {
            return Err(AtvError::Protocol("short pair-verify response".to_string()));
        }

        // Device answers with its ephemeral key and an encrypted blob
        let device_public = X25519PublicKey::from_bytes(&response.body[..32])?;
        let shared = ephemeral.diffie_hellman(&device_public);
        let mut cipher = session_cipher(shared.as_bytes())?;

        // The device's portion advances the keystream before ours
        let mut device_blob = response.body[32..].to_vec();
        cipher.apply_keystream(&mut device_blob);

        // Step 2: signature over both ephemeral keys, encrypted
        let mut signed = Vec::with_capacity(64);
        signed.extend_from_slice(ephemeral.public_key().as_bytes());
        signed.extend_from_slice(device_public.as_bytes());
        let mut signature = signing.sign(&signed).to_bytes().to_vec();
        cipher.apply_keystream(&mut signature);

        let mut body = Vec::with_capacity(4 + signature.len());
        body.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        body.extend_from_slice(&signature);

        let request = HttpRequest::http("POST", "/pair-verify")
            .with_header("Content-Type", "application/octet-stream")
            .with_body(body);
        let response = connection.send(&request).await?;
        if !response.is_ok() {
            return Err(AtvError::DeviceAuthRequired);
        }
        Ok(())
    }
}
