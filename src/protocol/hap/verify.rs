//! Pair-Verify: session establishment from stored credentials
//!
//! Four message exchange with ephemeral Curve25519 keys. Completes
//! without PIN entry.

use super::tlv8::{Tlv8Decoder, Tlv8Encoder, TlvType};
use super::{HandshakeState, HandshakeStep, HapError, SessionKeys};
use crate::protocol::crypto::{
    ChaChaCipher, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature, HkdfSha512, Nonce,
    X25519KeyPair, X25519PublicKey,
};
use crate::types::HapCredentials;

/// Pair-Verify handshake driver
pub struct PairVerify {
    state: HandshakeState,
    credentials: HapCredentials,
    ephemeral: X25519KeyPair,
    shared_secret: Option<[u8; 32]>,
}

impl PairVerify {
    /// Create a verification session from stored credentials.
    #[must_use]
    pub fn new(credentials: HapCredentials) -> Self {
        Self {
            state: HandshakeState::Idle,
            credentials,
            ephemeral: X25519KeyPair::generate(),
            shared_secret: None,
        }
    }

    /// Build M1 and enter the handshake.
    ///
    /// # Errors
    ///
    /// Returns an error when the handshake already started.
    pub fn start(&mut self) -> Result<Vec<u8>, HapError> {
        if self.state != HandshakeState::Idle {
            return Err(HapError::InvalidState {
                state: self.state,
                expected: 1,
            });
        }

        let m1 = Tlv8Encoder::new()
            .add_state(1)
            .add(TlvType::PublicKey, self.ephemeral.public_key().as_bytes())
            .build();

        self.state = HandshakeState::M1Sent;
        Ok(m1)
    }

    /// Feed a device message and advance the state machine.
    ///
    /// # Errors
    ///
    /// Fails on out-of-order messages and signature mismatches; any
    /// error destroys the session.
    pub fn handle(&mut self, data: &[u8]) -> Result<HandshakeStep, HapError> {
        let result = match self.state {
            HandshakeState::M1Sent => self.on_m2(data),
            HandshakeState::M3Sent => self.on_m4(data),
            state => Err(HapError::InvalidState {
                state,
                expected: 0,
            }),
        };
        if result.is_err() {
            self.state = HandshakeState::Failed;
        }
        result
    }

    fn on_m2(&mut self, data: &[u8]) -> Result<HandshakeStep, HapError> {
        let tlv = Tlv8Decoder::decode(data)?;
        if let Some(code) = tlv.get_error() {
            return Err(HapError::from_device(code, tlv.get_retry_delay()));
        }
        if tlv.get_state()? != 2 {
            return Err(HapError::InvalidState {
                state: self.state,
                expected: 2,
            });
        }

        let device_ephemeral_bytes = tlv.get_required(TlvType::PublicKey)?;
        let encrypted = tlv.get_required(TlvType::EncryptedData)?;

        let device_ephemeral = X25519PublicKey::from_bytes(device_ephemeral_bytes)?;
        let shared = self.ephemeral.diffie_hellman(&device_ephemeral);

        let session_key = HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), shared.as_bytes())
            .expand_fixed::<32>(b"Pair-Verify-Encrypt-Info")?;
        let cipher = ChaChaCipher::new(&session_key)?;
        let decrypted = cipher.decrypt(&Nonce::from_label(b"PV-Msg02"), encrypted)?;

        // Device signs device_ephemeral || our_ephemeral with its LTPK
        let device_tlv = Tlv8Decoder::decode(&decrypted)?;
        let device_signature = device_tlv.get_required(TlvType::Signature)?;

        let mut verify_data =
            Vec::with_capacity(device_ephemeral_bytes.len() + 32);
        verify_data.extend_from_slice(device_ephemeral_bytes);
        verify_data.extend_from_slice(self.ephemeral.public_key().as_bytes());

        let device_ltpk = Ed25519PublicKey::from_bytes(&self.credentials.peer_pk)?;
        let signature = Ed25519Signature::from_bytes(device_signature)?;
        device_ltpk
            .verify(&verify_data, &signature)
            .map_err(|_| HapError::SignatureVerificationFailed)?;

        // We sign our_ephemeral || device_ephemeral with our LTSK
        let mut sign_data = Vec::with_capacity(64);
        sign_data.extend_from_slice(self.ephemeral.public_key().as_bytes());
        sign_data.extend_from_slice(device_ephemeral_bytes);

        let keypair = Ed25519KeyPair::from_bytes(&self.credentials.ltsk)?;
        let our_signature = keypair.sign(&sign_data);

        let inner = Tlv8Encoder::new()
            .add(TlvType::Identifier, &self.credentials.pair_id)
            .add(TlvType::Signature, &our_signature.to_bytes())
            .build();
        let encrypted = cipher.encrypt(&Nonce::from_label(b"PV-Msg03"), &inner)?;

        let m3 = Tlv8Encoder::new()
            .add_state(3)
            .add(TlvType::EncryptedData, &encrypted)
            .build();

        self.shared_secret = Some(*shared.as_bytes());
        self.state = HandshakeState::M3Sent;
        Ok(HandshakeStep::Send(m3))
    }

    fn on_m4(&mut self, data: &[u8]) -> Result<HandshakeStep, HapError> {
        let tlv = Tlv8Decoder::decode(data)?;
        if let Some(code) = tlv.get_error() {
            return Err(HapError::from_device(code, tlv.get_retry_delay()));
        }
        if tlv.get_state()? != 4 {
            return Err(HapError::InvalidState {
                state: self.state,
                expected: 4,
            });
        }

        let shared = self.shared_secret.ok_or(HapError::InvalidState {
            state: self.state,
            expected: 4,
        })?;

        let hkdf = HkdfSha512::new(Some(b"Control-Salt"), &shared);
        let keys = SessionKeys {
            output_key: hkdf.expand_fixed::<32>(b"Control-Write-Encryption-Key")?,
            input_key: hkdf.expand_fixed::<32>(b"Control-Read-Encryption-Key")?,
            shared_secret: shared,
        };

        self.state = HandshakeState::Established;
        Ok(HandshakeStep::Done(keys))
    }
}
