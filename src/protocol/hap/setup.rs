//! Pair-Setup: PIN-based pairing using SRP-6a
//!
//! Five message exchange producing persistent credentials, or a
//! transient variant that derives session keys straight from the SRP
//! secret without persisting anything.

use super::tlv8::{Tlv8Decoder, Tlv8Encoder, TlvType};
use super::{HandshakeState, HandshakeStep, HapError, SessionKeys, methods};
use crate::protocol::crypto::{
    ChaChaCipher, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature, HkdfSha512, Nonce,
    SrpClient, SrpVerifier,
};
use crate::types::HapCredentials;

const FLAG_TRANSIENT: u8 = 0x10;

/// Pair-Setup handshake driver
pub struct PairSetup {
    state: HandshakeState,
    pin: Option<String>,
    transient: bool,
    keypair: Ed25519KeyPair,
    pair_id: Vec<u8>,
    verifier: Option<SrpVerifier>,
    srp_key: Option<Vec<u8>>,
    credentials: Option<HapCredentials>,
}

impl PairSetup {
    /// Create a persistent Pair-Setup session with a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: HandshakeState::Idle,
            pin: None,
            transient: false,
            keypair: Ed25519KeyPair::generate(),
            pair_id: uuid::Uuid::new_v4().to_string().into_bytes(),
            verifier: None,
            srp_key: None,
            credentials: None,
        }
    }

    /// Create a transient session (AirPlay 2 style): session keys are
    /// derived from the SRP secret and no credentials are produced.
    #[must_use]
    pub fn transient() -> Self {
        let mut setup = Self::new();
        setup.transient = true;
        // Transient receivers use a fixed well-known PIN
        setup.pin = Some("3939".to_string());
        setup
    }

    /// Supply the PIN shown on the device.
    pub fn set_pin(&mut self, pin: &str) {
        self.pin = Some(pin.to_string());
    }

    /// Credentials produced after a successful persistent handshake.
    #[must_use]
    pub fn credentials(&self) -> Option<&HapCredentials> {
        self.credentials.as_ref()
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

        let mut encoder = Tlv8Encoder::new()
            .add_state(1)
            .add_byte(TlvType::Method, methods::PAIR_SETUP);
        if self.transient {
            encoder = encoder.add_byte(TlvType::Flags, FLAG_TRANSIENT);
        }

        self.state = HandshakeState::M1Sent;
        Ok(encoder.build())
    }

    /// Feed a device message and advance the state machine.
    ///
    /// # Errors
    ///
    /// Fails on out-of-order messages, device-reported errors (wrong
    /// PIN surfaces as [`HapError::BadPin`] at M4) and crypto failures.
    /// Any error destroys the session.
    pub fn handle(&mut self, data: &[u8]) -> Result<HandshakeStep, HapError> {
        let result = match self.state {
            HandshakeState::M1Sent => self.on_m2(data),
            HandshakeState::M3Sent => self.on_m4(data),
            HandshakeState::M5Sent => self.on_m6(data),
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

    fn check_message(tlv: &Tlv8Decoder, expected: u8) -> Result<(), HapError> {
        if let Some(code) = tlv.get_error() {
            return Err(HapError::from_device(code, tlv.get_retry_delay()));
        }
        let state = tlv.get_state()?;
        if state != expected {
            return Err(HapError::InvalidState {
                state: HandshakeState::Failed,
                expected,
            });
        }
        Ok(())
    }

    /// M2 carries salt and the server SRP public key; answer with M3.
    fn on_m2(&mut self, data: &[u8]) -> Result<HandshakeStep, HapError> {
        let tlv = Tlv8Decoder::decode(data)?;
        Self::check_message(&tlv, 2)?;

        let salt = tlv.get_required(TlvType::Salt)?;
        let server_public = tlv.get_required(TlvType::PublicKey)?;
        let pin = self.pin.as_ref().ok_or(HapError::PinRequired)?;

        let srp = SrpClient::new()?;
        let client_public = srp.public_key().to_vec();
        let verifier =
            srp.process_challenge(b"Pair-Setup", pin.as_bytes(), salt, server_public)?;

        let m3 = Tlv8Encoder::new()
            .add_state(3)
            .add(TlvType::PublicKey, &client_public)
            .add(TlvType::Proof, verifier.client_proof())
            .build();

        self.verifier = Some(verifier);
        self.state = HandshakeState::M3Sent;
        Ok(HandshakeStep::Send(m3))
    }

    /// M4 carries the server proof. For transient mode the handshake
    /// ends here; otherwise answer with M5 (encrypted identity).
    fn on_m4(&mut self, data: &[u8]) -> Result<HandshakeStep, HapError> {
        let tlv = Tlv8Decoder::decode(data)?;
        Self::check_message(&tlv, 4)?;

        let server_proof = tlv.get_required(TlvType::Proof)?;
        let verifier = self.verifier.as_ref().ok_or(HapError::InvalidState {
            state: self.state,
            expected: 4,
        })?;
        let srp_key = verifier
            .verify_server(server_proof)
            .map_err(|_| HapError::BadPin)?
            .as_bytes()
            .to_vec();

        if self.transient {
            let keys = Self::derive_session_keys(&srp_key)?;
            self.state = HandshakeState::Established;
            return Ok(HandshakeStep::Done(keys));
        }

        // Sign HKDF(controller-sign) || pair_id || ltpk
        let hkdf = HkdfSha512::new(Some(b"Pair-Setup-Controller-Sign-Salt"), &srp_key);
        let mut sign_data = hkdf.expand(b"Pair-Setup-Controller-Sign-Info", 32)?;
        sign_data.extend_from_slice(&self.pair_id);
        sign_data.extend_from_slice(self.keypair.public_key().as_bytes());
        let signature = self.keypair.sign(&sign_data);

        let identity = Tlv8Encoder::new()
            .add(TlvType::Identifier, &self.pair_id)
            .add(TlvType::PublicKey, self.keypair.public_key().as_bytes())
            .add(TlvType::Signature, &signature.to_bytes())
            .build();

        let encrypt_key = HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), &srp_key)
            .expand_fixed::<32>(b"Pair-Setup-Encrypt-Info")?;
        let cipher = ChaChaCipher::new(&encrypt_key)?;
        let encrypted = cipher.encrypt(&Nonce::from_label(b"PS-Msg05"), &identity)?;

        let m5 = Tlv8Encoder::new()
            .add_state(5)
            .add(TlvType::EncryptedData, &encrypted)
            .build();

        self.srp_key = Some(srp_key);
        self.state = HandshakeState::M5Sent;
        Ok(HandshakeStep::Send(m5))
    }

    /// M6 carries the encrypted device identity; verify it and derive
    /// session keys plus persistent credentials.
    fn on_m6(&mut self, data: &[u8]) -> Result<HandshakeStep, HapError> {
        let tlv = Tlv8Decoder::decode(data)?;
        Self::check_message(&tlv, 6)?;

        let encrypted = tlv.get_required(TlvType::EncryptedData)?;
        let srp_key = self.srp_key.as_ref().ok_or(HapError::InvalidState {
            state: self.state,
            expected: 6,
        })?;

        let decrypt_key = HkdfSha512::new(Some(b"Pair-Setup-Encrypt-Salt"), srp_key)
            .expand_fixed::<32>(b"Pair-Setup-Encrypt-Info")?;
        let cipher = ChaChaCipher::new(&decrypt_key)?;
        let decrypted = cipher.decrypt(&Nonce::from_label(b"PS-Msg06"), encrypted)?;

        let device_tlv = Tlv8Decoder::decode(&decrypted)?;
        let device_ltpk = device_tlv.get_required(TlvType::PublicKey)?;
        let device_id = device_tlv.get_required(TlvType::Identifier)?;
        let device_signature = device_tlv.get_required(TlvType::Signature)?;

        // Verify accessory signature over HKDF(accessory-sign) || id || ltpk
        let hkdf = HkdfSha512::new(Some(b"Pair-Setup-Accessory-Sign-Salt"), srp_key);
        let mut signed_data = hkdf.expand(b"Pair-Setup-Accessory-Sign-Info", 32)?;
        signed_data.extend_from_slice(device_id);
        signed_data.extend_from_slice(device_ltpk);

        let public_key = Ed25519PublicKey::from_bytes(device_ltpk)?;
        let signature = Ed25519Signature::from_bytes(device_signature)?;
        public_key
            .verify(&signed_data, &signature)
            .map_err(|_| HapError::SignatureVerificationFailed)?;

        let peer_pk: [u8; 32] = device_ltpk
            .try_into()
            .map_err(|_| HapError::SignatureVerificationFailed)?;
        self.credentials = Some(HapCredentials {
            ltpk: *self.keypair.public_key().as_bytes(),
            ltsk: self.keypair.secret_bytes(),
            pair_id: self.pair_id.clone(),
            peer_pk,
        });

        let keys = Self::derive_session_keys(srp_key)?;
        self.state = HandshakeState::Established;
        Ok(HandshakeStep::Done(keys))
    }

    fn derive_session_keys(shared: &[u8]) -> Result<SessionKeys, HapError> {
        let hkdf = HkdfSha512::new(Some(b"Control-Salt"), shared);
        let output_key = hkdf.expand_fixed::<32>(b"Control-Write-Encryption-Key")?;
        let input_key = hkdf.expand_fixed::<32>(b"Control-Read-Encryption-Key")?;

        let mut shared_secret = [0u8; 32];
        let len = shared.len().min(32);
        shared_secret[..len].copy_from_slice(&shared[..len]);

        Ok(SessionKeys {
            output_key,
            input_key,
            shared_secret,
        })
    }
}

impl Default for PairSetup {
    fn default() -> Self {
        Self::new()
    }
}
