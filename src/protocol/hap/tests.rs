use super::session::HapSession;
use super::setup::PairSetup;
use super::tlv8::{Tlv8Decoder, Tlv8Encoder, TlvError, TlvType};
use super::verify::PairVerify;
use super::{HandshakeStep, HapError, SessionKeys, error_codes};
use crate::protocol::crypto::{
    ChaChaCipher, Ed25519KeyPair, Ed25519Signature, HkdfSha512, Nonce, X25519KeyPair,
    X25519PublicKey,
};
use crate::types::HapCredentials;
use std::time::Duration;

#[test]
fn tlv8_encode_decode_simple() {
    let encoded = Tlv8Encoder::new()
        .add_state(1)
        .add_byte(TlvType::Method, 0)
        .build();
    assert_eq!(encoded, vec![0x06, 0x01, 0x01, 0x00, 0x01, 0x00]);

    let decoded = Tlv8Decoder::decode(&encoded).unwrap();
    assert_eq!(decoded.get_state().unwrap(), 1);
    assert_eq!(decoded.get(TlvType::Method), Some(&[0u8][..]));
}

#[test]
fn tlv8_fragments_long_values() {
    let long = vec![0xAB; 600];
    let encoded = Tlv8Encoder::new().add(TlvType::PublicKey, &long).build();

    // 255 + 255 + 90 data bytes, each fragment with a 2-byte header
    assert_eq!(encoded.len(), 600 + 3 * 2);
    assert_eq!(encoded[1], 255);

    let decoded = Tlv8Decoder::decode(&encoded).unwrap();
    assert_eq!(decoded.get(TlvType::PublicKey).unwrap(), &long[..]);
}

#[test]
fn tlv8_truncated_entry_fails() {
    assert!(matches!(
        Tlv8Decoder::decode(&[0x06, 0x05, 0x01]),
        Err(TlvError::Truncated)
    ));
}

#[test]
fn setup_rejects_out_of_order_message() {
    let mut setup = PairSetup::new();
    setup.set_pin("1234");
    // M2 fed before start()
    let m2 = Tlv8Encoder::new().add_state(2).build();
    assert!(matches!(
        setup.handle(&m2),
        Err(HapError::InvalidState { .. })
    ));
}

#[test]
fn setup_maps_authentication_error_to_bad_pin() {
    let mut setup = PairSetup::new();
    setup.set_pin("1234");
    let _m1 = setup.start().unwrap();

    let m2 = Tlv8Encoder::new()
        .add_state(2)
        .add_byte(TlvType::Error, error_codes::AUTHENTICATION)
        .build();
    assert!(matches!(setup.handle(&m2), Err(HapError::BadPin)));

    // Session is destroyed after an error
    let m2 = Tlv8Encoder::new().add_state(2).build();
    assert!(matches!(
        setup.handle(&m2),
        Err(HapError::InvalidState { .. })
    ));
}

#[test]
fn setup_surfaces_backoff_delay() {
    let mut setup = PairSetup::new();
    setup.set_pin("1234");
    let _m1 = setup.start().unwrap();

    let m2 = Tlv8Encoder::new()
        .add_state(2)
        .add_byte(TlvType::Error, error_codes::BUSY)
        .add(TlvType::RetryDelay, &10u16.to_le_bytes())
        .build();
    match setup.handle(&m2) {
        Err(HapError::BackOff(delay)) => assert_eq!(delay, Duration::from_secs(10)),
        other => panic!("expected backoff: {other:?}"),
    }
}

#[test]
fn setup_m1_carries_transient_flag() {
    let mut transient = PairSetup::transient();
    let m1 = transient.start().unwrap();
    let tlv = Tlv8Decoder::decode(&m1).unwrap();
    assert_eq!(tlv.get(TlvType::Flags), Some(&[0x10u8][..]));

    let mut persistent = PairSetup::new();
    let m1 = persistent.start().unwrap();
    let tlv = Tlv8Decoder::decode(&m1).unwrap();
    assert!(tlv.get(TlvType::Flags).is_none());
}

/// Minimal accessory side of Pair-Verify, driven inline by the test.
struct FakeAccessory {
    ltsk: Ed25519KeyPair,
    ephemeral: X25519KeyPair,
}

impl FakeAccessory {
    fn new() -> Self {
        Self {
            ltsk: Ed25519KeyPair::generate(),
            ephemeral: X25519KeyPair::generate(),
        }
    }

    fn m2_for(&self, m1: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let tlv = Tlv8Decoder::decode(m1).unwrap();
        assert_eq!(tlv.get_state().unwrap(), 1);
        let client_ephemeral = tlv.get_required(TlvType::PublicKey).unwrap().to_vec();

        let shared = self
            .ephemeral
            .diffie_hellman(&X25519PublicKey::from_bytes(&client_ephemeral).unwrap());
        let session_key = HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), shared.as_bytes())
            .expand_fixed::<32>(b"Pair-Verify-Encrypt-Info")
            .unwrap();

        let mut sign_data = Vec::new();
        sign_data.extend_from_slice(self.ephemeral.public_key().as_bytes());
        sign_data.extend_from_slice(&client_ephemeral);
        let signature = self.ltsk.sign(&sign_data);

        let inner = Tlv8Encoder::new()
            .add(TlvType::Identifier, b"accessory-id")
            .add(TlvType::Signature, &signature.to_bytes())
            .build();
        let cipher = ChaChaCipher::new(&session_key).unwrap();
        let encrypted = cipher
            .encrypt(&Nonce::from_label(b"PV-Msg02"), &inner)
            .unwrap();

        let m2 = Tlv8Encoder::new()
            .add_state(2)
            .add(TlvType::PublicKey, self.ephemeral.public_key().as_bytes())
            .add(TlvType::EncryptedData, &encrypted)
            .build();
        (m2, shared.as_bytes().to_vec())
    }
}

fn credentials_for(accessory: &FakeAccessory) -> HapCredentials {
    let client = Ed25519KeyPair::generate();
    HapCredentials {
        ltpk: *client.public_key().as_bytes(),
        ltsk: client.secret_bytes(),
        pair_id: b"client-pair-id".to_vec(),
        peer_pk: *accessory.ltsk.public_key().as_bytes(),
    }
}

#[test]
fn verify_completes_in_two_round_trips() {
    let accessory = FakeAccessory::new();
    let credentials = credentials_for(&accessory);

    let mut verify = PairVerify::new(credentials.clone());
    let m1 = verify.start().unwrap();
    let (m2, shared) = accessory.m2_for(&m1);

    let m3 = match verify.handle(&m2).unwrap() {
        HandshakeStep::Send(m3) => m3,
        other => panic!("expected M3: {other:?}"),
    };

    // Accessory verifies the client signature in M3
    let tlv = Tlv8Decoder::decode(&m3).unwrap();
    assert_eq!(tlv.get_state().unwrap(), 3);
    let session_key = HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), &shared)
        .expand_fixed::<32>(b"Pair-Verify-Encrypt-Info")
        .unwrap();
    let cipher = ChaChaCipher::new(&session_key).unwrap();
    let inner = cipher
        .decrypt(
            &Nonce::from_label(b"PV-Msg03"),
            tlv.get_required(TlvType::EncryptedData).unwrap(),
        )
        .unwrap();
    let inner_tlv = Tlv8Decoder::decode(&inner).unwrap();
    assert_eq!(
        inner_tlv.get_required(TlvType::Identifier).unwrap(),
        b"client-pair-id"
    );
    let client_signature =
        Ed25519Signature::from_bytes(inner_tlv.get_required(TlvType::Signature).unwrap()).unwrap();
    let client_key =
        crate::protocol::crypto::Ed25519PublicKey::from_bytes(&credentials.ltpk).unwrap();
    let m1_tlv = Tlv8Decoder::decode(&m1).unwrap();
    let mut signed = Vec::new();
    signed.extend_from_slice(m1_tlv.get_required(TlvType::PublicKey).unwrap());
    signed.extend_from_slice(accessory.ephemeral.public_key().as_bytes());
    client_key.verify(&signed, &client_signature).unwrap();

    // M4 completes the handshake
    let m4 = Tlv8Encoder::new().add_state(4).build();
    let keys = match verify.handle(&m4).unwrap() {
        HandshakeStep::Done(keys) => keys,
        other => panic!("expected completion: {other:?}"),
    };

    // Both sides derive the same channel keys from the shared secret
    let hkdf = HkdfSha512::new(Some(b"Control-Salt"), &shared);
    assert_eq!(
        keys.output_key,
        hkdf.expand_fixed::<32>(b"Control-Write-Encryption-Key").unwrap()
    );
}

#[test]
fn verify_rejects_wrong_accessory_identity() {
    let accessory = FakeAccessory::new();
    let mut credentials = credentials_for(&accessory);
    // Stored peer key belongs to a different accessory
    credentials.peer_pk = *Ed25519KeyPair::generate().public_key().as_bytes();

    let mut verify = PairVerify::new(credentials);
    let m1 = verify.start().unwrap();
    let (m2, _) = accessory.m2_for(&m1);
    assert!(matches!(
        verify.handle(&m2),
        Err(HapError::SignatureVerificationFailed)
    ));
}

fn paired_sessions() -> (HapSession, HapSession) {
    let keys = SessionKeys {
        output_key: [1u8; 32],
        input_key: [2u8; 32],
        shared_secret: [3u8; 32],
    };
    let mirrored = SessionKeys {
        output_key: [2u8; 32],
        input_key: [1u8; 32],
        shared_secret: [3u8; 32],
    };
    (
        HapSession::new(&keys).unwrap(),
        HapSession::new(&mirrored).unwrap(),
    )
}

#[test]
fn session_round_trip_with_split_delivery() {
    let (mut sender, mut receiver) = paired_sessions();

    let wire = sender.encrypt(b"hello over HAP").unwrap();
    // Deliver byte by byte to exercise partial-block buffering
    let mut collected = Vec::new();
    for byte in &wire {
        collected.extend_from_slice(&receiver.decrypt(&[*byte]).unwrap());
    }
    assert_eq!(collected, b"hello over HAP");
}

#[test]
fn session_chunks_large_writes() {
    let (mut sender, mut receiver) = paired_sessions();

    let payload = vec![0x5A; 3000];
    let wire = sender.encrypt(&payload).unwrap();
    // ceil(3000/1024) = 3 blocks, each with 2-byte header and 16-byte tag
    assert_eq!(wire.len(), 3000 + 3 * 18);
    assert_eq!(sender.output_nonce(), 3);

    assert_eq!(receiver.decrypt(&wire).unwrap(), payload);
}

#[test]
fn session_nonces_strictly_increase() {
    let (mut sender, _) = paired_sessions();
    assert_eq!(sender.output_nonce(), 0);
    sender.encrypt(b"one").unwrap();
    assert_eq!(sender.output_nonce(), 1);
    sender.encrypt(b"two").unwrap();
    assert_eq!(sender.output_nonce(), 2);
}

#[test]
fn session_rejects_tampered_block() {
    let (mut sender, mut receiver) = paired_sessions();
    let mut wire = sender.encrypt(b"payload").unwrap();
    let last = wire.len() - 1;
    wire[last] ^= 0xFF;
    assert!(receiver.decrypt(&wire).is_err());
}
