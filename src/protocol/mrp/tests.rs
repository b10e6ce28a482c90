use super::connection::MrpConnection;
use super::framing::{FrameError, peek_varint, write_varint};
use super::messages::{
    self, Client, CommandResultMessage, CryptoPairingMessage, DeviceInfoMessage, NowPlayingInfo,
    Payload, PlayerPath, ProtocolMessage, SetNowPlayingClientMessage, SetStateMessage,
    decode_frame, encode_frame, message_type, playback_state,
};
use super::player::PlayerRegistry;
use super::protocol::MrpClient;
use crate::error::AtvError;
use crate::protocol::crypto::{Ed25519KeyPair, HkdfSha512, X25519KeyPair, X25519PublicKey};
use crate::protocol::hap::tlv8::{Tlv8Decoder, Tlv8Encoder, TlvType};
use crate::protocol::hap::SessionKeys;
use crate::state::{DeviceEvent, DeviceListener, StateProducer};
use crate::types::HapCredentials;
use bytes::BytesMut;
use prost::Message;
use std::sync::{Arc, Mutex};

#[test]
fn varint_round_trip() {
    for value in [0u64, 1, 127, 128, 300, 65_535, 1 << 40] {
        let mut buf = BytesMut::new();
        write_varint(value, &mut buf);
        let (decoded, width) = peek_varint(&buf).unwrap().unwrap();
        assert_eq!(decoded, value);
        assert_eq!(width, buf.len());
    }
}

#[test]
fn varint_incomplete_and_overflow() {
    assert!(peek_varint(&[0x80]).unwrap().is_none());
    assert!(matches!(
        peek_varint(&[0xFF; 11]),
        Err(FrameError::VarintOverflow)
    ));
}

#[test]
fn frame_round_trip_preserves_payload() {
    let payload = Payload::SetState(SetStateMessage {
        playback_state: Some(playback_state::PLAYING),
        now_playing_info: Some(NowPlayingInfo {
            title: Some("Track".to_string()),
            elapsed_time: Some(12.5),
            playback_rate: Some(1.0),
            ..NowPlayingInfo::default()
        }),
        ..SetStateMessage::default()
    });

    let bytes = encode_frame(Some("req-1".to_string()), payload.clone());
    let frame = decode_frame(&bytes).unwrap();
    assert_eq!(frame.header.r#type, Some(message_type::SET_STATE));
    assert_eq!(frame.header.identifier.as_deref(), Some("req-1"));
    assert_eq!(frame.payload, payload);
}

#[test]
fn unknown_message_type_is_tolerated() {
    let header = ProtocolMessage {
        r#type: Some(9999),
        identifier: None,
        error_code: None,
    };
    let bytes = header.encode_to_vec();
    let frame = decode_frame(&bytes).unwrap();
    assert!(matches!(frame.payload, Payload::Unknown(_)));
}

fn set_state(bundle: &str, state: i32, info: NowPlayingInfo) -> SetStateMessage {
    SetStateMessage {
        playback_state: Some(state),
        now_playing_info: Some(info),
        player_path: Some(PlayerPath {
            client: Some(Client {
                bundle_identifier: Some(bundle.to_string()),
                display_name: None,
            }),
            ..PlayerPath::default()
        }),
        ..SetStateMessage::default()
    }
}

#[test]
fn registry_elects_now_playing_client() {
    let mut registry = PlayerRegistry::new();
    registry.handle_set_state(&set_state(
        "com.apple.TVMusic",
        playback_state::PLAYING,
        NowPlayingInfo {
            title: Some("Music".to_string()),
            ..NowPlayingInfo::default()
        },
    ));
    registry.handle_set_state(&set_state(
        "com.netflix.Netflix",
        playback_state::PAUSED,
        NowPlayingInfo {
            title: Some("Show".to_string()),
            ..NowPlayingInfo::default()
        },
    ));

    registry.handle_set_now_playing_client(&SetNowPlayingClientMessage {
        client: Some(Client {
            bundle_identifier: Some("com.apple.TVMusic".to_string()),
            display_name: None,
        }),
    });
    assert_eq!(
        registry.active().unwrap().bundle_identifier,
        "com.apple.TVMusic"
    );
    assert_eq!(registry.playing_state().title.as_deref(), Some("Music"));
}

#[test]
fn registry_falls_back_to_most_recent() {
    let mut registry = PlayerRegistry::new();
    registry.handle_set_state(&set_state(
        "first.app",
        playback_state::PAUSED,
        NowPlayingInfo::default(),
    ));
    std::thread::sleep(std::time::Duration::from_millis(5));
    registry.handle_set_state(&set_state(
        "second.app",
        playback_state::PLAYING,
        NowPlayingInfo::default(),
    ));
    assert_eq!(registry.active().unwrap().bundle_identifier, "second.app");
}

#[test]
fn zero_rate_while_playing_reports_paused() {
    let mut registry = PlayerRegistry::new();
    registry.handle_set_state(&set_state(
        "quirky.app",
        playback_state::PLAYING,
        NowPlayingInfo {
            elapsed_time: Some(30.0),
            playback_rate: Some(0.0),
            ..NowPlayingInfo::default()
        },
    ));

    let playing = registry.playing_state();
    assert_eq!(playing.device_state, crate::types::DeviceState::Paused);
    // Position does not extrapolate while effectively paused
    assert_eq!(playing.position, Some(30));
}

#[test]
fn position_extrapolates_while_playing() {
    let mut registry = PlayerRegistry::new();
    registry.handle_set_state(&set_state(
        "player.app",
        playback_state::PLAYING,
        NowPlayingInfo {
            elapsed_time: Some(100.0),
            playback_rate: Some(1.0),
            ..NowPlayingInfo::default()
        },
    ));

    let playing = registry.playing_state();
    // Just reported: position is elapsed plus negligible wall time
    assert_eq!(playing.position, Some(100));
    assert_eq!(playing.device_state, crate::types::DeviceState::Playing);
}

/// Accessory side of the MRP handshake, driven over a duplex pipe.
struct FakeMrpDevice {
    ltsk: Ed25519KeyPair,
}

impl FakeMrpDevice {
    fn new() -> Self {
        Self {
            ltsk: Ed25519KeyPair::generate(),
        }
    }

    fn credentials(&self) -> HapCredentials {
        let client = Ed25519KeyPair::generate();
        HapCredentials {
            ltpk: *client.public_key().as_bytes(),
            ltsk: client.secret_bytes(),
            pair_id: b"test-pair-id".to_vec(),
            peer_pk: *self.ltsk.public_key().as_bytes(),
        }
    }

    /// Run device info + pair-verify, returning the device-side keys.
    async fn run_handshake(&self, connection: &mut MrpConnection) -> SessionKeys {
        // Device info exchange
        let frame = decode_frame(&connection.receive().await.unwrap()).unwrap();
        assert_eq!(frame.header.r#type, Some(message_type::DEVICE_INFO));
        connection
            .send(&encode_frame(
                None,
                Payload::DeviceInfo(DeviceInfoMessage {
                    unique_identifier: Some("device-id".to_string()),
                    name: Some("Fake TV".to_string()),
                    ..DeviceInfoMessage::default()
                }),
            ))
            .await
            .unwrap();

        // Pair-Verify M1
        let frame = decode_frame(&connection.receive().await.unwrap()).unwrap();
        let Payload::CryptoPairing(m1) = frame.payload else {
            panic!("expected crypto pairing");
        };
        let m1 = Tlv8Decoder::decode(m1.pairing_data.as_deref().unwrap()).unwrap();
        let client_ephemeral = m1.get_required(TlvType::PublicKey).unwrap().to_vec();

        let ephemeral = X25519KeyPair::generate();
        let shared = ephemeral
            .diffie_hellman(&X25519PublicKey::from_bytes(&client_ephemeral).unwrap());
        let session_key = HkdfSha512::new(Some(b"Pair-Verify-Encrypt-Salt"), shared.as_bytes())
            .expand_fixed::<32>(b"Pair-Verify-Encrypt-Info")
            .unwrap();

        let mut sign_data = Vec::new();
        sign_data.extend_from_slice(ephemeral.public_key().as_bytes());
        sign_data.extend_from_slice(&client_ephemeral);
        let signature = self.ltsk.sign(&sign_data);
        let inner = Tlv8Encoder::new()
            .add(TlvType::Identifier, b"device-id")
            .add(TlvType::Signature, &signature.to_bytes())
            .build();
        let cipher = crate::protocol::crypto::ChaChaCipher::new(&session_key).unwrap();
        let encrypted = cipher
            .encrypt(&crate::protocol::crypto::Nonce::from_label(b"PV-Msg02"), &inner)
            .unwrap();
        let m2 = Tlv8Encoder::new()
            .add_state(2)
            .add(TlvType::PublicKey, ephemeral.public_key().as_bytes())
            .add(TlvType::EncryptedData, &encrypted)
            .build();
        connection
            .send(&encode_frame(
                None,
                Payload::CryptoPairing(CryptoPairingMessage {
                    pairing_data: Some(m2),
                    status: Some(0),
                }),
            ))
            .await
            .unwrap();

        // M3 arrives; we skip verification and send M4
        let frame = decode_frame(&connection.receive().await.unwrap()).unwrap();
        assert!(matches!(frame.payload, Payload::CryptoPairing(_)));
        let m4 = Tlv8Encoder::new().add_state(4).build();
        connection
            .send(&encode_frame(
                None,
                Payload::CryptoPairing(CryptoPairingMessage {
                    pairing_data: Some(m4),
                    status: Some(0),
                }),
            ))
            .await
            .unwrap();

        // Device directions mirror the client's
        let hkdf = HkdfSha512::new(Some(b"Control-Salt"), shared.as_bytes());
        SessionKeys {
            output_key: hkdf
                .expand_fixed::<32>(b"Control-Read-Encryption-Key")
                .unwrap(),
            input_key: hkdf
                .expand_fixed::<32>(b"Control-Write-Encryption-Key")
                .unwrap(),
            shared_secret: *shared.as_bytes(),
        }
    }
}

struct EventSink {
    events: Mutex<Vec<DeviceEvent>>,
}

impl DeviceListener for EventSink {
    fn on_event(&self, event: &DeviceEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

async fn connected_pair() -> (MrpClient, MrpConnection, Arc<EventSink>, Arc<StateProducer>) {
    let (client_io, device_io) = tokio::io::duplex(64 * 1024);
    let mut device_conn = MrpConnection::from_stream(Box::new(device_io));
    let device = FakeMrpDevice::new();
    let credentials = device.credentials();

    let producer = Arc::new(StateProducer::new());
    let sink = Arc::new(EventSink {
        events: Mutex::new(Vec::new()),
    });
    // The weak registration shares the sink's allocation, so it stays
    // live for as long as the sink does
    let listener: Arc<dyn DeviceListener> = sink.clone();
    let _handle = producer.register(Arc::downgrade(&listener));

    let device_task = tokio::spawn(async move {
        let keys = device.run_handshake(&mut device_conn).await;
        device_conn.enable_encryption(&keys).unwrap();

        // Absorb SET_CONNECTION_STATE and CLIENT_UPDATES_CONFIG
        loop {
            let frame = decode_frame(&device_conn.receive().await.unwrap()).unwrap();
            if frame.header.r#type == Some(message_type::CLIENT_UPDATES_CONFIG) {
                break;
            }
        }
        device_conn
    });

    let client_conn = MrpConnection::from_stream(Box::new(client_io));
    let client = MrpClient::handshake(client_conn, Some(&credentials), producer.clone())
        .await
        .unwrap();
    let device_conn = device_task.await.unwrap();
    (client, device_conn, sink, producer)
}

#[tokio::test]
async fn handshake_and_acknowledged_command() {
    let (client, mut device_conn, _sink, _producer) = connected_pair().await;

    let device_task = tokio::spawn(async move {
        let frame = decode_frame(&device_conn.receive().await.unwrap()).unwrap();
        assert_eq!(frame.header.r#type, Some(message_type::SEND_COMMAND));
        let identifier = frame.header.identifier.clone();
        device_conn
            .send(&encode_frame(
                identifier,
                Payload::CommandResult(CommandResultMessage {
                    send_error: Some(0),
                    handler_return_status: Some(0),
                }),
            ))
            .await
            .unwrap();
        device_conn
    });

    client.play().await.unwrap();
    let _ = device_task.await.unwrap();
}

#[tokio::test]
async fn command_error_carries_both_subcodes() {
    let (client, mut device_conn, _sink, _producer) = connected_pair().await;

    tokio::spawn(async move {
        let frame = decode_frame(&device_conn.receive().await.unwrap()).unwrap();
        device_conn
            .send(&encode_frame(
                frame.header.identifier.clone(),
                Payload::CommandResult(CommandResultMessage {
                    send_error: Some(5),
                    handler_return_status: Some(2),
                }),
            ))
            .await
            .unwrap();
        device_conn
    });

    match client.pause().await {
        Err(AtvError::Command {
            error_code,
            handler_status,
        }) => {
            assert_eq!(error_code, 5);
            assert_eq!(handler_status, 2);
        }
        other => panic!("expected command error: {other:?}"),
    }
}

#[tokio::test]
async fn hid_events_need_no_ack() {
    let (client, mut device_conn, _sink, _producer) = connected_pair().await;

    // Completes without the device answering anything
    client
        .select(crate::interface::InputAction::SingleTap)
        .await
        .unwrap();

    let down = decode_frame(&device_conn.receive().await.unwrap()).unwrap();
    assert_eq!(down.header.r#type, Some(message_type::SEND_HID_EVENT));
    let up = decode_frame(&device_conn.receive().await.unwrap()).unwrap();
    assert_eq!(up.header.r#type, Some(message_type::SEND_HID_EVENT));
}

#[tokio::test]
async fn pushed_state_reaches_listeners_once() {
    let (client, mut device_conn, sink, _producer) = connected_pair().await;

    let state = set_state(
        "com.apple.TVMusic",
        playback_state::PLAYING,
        NowPlayingInfo {
            title: Some("Pushed".to_string()),
            playback_rate: Some(1.0),
            ..NowPlayingInfo::default()
        },
    );
    device_conn
        .send(&encode_frame(None, Payload::SetState(state.clone())))
        .await
        .unwrap();
    // Identical snapshot again: deduplicated
    device_conn
        .send(&encode_frame(None, Payload::SetState(state)))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let events = sink.events.lock().unwrap();
    let updates: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            DeviceEvent::PlayStatusUpdate(p) => Some(p.title.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 1, "duplicate update was not suppressed");
    assert_eq!(updates[0].as_deref(), Some("Pushed"));
    assert_eq!(client.playing().title.as_deref(), Some("Pushed"));
}

#[tokio::test]
async fn volume_updates_are_cached_and_emitted() {
    let (client, mut device_conn, sink, _producer) = connected_pair().await;

    device_conn
        .send(&encode_frame(
            None,
            Payload::VolumeDidChange(messages::VolumeDidChangeMessage {
                volume: Some(0.4),
                output_device_uid: None,
            }),
        ))
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(client.cached_volume(), Some(40.0));
    assert!(sink
        .events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, DeviceEvent::VolumeUpdate(v) if (*v - 40.0).abs() < 0.01)));
}
