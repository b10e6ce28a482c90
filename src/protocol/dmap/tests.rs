use super::codec::{DmapError, DmapItem, DmapLookup, DmapValue, decode, encode, first};
use super::pairing::{DmapPairing, pairing_code_for_tests};
use super::protocol::parse_play_status;
use crate::types::{DeviceState, MediaType, RepeatState, ShuffleState};

fn play_status_blob(revision: u32, title: &str) -> Vec<u8> {
    encode(&[DmapItem::new(
        b"cmst",
        DmapValue::Container(vec![
            DmapItem::new(b"cmsr", DmapValue::UInt(u64::from(revision))),
            DmapItem::new(b"caps", DmapValue::UInt(4)),
            DmapItem::new(b"cmmk", DmapValue::UInt(3)),
            DmapItem::new(b"cann", DmapValue::Str(title.to_string())),
            DmapItem::new(b"cana", DmapValue::Str("Artist".to_string())),
            DmapItem::new(b"canl", DmapValue::Str("Album".to_string())),
            DmapItem::new(b"cast", DmapValue::UInt(180_000)),
            DmapItem::new(b"cant", DmapValue::UInt(120_000)),
            DmapItem::new(b"carp", DmapValue::UInt(2)),
            DmapItem::new(b"cash", DmapValue::UInt(1)),
        ]),
    )])
}

#[test]
fn codec_round_trips_known_blobs() {
    let blob = play_status_blob(7, "Song");
    let decoded = decode(&blob).unwrap();
    assert_eq!(encode(&decoded), blob);
}

#[test]
fn codec_preserves_duplicate_keys_in_order() {
    let items = vec![
        DmapItem::new(b"minm", DmapValue::Str("first".to_string())),
        DmapItem::new(b"minm", DmapValue::Str("second".to_string())),
    ];
    let decoded = decode(&encode(&items)).unwrap();
    assert_eq!(decoded, items);
}

#[test]
fn codec_skips_unknown_tags() {
    // zzzz is not in the dictionary: 8-byte header + 2 payload bytes
    let mut blob = b"zzzz".to_vec();
    blob.extend_from_slice(&2u32.to_be_bytes());
    blob.extend_from_slice(&[0xAA, 0xBB]);
    blob.extend_from_slice(&encode(&[DmapItem::new(
        b"minm",
        DmapValue::Str("kept".to_string()),
    )]));

    let decoded = decode(&blob).unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded.str_at(&[b"minm"]), Some("kept"));
}

#[test]
fn codec_rejects_overrunning_length() {
    let mut blob = b"minm".to_vec();
    blob.extend_from_slice(&100u32.to_be_bytes());
    blob.extend_from_slice(b"short");
    assert!(matches!(
        decode(&blob),
        Err(DmapError::MalformedFrame { length: 100, .. })
    ));
}

#[test]
fn lookup_descends_containers() {
    let blob = play_status_blob(3, "Song");
    let decoded = decode(&blob).unwrap();
    assert_eq!(decoded.uint_at(&[b"cmst", b"cmsr"]), Some(3));
    assert_eq!(decoded.str_at(&[b"cmst", b"cann"]), Some("Song"));
    assert!(first(&decoded, &[b"cmst", b"mlid"]).is_none());
}

#[test]
fn play_status_parsing() {
    let decoded = decode(&play_status_blob(9, "Song")).unwrap();
    let (playing, revision) = parse_play_status(&decoded);

    assert_eq!(revision, 9);
    assert_eq!(playing.device_state, DeviceState::Playing);
    assert_eq!(playing.media_type, MediaType::Music);
    assert_eq!(playing.title.as_deref(), Some("Song"));
    assert_eq!(playing.total_time, Some(180));
    // position = (total - remaining) in whole seconds
    assert_eq!(playing.position, Some(60));
    assert_eq!(playing.repeat, RepeatState::All);
    assert_eq!(playing.shuffle, ShuffleState::Songs);
}

#[test]
fn play_status_without_times() {
    let blob = encode(&[DmapItem::new(
        b"cmst",
        DmapValue::Container(vec![DmapItem::new(b"cmsr", DmapValue::UInt(1))]),
    )]);
    let (playing, _) = parse_play_status(&decode(&blob).unwrap());
    assert_eq!(playing.device_state, DeviceState::Idle);
    assert_eq!(playing.total_time, None);
    assert_eq!(playing.position, None);
}

#[test]
fn pairing_code_depends_on_guid_and_pin() {
    let a = pairing_code_for_tests(0x1122_3344_5566_7788, "1234");
    let b = pairing_code_for_tests(0x1122_3344_5566_7788, "4321");
    let c = pairing_code_for_tests(0x8877_6655_4433_2211, "1234");
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 32);
}

mod pairing_flow {
    use super::*;
    use crate::types::credentials::DmapCredentials;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Full exchange against the pairing server, playing the device.
    #[tokio::test]
    async fn device_pairs_with_correct_code() {
        let mut pairing = DmapPairing::new("atvlink test");
        pairing.pin("1111");

        // Bind the server without announcing (no network assumptions)
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = pairing.shared_for_tests();
        tokio::spawn(super::super::pairing::serve_for_tests(listener, shared));

        let code = pairing_code_for_tests(pairing.pairing_guid(), "1111");
        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket
            .write_all(
                format!("GET /pair?pairingcode={code}&servicename=remote HTTP/1.1\r\n\r\n")
                    .as_bytes(),
            )
            .await
            .unwrap();

        let mut response = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let read = socket.read(&mut buf).await.unwrap();
            if read == 0 {
                break;
            }
            response.extend_from_slice(&buf[..read]);
            if response.windows(4).any(|w| w == b"\r\n\r\n") && response.len() > 50 {
                break;
            }
        }
        let text = String::from_utf8_lossy(&response);
        assert!(text.starts_with("HTTP/1.1 200 OK"));

        let credentials = pairing.finish().await.unwrap();
        assert!(pairing.has_paired());
        assert_eq!(
            credentials,
            DmapCredentials::PairingGuid(pairing.pairing_guid())
        );
    }

    #[tokio::test]
    async fn wrong_code_is_rejected() {
        let pairing = DmapPairing::new("atvlink test");
        pairing.pin("1111");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(super::super::pairing::serve_for_tests(
            listener,
            pairing.shared_for_tests(),
        ));

        let mut socket = TcpStream::connect(addr).await.unwrap();
        socket
            .write_all(b"GET /pair?pairingcode=00000000000000000000000000000000&servicename=x HTTP/1.1\r\n\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let read = socket.read(&mut buf).await.unwrap();
        assert!(String::from_utf8_lossy(&buf[..read]).starts_with("HTTP/1.1 404"));
        assert!(!pairing.has_paired());
    }
}

mod push_updates {
    use super::super::protocol::DmapClient;
    use super::super::push::DmapPushUpdater;
    use super::*;
    use crate::state::{DeviceEvent, DeviceListener, StateProducer};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn login_blob(session_id: u32) -> Vec<u8> {
        encode(&[DmapItem::new(
            b"mlog",
            DmapValue::Container(vec![
                DmapItem::new(b"mstt", DmapValue::UInt(200)),
                DmapItem::new(b"mlid", DmapValue::UInt(u64::from(session_id))),
            ]),
        )])
    }

    async fn respond(socket: &mut tokio::net::TcpStream, body: &[u8]) {
        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/x-dmap-tagged\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let _ = socket.write_all(header.as_bytes()).await;
        let _ = socket.write_all(body).await;
    }

    /// Fake DMAP endpoint: login plus a two-revision play status
    /// sequence, then blocking forever.
    async fn fake_dmap_server(listener: TcpListener) {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    let Ok(read) = socket.read(&mut buf).await else {
                        return;
                    };
                    if read == 0 {
                        return;
                    }
                    let request = String::from_utf8_lossy(&buf[..read]).into_owned();
                    if request.contains("/login") {
                        respond(&mut socket, &login_blob(0x1234)).await;
                    } else if request.contains("/ctrl-int/1/playstatusupdate") {
                        let revision: u32 = request
                            .split("revision-number=")
                            .nth(1)
                            .and_then(|rest| {
                                rest.split(|c: char| !c.is_ascii_digit())
                                    .next()?
                                    .parse()
                                    .ok()
                            })
                            .unwrap_or(0);
                        match revision {
                            0 | 1 => {
                                respond(&mut socket, &play_status_blob(1, "t1")).await;
                            }
                            2 => {
                                // Server revision advances shortly after
                                tokio::time::sleep(Duration::from_millis(50)).await;
                                respond(&mut socket, &play_status_blob(2, "t2")).await;
                            }
                            _ => {
                                // Block: no further revision changes
                                tokio::time::sleep(Duration::from_secs(600)).await;
                            }
                        }
                    } else {
                        respond(&mut socket, &[]).await;
                    }
                }
            });
        }
    }

    struct UpdateSink {
        titles: Mutex<Vec<String>>,
    }

    impl DeviceListener for UpdateSink {
        fn on_event(&self, event: &DeviceEvent) {
            if let DeviceEvent::PlayStatusUpdate(playing) = event {
                self.titles
                    .lock()
                    .unwrap()
                    .push(playing.title.clone().unwrap_or_default());
            }
        }
    }

    #[tokio::test]
    async fn long_poll_delivers_updates_in_revision_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(fake_dmap_server(listener));

        let mut client = DmapClient::connect(addr, None).await.unwrap();
        client.login().await.unwrap();

        let producer = Arc::new(StateProducer::new());
        let sink = Arc::new(UpdateSink {
            titles: Mutex::new(Vec::new()),
        });
        let listener_arc: Arc<dyn DeviceListener> = sink.clone();
        let _handle = producer.register(Arc::downgrade(&listener_arc));

        let updater = DmapPushUpdater::new(client, producer);
        updater.start(None);
        assert!(updater.is_active());

        tokio::time::sleep(Duration::from_millis(400)).await;
        updater.stop();
        assert!(!updater.is_active());

        // Exactly two updates, in revision order
        let titles = sink.titles.lock().unwrap().clone();
        assert_eq!(titles, vec!["t1".to_string(), "t2".to_string()]);
    }
}
