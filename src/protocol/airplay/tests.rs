use super::features::AirPlayFeatures;
use crate::types::LegacyCredentials;

#[test]
fn features_single_hex_value() {
    let features = AirPlayFeatures::parse("0x5A7FFFF7").unwrap();
    assert!(features.video);
    assert!(features.audio);
    assert!(!features.airplay2);
}

#[test]
fn features_comma_separated_halves() {
    // Low half carries the audio/video bits; bits 48 and 51 overall
    // are bits 16 and 19 of the high word
    let features = AirPlayFeatures::parse("0x4A7FCA00,0x000B0000").unwrap();
    assert_eq!(features.raw & 0xFFFF_FFFF, 0x4A7F_CA00);
    assert_eq!(features.raw >> 32, 0x000B_0000);
    assert!(features.airplay2);
    assert!(features.transient_pairing);
}

#[test]
fn features_reject_garbage() {
    assert!(AirPlayFeatures::parse("not-hex").is_none());
}

#[test]
fn legacy_credentials_survive_round_trip() {
    let credentials = super::auth::new_credentials();
    let text = credentials.to_string();
    let parsed: LegacyCredentials = text.parse().unwrap();
    assert_eq!(parsed, credentials);
    // identifier:private_key hex form
    assert_eq!(text.len(), 16 + 1 + 64);
}

mod play_url {
    use super::super::protocol::AirPlayClient;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn play_url_posts_location_and_position() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let read = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..read]).into_owned();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
            request
        });

        let mut client = AirPlayClient::connect(addr, None, false).await.unwrap();
        client
            .play_url("http://example.com/video.mp4", 0.0)
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /play"));
        assert!(request.contains("Content-Location: http://example.com/video.mp4"));
        assert!(request.contains("Start-Position: 0"));
    }

    #[tokio::test]
    async fn missing_credentials_with_device_auth_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let result = AirPlayClient::connect(addr, None, true).await;
        assert!(matches!(
            result,
            Err(crate::error::AtvError::DeviceAuthRequired)
        ));
    }
}
