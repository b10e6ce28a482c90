use super::connection::HttpConnection;
use super::message::{Headers, HttpRequest, parse_response};
use super::{HttpError, processor::ConnectionProcessor};
use crate::protocol::hap::{HapSession, SessionKeys};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[test]
fn request_encoding_http() {
    let request = HttpRequest::http("GET", "/login?hasFP=1")
        .with_header("Accept", "*/*")
        .with_body(b"data".to_vec());
    let encoded = request.encode();
    let text = String::from_utf8_lossy(&encoded);
    assert!(text.starts_with("GET /login?hasFP=1 HTTP/1.1\r\n"));
    assert!(text.contains("Accept: */*\r\n"));
    assert!(text.contains("Content-Length: 4\r\n"));
    assert!(text.ends_with("\r\n\r\ndata"));
}

#[test]
fn request_encoding_rtsp_verbs() {
    for verb in [
        "ANNOUNCE",
        "SETUP",
        "RECORD",
        "FLUSH",
        "TEARDOWN",
        "OPTIONS",
        "GET_PARAMETER",
        "SET_PARAMETER",
        "FEEDBACK",
    ] {
        let encoded = HttpRequest::rtsp(verb, "rtsp://10.0.0.2/1234").encode();
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.starts_with(&format!("{verb} rtsp://10.0.0.2/1234 RTSP/1.0\r\n")));
    }
}

#[test]
fn parse_http_and_rtsp_status_lines() {
    let http = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi";
    let (response, consumed) = parse_response(http).unwrap().unwrap();
    assert_eq!(response.protocol, "HTTP/1.1");
    assert_eq!(response.code, 200);
    assert_eq!(response.body, b"hi");
    assert_eq!(consumed, http.len());

    let rtsp = b"RTSP/1.0 453 Not Enough Bandwidth\r\n\r\n";
    let (response, _) = parse_response(rtsp).unwrap().unwrap();
    assert_eq!(response.protocol, "RTSP/1.0");
    assert_eq!(response.code, 453);
    assert_eq!(response.message, "Not Enough Bandwidth");
}

#[test]
fn parse_incomplete_returns_none() {
    assert!(parse_response(b"HTTP/1.1 200 OK\r\nContent-Le").unwrap().is_none());
    assert!(
        parse_response(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort")
            .unwrap()
            .is_none()
    );
}

#[test]
fn parse_chunked_body() {
    let data = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
    let (response, consumed) = parse_response(data).unwrap().unwrap();
    assert_eq!(response.body, b"Wikipedia");
    assert_eq!(consumed, data.len());
}

#[test]
fn parse_rejects_garbage_status_line() {
    assert!(matches!(
        parse_response(b"NOT-A-PROTOCOL 200 OK\r\n\r\n"),
        Err(HttpError::InvalidStatusLine(_))
    ));
}

#[test]
fn headers_are_case_insensitive() {
    let headers = Headers::from([("Content-Type", "text/plain"), ("CSeq", "3")]);
    assert_eq!(headers.get("content-type"), Some("text/plain"));
    assert_eq!(headers.get("cseq"), Some("3"));
    assert_eq!(headers.get("missing"), None);
}

async fn one_shot_server(response: Vec<u8>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await.unwrap();
        socket.write_all(&response).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn connection_round_trip() {
    let addr =
        one_shot_server(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello".to_vec()).await;

    let mut connection = HttpConnection::connect(addr).await.unwrap();
    let response = connection.send(&HttpRequest::http("GET", "/")).await.unwrap();
    assert_eq!(response.code, 200);
    assert_eq!(response.body, b"hello");
}

#[tokio::test]
async fn connection_times_out_without_reply() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let mut connection = HttpConnection::connect(addr).await.unwrap();
    let result = connection
        .send_with_timeout(
            &HttpRequest::http("GET", "/"),
            Duration::from_millis(50),
        )
        .await;
    assert!(matches!(result, Err(HttpError::Timeout(_))));
}

#[tokio::test]
async fn encrypted_connection_uses_processors() {
    // Server encrypts its response with the mirror of the client keys
    let keys = SessionKeys {
        output_key: [1u8; 32],
        input_key: [2u8; 32],
        shared_secret: [0u8; 32],
    };
    let server_keys = SessionKeys {
        output_key: [2u8; 32],
        input_key: [1u8; 32],
        shared_secret: [0u8; 32],
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut session = HapSession::new(&server_keys).unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let read = socket.read(&mut buf).await.unwrap();
        let plain = session.decrypt(&buf[..read]).unwrap();
        assert!(plain.starts_with(b"GET /secret HTTP/1.1"));

        let reply = session
            .encrypt(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
        socket.write_all(&reply).await.unwrap();
    });

    let mut connection = HttpConnection::connect(addr).await.unwrap();
    let session = HapSession::new(&keys).unwrap();
    connection.set_processor(Box::new(session));

    let response = connection
        .send(&HttpRequest::http("GET", "/secret"))
        .await
        .unwrap();
    assert_eq!(response.body, b"ok");
}

#[test]
fn noop_processor_is_identity() {
    let mut processor = super::NoopProcessor;
    assert_eq!(processor.outgoing(b"abc").unwrap(), b"abc");
    assert_eq!(processor.incoming(b"abc").unwrap(), b"abc");
}
