//! MRP tunneled over an AirPlay 2 session (tvOS 15 and later)
//!
//! When a device no longer advertises the MRP service but AirPlay
//! credentials exist, the remote-control channel runs as a data stream
//! inside the AirPlay session. Only the outer transport changes: the
//! varint framing and protobuf messages are identical, and the inner
//! layer skips its own encryption because the channel already is.

use crate::error::{AtvError, Result};
use crate::net::{HttpConnection, HttpRequest};
use crate::protocol::hap::{HandshakeStep, HapSession, PairVerify, SessionKeys};
use crate::protocol::mrp::MrpConnection;
use crate::types::HapCredentials;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Pair-Verify over the AirPlay HTTP endpoint.
async fn http_pair_verify(
    connection: &mut HttpConnection,
    credentials: &HapCredentials,
) -> Result<SessionKeys> {
    let mut verify = PairVerify::new(credentials.clone());
    let mut outgoing = verify.start().map_err(AtvError::from)?;

    loop {
        let request = HttpRequest::http("POST", "/pair-verify")
            .with_header("Content-Type", "application/octet-stream")
            .with_body(outgoing);
        let response = connection.send(&request).await?;
        if !response.is_ok() {
            return Err(AtvError::auth(format!(
                "pair-verify rejected ({})",
                response.code
            )));
        }
        match verify.handle(&response.body).map_err(AtvError::from)? {
            HandshakeStep::Send(next) => outgoing = next,
            HandshakeStep::Done(keys) => return Ok(keys),
        }
    }
}

/// Open a tunneled MRP connection through an AirPlay 2 session.
///
/// Verifies the session, requests a remote-control data stream and
/// returns an [`MrpConnection`] running over the encrypted channel.
///
/// # Errors
///
/// Fails when verification or stream setup is rejected.
pub async fn open_mrp_tunnel(
    airplay_remote: SocketAddr,
    credentials: &HapCredentials,
) -> Result<MrpConnection> {
    let mut connection = HttpConnection::connect(airplay_remote).await?;
    let keys = http_pair_verify(&mut connection, credentials).await?;

    // Request a remote-control data stream; the reply names the port
    let request = HttpRequest::http("POST", "/setup-data-stream")
        .with_header("Content-Type", "text/parameters")
        .with_body(b"stream-type: remote-control\n".to_vec());
    let response = connection.send(&request).await?;
    if !response.is_ok() {
        return Err(AtvError::Protocol(format!(
            "data stream setup rejected ({})",
            response.code
        )));
    }
    let port: u16 = response
        .headers
        .get("data-stream-port")
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| AtvError::Protocol("no data stream port in reply".to_string()))?;

    let stream = TcpStream::connect(SocketAddr::new(airplay_remote.ip(), port)).await?;
    stream.set_nodelay(true)?;
    debug!("MRP tunnel open on port {port}");

    Ok(MrpConnection::from_stream(Box::new(secure_pipe(
        stream, &keys,
    )?)))
}

/// Wrap a TCP stream in channel encryption, exposing a plaintext duplex
/// endpoint for the MRP framing to run over.
fn secure_pipe(
    stream: TcpStream,
    keys: &SessionKeys,
) -> Result<tokio::io::DuplexStream> {
    let (inner, outer) = tokio::io::duplex(64 * 1024);
    // Each pump owns a session and uses one direction of it; the
    // per-direction nonce counters stay independent
    let mut output_session = HapSession::new(keys).map_err(AtvError::from)?;
    let mut input_session = HapSession::new(keys).map_err(AtvError::from)?;
    let (mut tcp_read, mut tcp_write) = stream.into_split();
    let (mut pipe_read, mut pipe_write) = tokio::io::split(inner);

    // Outgoing: plaintext from the pipe, sealed blocks to the wire
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            let Ok(read) = pipe_read.read(&mut buf).await else {
                return;
            };
            if read == 0 {
                return;
            }
            let Ok(sealed) = output_session.encrypt(&buf[..read]) else {
                return;
            };
            if tcp_write.write_all(&sealed).await.is_err() {
                return;
            }
        }
    });

    // Incoming: sealed blocks from the wire, plaintext into the pipe
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            let Ok(read) = tcp_read.read(&mut buf).await else {
                return;
            };
            if read == 0 {
                return;
            }
            let Ok(plain) = input_session.decrypt(&buf[..read]) else {
                return;
            };
            if !plain.is_empty() && pipe_write.write_all(&plain).await.is_err() {
                return;
            }
        }
    });

    Ok(outer)
}
