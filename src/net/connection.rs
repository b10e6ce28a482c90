//! TCP connection carrying HTTP or RTSP exchanges

use super::message::{HttpRequest, HttpResponse, parse_response};
use super::processor::{ConnectionProcessor, NoopProcessor};
use super::{HttpError, REPLY_TIMEOUT};
use bytes::{Buf, BytesMut};
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::util::log_binary;

/// One request/response connection.
///
/// Requests are serialized; a reply must arrive within the timeout or
/// the connection is considered dead. TCP keep-alive is enabled on
/// sockets that permit it.
pub struct HttpConnection {
    stream: TcpStream,
    buffer: BytesMut,
    processor: Box<dyn ConnectionProcessor>,
    remote: SocketAddr,
}

impl HttpConnection {
    /// Connect to a remote endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Io`] when the connection cannot be
    /// established.
    pub async fn connect(remote: SocketAddr) -> Result<Self, HttpError> {
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(true)?;

        // 20s idle with 3 probes at 5s intervals
        let keepalive = TcpKeepalive::new()
            .with_time(Duration::from_secs(20))
            .with_interval(Duration::from_secs(5));
        #[cfg(not(target_os = "windows"))]
        let keepalive = keepalive.with_retries(3);
        if let Err(err) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
            debug!("TCP keep-alive not supported: {err}");
        }

        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            processor: Box::new(NoopProcessor),
            remote,
        })
    }

    /// Remote endpoint of this connection.
    #[must_use]
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Local endpoint of this connection.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr, HttpError> {
        Ok(self.stream.local_addr()?)
    }

    /// Install a processor pair (e.g. HAP channel encryption).
    ///
    /// Any buffered undecrypted bytes are discarded; processors are
    /// installed at protocol phase boundaries where the wire is idle.
    pub fn set_processor(&mut self, processor: Box<dyn ConnectionProcessor>) {
        self.buffer.clear();
        self.processor = processor;
    }

    /// Send a request and await its response with the default timeout.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Timeout`] after 20 seconds without a reply.
    pub async fn send(&mut self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        self.send_with_timeout(request, REPLY_TIMEOUT).await
    }

    /// Send a request with a custom reply timeout (long-polls pass
    /// their own).
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] on I/O failure, malformed response or
    /// timeout.
    pub async fn send_with_timeout(
        &mut self,
        request: &HttpRequest,
        reply_timeout: Duration,
    ) -> Result<HttpResponse, HttpError> {
        let serialized = request.encode();
        trace!(
            ">> {} {} ({} byte body)",
            request.method,
            request.path,
            request.body.len()
        );
        let wire = self.processor.outgoing(&serialized)?;
        self.stream.write_all(&wire).await?;

        tokio::time::timeout(reply_timeout, self.read_response())
            .await
            .map_err(|_| HttpError::Timeout(reply_timeout))?
    }

    async fn read_response(&mut self) -> Result<HttpResponse, HttpError> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some((response, consumed)) = parse_response(&self.buffer)? {
                self.buffer.advance(consumed);
                trace!(
                    "<< {} {} ({} byte body)",
                    response.code,
                    response.message,
                    response.body.len()
                );
                log_binary("http-body", &response.body);
                return Ok(response);
            }

            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(HttpError::Closed);
            }
            let plain = self.processor.incoming(&chunk[..read])?;
            self.buffer.extend_from_slice(&plain);
        }
    }
}
