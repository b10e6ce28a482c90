//! Framed MRP transport
//!
//! One TCP stream (or a tunneled AirPlay data stream) carrying
//! varint-length-prefixed protobuf frames. After Pair-Verify each frame
//! body is encrypted whole with a per-direction nonce counter; the
//! length prefix stays outside encryption.

use super::framing::{FrameError, peek_varint, write_varint};
use crate::error::{AtvError, Result};
use crate::protocol::crypto::{ChaChaCipher, Nonce};
use crate::protocol::hap::SessionKeys;
use crate::util::log_protobuf;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

/// Byte stream the MRP framing runs over. A plain TCP connection for
/// discovered MRP services, or a duplex pipe pumped through an AirPlay
/// 2 data stream on tvOS 15 and later.
pub trait MrpStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> MrpStream for T {}

struct DirectionCrypto {
    cipher: ChaChaCipher,
    nonce: u64,
}

/// Reading half of an MRP connection.
pub struct MrpReader {
    stream: ReadHalf<Box<dyn MrpStream>>,
    buf: BytesMut,
    crypto: Option<DirectionCrypto>,
}

/// Writing half of an MRP connection.
pub struct MrpWriter {
    stream: WriteHalf<Box<dyn MrpStream>>,
    crypto: Option<DirectionCrypto>,
}

/// Framed, optionally encrypted MRP connection.
pub struct MrpConnection {
    reader: MrpReader,
    writer: MrpWriter,
}

impl MrpConnection {
    /// Connect over TCP.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection fails.
    pub async fn connect(remote: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(Box::new(stream)))
    }

    /// Wrap an existing stream (used by the AirPlay MRP tunnel).
    #[must_use]
    pub fn from_stream(stream: Box<dyn MrpStream>) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: MrpReader {
                stream: read,
                buf: BytesMut::with_capacity(4096),
                crypto: None,
            },
            writer: MrpWriter {
                stream: write,
                crypto: None,
            },
        }
    }

    /// Enable frame encryption with Pair-Verify session keys.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid key material.
    pub fn enable_encryption(&mut self, keys: &SessionKeys) -> Result<()> {
        self.writer.crypto = Some(DirectionCrypto {
            cipher: ChaChaCipher::new(&keys.output_key).map_err(AtvError::from)?,
            nonce: 0,
        });
        self.reader.crypto = Some(DirectionCrypto {
            cipher: ChaChaCipher::new(&keys.input_key).map_err(AtvError::from)?,
            nonce: 0,
        });
        Ok(())
    }

    /// Send one protobuf frame.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or encryption failure.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.writer.send(frame).await
    }

    /// Receive the next protobuf frame.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or decryption failure.
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        self.reader.receive().await
    }

    /// Split into independently owned halves.
    #[must_use]
    pub fn split(self) -> (MrpReader, MrpWriter) {
        (self.reader, self.writer)
    }
}

impl MrpWriter {
    /// Send one protobuf frame, encrypting when enabled.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or encryption failure.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        log_protobuf("mrp >>", frame);
        let body = match &mut self.crypto {
            Some(crypto) => {
                let nonce = Nonce::from_counter(crypto.nonce);
                let sealed = crypto.cipher.encrypt(&nonce, frame)?;
                crypto.nonce += 1;
                sealed
            }
            None => frame.to_vec(),
        };

        let mut wire = BytesMut::with_capacity(body.len() + 4);
        write_varint(body.len() as u64, &mut wire);
        wire.extend_from_slice(&body);
        self.stream.write_all(&wire).await?;
        Ok(())
    }
}

impl MrpReader {
    /// Receive the next protobuf frame, decrypting when enabled.
    ///
    /// # Errors
    ///
    /// Returns [`AtvError::Connection`] when the peer closes and
    /// [`AtvError::Decryption`] on authentication failure.
    pub async fn receive(&mut self) -> Result<Vec<u8>> {
        loop {
            match peek_varint(&self.buf) {
                Ok(Some((length, width))) => {
                    let length = usize::try_from(length)
                        .map_err(|_| AtvError::Protocol("frame too large".to_string()))?;
                    if self.buf.len() >= width + length {
                        self.buf.advance(width);
                        let body = self.buf.split_to(length);
                        let frame = match &mut self.crypto {
                            Some(crypto) => {
                                let nonce = Nonce::from_counter(crypto.nonce);
                                let plain = crypto.cipher.decrypt(&nonce, &body)?;
                                crypto.nonce += 1;
                                plain
                            }
                            None => body.to_vec(),
                        };
                        log_protobuf("mrp <<", &frame);
                        return Ok(frame);
                    }
                }
                Ok(None) => {}
                Err(FrameError::VarintOverflow) => {
                    return Err(AtvError::Protocol("malformed frame length".to_string()));
                }
                Err(err) => return Err(AtvError::Protocol(err.to_string())),
            }

            let mut chunk = [0u8; 4096];
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(AtvError::Connection("MRP peer closed stream".to_string()));
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}
