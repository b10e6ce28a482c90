//! Companion frame layer
//!
//! Frames are `[type: u8][length: 3-byte big-endian][payload]`. After
//! pairing, OPACK payloads are encrypted with ChaCha20-Poly1305 using
//! per-direction nonce counters and the frame header as associated
//! data.

use crate::error::{AtvError, Result};
use crate::protocol::crypto::{ChaChaCipher, HkdfSha512, Nonce};
use crate::protocol::hap::SessionKeys;
use crate::util::log_binary;
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

/// Companion frame types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Keep-alive
    NoOp = 0x00,
    /// Pair-Setup start
    PsStart = 0x03,
    /// Pair-Setup continuation
    PsNext = 0x04,
    /// Pair-Verify start
    PvStart = 0x05,
    /// Pair-Verify continuation
    PvNext = 0x06,
    /// Unencrypted OPACK
    UOpack = 0x07,
    /// Encrypted OPACK
    EOpack = 0x08,
    /// Plaintext OPACK
    POpack = 0x09,
}

impl FrameType {
    /// Parse from the wire byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::NoOp,
            0x03 => Self::PsStart,
            0x04 => Self::PsNext,
            0x05 => Self::PvStart,
            0x06 => Self::PvNext,
            0x07 => Self::UOpack,
            0x08 => Self::EOpack,
            0x09 => Self::POpack,
            _ => return None,
        })
    }

    /// True for frame types whose payload is encrypted once a session
    /// is established.
    #[must_use]
    pub fn is_encrypted(self) -> bool {
        self == Self::EOpack
    }
}

struct DirectionCrypto {
    cipher: ChaChaCipher,
    nonce: u64,
}

/// Reading half.
pub struct CompanionReader {
    stream: ReadHalf<TcpStream>,
    buf: BytesMut,
    crypto: Option<DirectionCrypto>,
}

/// Writing half.
pub struct CompanionWriter {
    stream: WriteHalf<TcpStream>,
    crypto: Option<DirectionCrypto>,
}

/// One Companion link connection.
pub struct CompanionConnection {
    reader: CompanionReader,
    writer: CompanionWriter,
}

#[cfg(test)]
pub(crate) fn frame_header_for_tests(frame_type: FrameType, length: usize) -> [u8; 4] {
    frame_header(frame_type, length)
}

#[allow(clippy::cast_possible_truncation)]
fn frame_header(frame_type: FrameType, length: usize) -> [u8; 4] {
    [
        frame_type as u8,
        ((length >> 16) & 0xFF) as u8,
        ((length >> 8) & 0xFF) as u8,
        (length & 0xFF) as u8,
    ]
}

impl CompanionConnection {
    /// Connect to a Companion service.
    ///
    /// # Errors
    ///
    /// Returns an error when the TCP connection fails.
    pub async fn connect(remote: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(remote).await?;
        stream.set_nodelay(true)?;
        let (read, write) = tokio::io::split(stream);
        Ok(Self {
            reader: CompanionReader {
                stream: read,
                buf: BytesMut::with_capacity(4096),
                crypto: None,
            },
            writer: CompanionWriter {
                stream: write,
                crypto: None,
            },
        })
    }

    /// Derive and install frame encryption from a pairing session.
    ///
    /// The Companion link derives its channel keys with the
    /// `ClientEncrypt-main` / `ServerEncrypt-main` info strings from
    /// the raw shared secret.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid key material.
    pub fn enable_encryption(&mut self, keys: &SessionKeys) -> Result<()> {
        let hkdf = HkdfSha512::new(None, &keys.shared_secret);
        let output_key = hkdf
            .expand_fixed::<32>(b"ClientEncrypt-main")
            .map_err(AtvError::from)?;
        let input_key = hkdf
            .expand_fixed::<32>(b"ServerEncrypt-main")
            .map_err(AtvError::from)?;

        self.writer.crypto = Some(DirectionCrypto {
            cipher: ChaChaCipher::new(&output_key).map_err(AtvError::from)?,
            nonce: 0,
        });
        self.reader.crypto = Some(DirectionCrypto {
            cipher: ChaChaCipher::new(&input_key).map_err(AtvError::from)?,
            nonce: 0,
        });
        Ok(())
    }

    /// Send one frame.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or encryption failure.
    pub async fn send(&mut self, frame_type: FrameType, payload: &[u8]) -> Result<()> {
        self.writer.send(frame_type, payload).await
    }

    /// Receive the next frame.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or decryption failure.
    pub async fn receive(&mut self) -> Result<(FrameType, Vec<u8>)> {
        self.reader.receive().await
    }

    /// Split into independently owned halves.
    #[must_use]
    pub fn split(self) -> (CompanionReader, CompanionWriter) {
        (self.reader, self.writer)
    }
}

impl CompanionWriter {
    /// Send one frame, encrypting data frames when keys are installed.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O or encryption failure.
    pub async fn send(&mut self, frame_type: FrameType, payload: &[u8]) -> Result<()> {
        log_binary("companion >>", payload);
        let body = match &mut self.crypto {
            Some(crypto) if frame_type.is_encrypted() => {
                let header = frame_header(frame_type, payload.len() + 16);
                let nonce = Nonce::from_counter(crypto.nonce);
                let sealed = crypto.cipher.encrypt_with_aad(&nonce, &header, payload)?;
                crypto.nonce += 1;
                sealed
            }
            _ => payload.to_vec(),
        };

        let header = frame_header(frame_type, body.len());
        self.stream.write_all(&header).await?;
        self.stream.write_all(&body).await?;
        Ok(())
    }
}

impl CompanionReader {
    /// Receive the next frame, decrypting data frames when keys are
    /// installed.
    ///
    /// # Errors
    ///
    /// Returns [`AtvError::Connection`] when the peer closes.
    pub async fn receive(&mut self) -> Result<(FrameType, Vec<u8>)> {
        loop {
            if self.buf.len() >= 4 {
                let length = (usize::from(self.buf[1]) << 16)
                    | (usize::from(self.buf[2]) << 8)
                    | usize::from(self.buf[3]);
                if self.buf.len() >= 4 + length {
                    let frame_type = FrameType::from_byte(self.buf[0]).ok_or_else(|| {
                        AtvError::Protocol(format!("unknown frame type 0x{:02x}", self.buf[0]))
                    })?;
                    let header: [u8; 4] = self.buf[..4]
                        .try_into()
                        .unwrap_or([frame_type as u8, 0, 0, 0]);
                    self.buf.advance(4);
                    let body = self.buf.split_to(length);

                    let payload = match &mut self.crypto {
                        Some(crypto) if frame_type.is_encrypted() => {
                            let nonce = Nonce::from_counter(crypto.nonce);
                            let plain =
                                crypto.cipher.decrypt_with_aad(&nonce, &header, &body)?;
                            crypto.nonce += 1;
                            plain
                        }
                        _ => body.to_vec(),
                    };
                    log_binary("companion <<", &payload);
                    return Ok((frame_type, payload));
                }
            }

            let mut chunk = [0u8; 4096];
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(AtvError::Connection(
                    "companion peer closed stream".to_string(),
                ));
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }
}
