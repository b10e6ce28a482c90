//! RTP audio packets and RTCP control/timing messages

use crate::error::AtvError;

/// RTP payload types used by RAOP.
pub mod payload_type {
    /// Timing request
    pub const TIMING_REQUEST: u8 = 0x52;
    /// Timing response
    pub const TIMING_RESPONSE: u8 = 0x53;
    /// Retransmit request (receiver to sender)
    pub const RETRANSMIT_REQUEST: u8 = 0x55;
    /// Retransmit response (sender to receiver)
    pub const RETRANSMIT_RESPONSE: u8 = 0x56;
    /// Sync packet
    pub const SYNC: u8 = 0x54;
    /// Realtime audio
    pub const AUDIO: u8 = 0x60;
}

/// 64-bit NTP timestamp (seconds since 1900).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NtpTimestamp {
    /// Whole seconds
    pub seconds: u32,
    /// Fraction of a second in 1/2^32 units
    pub fraction: u32,
}

impl NtpTimestamp {
    const UNIX_OFFSET: u64 = 2_208_988_800;

    /// Current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        #[allow(clippy::cast_possible_truncation)]
        Self {
            seconds: (since_epoch.as_secs() + Self::UNIX_OFFSET) as u32,
            fraction: ((u64::from(since_epoch.subsec_nanos()) << 32) / 1_000_000_000) as u32,
        }
    }

    /// Encode to 8 big-endian bytes.
    #[must_use]
    pub fn encode(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&self.seconds.to_be_bytes());
        buf[4..].copy_from_slice(&self.fraction.to_be_bytes());
        buf
    }

    /// Decode from 8 bytes.
    #[must_use]
    pub fn decode(buf: &[u8; 8]) -> Self {
        Self {
            seconds: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            fraction: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// Realtime audio packet: 12-byte RTP header plus payload.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    /// Marker bit, set on the first packet after start or flush
    pub first: bool,
    /// Monotonic sequence number
    pub sequence: u16,
    /// RTP timestamp: frames sent so far
    pub timestamp: u32,
    /// Synchronization source
    pub ssrc: u32,
}

impl AudioPacket {
    /// RTP header size.
    pub const HEADER_SIZE: usize = 12;

    /// Encode header plus payload.
    #[must_use]
    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + payload.len());
        buf.push(0x80);
        buf.push(if self.first {
            0x80 | payload_type::AUDIO
        } else {
            payload_type::AUDIO
        });
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }
}

/// Retransmit request: receiver lost `(first_seq, count)` packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitRequest {
    /// First missing sequence number
    pub first_sequence: u16,
    /// Number of missing packets
    pub count: u16,
}

impl RetransmitRequest {
    /// Parse from a control-port datagram.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is too short or of the wrong
    /// type.
    pub fn decode(data: &[u8]) -> Result<Self, AtvError> {
        if data.len() < 8 {
            return Err(AtvError::Protocol("short retransmit request".to_string()));
        }
        if data[1] & 0x7F != payload_type::RETRANSMIT_REQUEST {
            return Err(AtvError::Protocol(format!(
                "not a retransmit request: payload type 0x{:02x}",
                data[1] & 0x7F
            )));
        }
        Ok(Self {
            first_sequence: u16::from_be_bytes([data[4], data[5]]),
            count: u16::from_be_bytes([data[6], data[7]]),
        })
    }

    /// Encode (used by fake receivers in tests).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.push(0x80);
        buf.push(0x80 | payload_type::RETRANSMIT_REQUEST);
        buf.extend_from_slice(&1u16.to_be_bytes());
        buf.extend_from_slice(&self.first_sequence.to_be_bytes());
        buf.extend_from_slice(&self.count.to_be_bytes());
        buf
    }
}

/// Wrap an original audio packet for retransmission on the control
/// port: retransmit marker header followed by the original packet.
#[must_use]
pub fn retransmit_wrap(original: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + original.len());
    buf.push(0x80);
    buf.push(0x80 | payload_type::RETRANSMIT_RESPONSE);
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(original);
    buf
}

/// Sync packet keeping receivers aligned with the sender timeline.
#[derive(Debug, Clone, Copy)]
pub struct SyncPacket {
    /// RTP time matching `now` minus latency
    pub rtp_timestamp: u32,
    /// Wall clock at `rtp_timestamp`
    pub ntp_time: NtpTimestamp,
    /// RTP time of the next outgoing packet
    pub next_timestamp: u32,
    /// Set on the first sync after RECORD
    pub first: bool,
}

impl SyncPacket {
    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(20);
        buf.push(if self.first { 0x90 } else { 0x80 });
        buf.push(0x80 | payload_type::SYNC);
        buf.extend_from_slice(&7u16.to_be_bytes());
        buf.extend_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ntp_time.encode());
        buf.extend_from_slice(&self.next_timestamp.to_be_bytes());
        buf
    }
}

/// NTP-style four-timestamp timing exchange.
#[derive(Debug, Clone, Copy)]
pub struct TimingPacket {
    /// Response or request
    pub is_response: bool,
    /// Sender's reference time (echoed from the request)
    pub reference_time: NtpTimestamp,
    /// Time the request was received
    pub receive_time: NtpTimestamp,
    /// Time this packet was sent
    pub send_time: NtpTimestamp,
}

impl TimingPacket {
    /// Packet size: 8-byte header plus three timestamps.
    pub const SIZE: usize = 32;

    /// Parse a timing request or response.
    ///
    /// # Errors
    ///
    /// Returns an error for short or mistyped packets.
    pub fn decode(data: &[u8]) -> Result<Self, AtvError> {
        if data.len() < Self::SIZE {
            return Err(AtvError::Protocol("short timing packet".to_string()));
        }
        let payload = data[1] & 0x7F;
        let is_response = match payload {
            payload_type::TIMING_REQUEST => false,
            payload_type::TIMING_RESPONSE => true,
            other => {
                return Err(AtvError::Protocol(format!(
                    "not a timing packet: payload type 0x{other:02x}"
                )));
            }
        };
        let ts = |offset: usize| {
            let bytes: [u8; 8] = data[offset..offset + 8]
                .try_into()
                .unwrap_or([0; 8]);
            NtpTimestamp::decode(&bytes)
        };
        Ok(Self {
            is_response,
            reference_time: ts(8),
            receive_time: ts(16),
            send_time: ts(24),
        })
    }

    /// Build the immediate response to a timing request: the request's
    /// send time becomes the reference, receive and send are now.
    #[must_use]
    pub fn response_to(request: &Self) -> Self {
        let now = NtpTimestamp::now();
        Self {
            is_response: true,
            reference_time: request.send_time,
            receive_time: now,
            send_time: now,
        }
    }

    /// Encode to bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.push(0x80);
        buf.push(if self.is_response {
            0x80 | payload_type::TIMING_RESPONSE
        } else {
            0x80 | payload_type::TIMING_REQUEST
        });
        buf.extend_from_slice(&7u16.to_be_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&self.reference_time.encode());
        buf.extend_from_slice(&self.receive_time.encode());
        buf.extend_from_slice(&self.send_time.encode());
        buf
    }
}
