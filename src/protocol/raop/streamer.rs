//! RAOP audio streamer
//!
//! Pulls decoded PCM from a source, converts it to the announced
//! format, packetizes with monotonic sequence numbers and RTP
//! timestamps equal to frames sent, and schedules sends at absolute
//! instants so cumulative drift stays zero. A ring of recent packets
//! answers retransmit requests on the control port; timing requests are
//! answered immediately from the monotonic clock.

use super::buffer::{BufferedPacket, PacketBuffer};
use super::rtp::{AudioPacket, RetransmitRequest, SyncPacket, TimingPacket, retransmit_wrap};
use super::session::{RaopSession, StreamCodec, StreamProperties, TransportPorts};
use crate::audio::{AudioFormat, AudioStream, Converter};
use crate::error::Result;
use bytes::Bytes;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Silence preroll filling the receiver buffer before audio starts.
const PREROLL: Duration = Duration::from_secs(2);
/// Sync packet interval.
const SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a finished stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamStats {
    /// Total frames sent, including preroll silence
    pub frames_sent: u64,
    /// Frames of actual content
    pub content_frames: u64,
}

/// Map a volume percentage to the RAOP dB scale.
///
/// 0% mutes (-144 dB); otherwise the scale runs linearly from -30 to 0.
#[must_use]
pub fn volume_to_db(percent: f32) -> f32 {
    if percent <= 0.0 {
        -144.0
    } else {
        -30.0 + (percent.min(100.0) / 100.0) * 30.0
    }
}

/// Convert PCM16 samples to the big-endian bytes RAOP expects.
fn pcm_to_be_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        out.extend_from_slice(&sample.to_be_bytes());
    }
    out
}

/// Encode one packet's samples in the announced codec.
fn encode_payload(
    codec: StreamCodec,
    alac: Option<&mut alac_encoder::AlacEncoder>,
    input_format: &alac_encoder::FormatDescription,
    samples: &[i16],
) -> Vec<u8> {
    match codec {
        StreamCodec::Pcm => pcm_to_be_bytes(samples),
        StreamCodec::Alac => {
            let mut input = Vec::with_capacity(samples.len() * 2);
            for sample in samples {
                input.extend_from_slice(&sample.to_le_bytes());
            }
            match alac {
                Some(encoder) => {
                    let mut output = vec![0u8; input.len() + 64];
                    let size = encoder.encode(input_format, &input, &mut output);
                    output.truncate(size);
                    output
                }
                None => pcm_to_be_bytes(samples),
            }
        }
    }
}

/// The streaming engine for one RAOP session.
pub struct RaopStreamer {
    session: RaopSession,
    properties: StreamProperties,
    remote_address: IpAddr,
    sequence: u16,
    frames_sent: u64,
    ssrc: u32,
    ring: Arc<StdMutex<PacketBuffer>>,
}

impl RaopStreamer {
    /// Create a streamer over an established RTSP session.
    #[must_use]
    pub fn new(session: RaopSession, properties: StreamProperties, remote_address: IpAddr) -> Self {
        Self {
            session,
            properties,
            remote_address,
            sequence: 0,
            frames_sent: 0,
            ssrc: rand::random(),
            ring: Arc::new(StdMutex::new(PacketBuffer::default())),
        }
    }

    /// Total frames sent so far.
    #[must_use]
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Run the complete stream: bring-up, preroll, paced audio,
    /// teardown.
    ///
    /// # Errors
    ///
    /// Fails when the RTSP exchange or socket I/O fails.
    pub async fn stream(
        mut self,
        mut source: AudioStream,
        local_address: IpAddr,
        volume_percent: f32,
    ) -> Result<StreamStats> {
        let audio_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let control_socket = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?);
        let timing_socket = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?);

        // RTSP bring-up
        self.session.options().await?;
        self.session
            .announce(self.properties, local_address, self.remote_address)
            .await?;
        let ports = self
            .session
            .setup(
                control_socket.local_addr()?.port(),
                timing_socket.local_addr()?.port(),
            )
            .await?;
        self.session.record(self.sequence, 0).await?;
        self.session.set_volume(volume_to_db(volume_percent)).await?;

        // Initial metadata, refreshed when the source reports changes
        let metadata = source.metadata.clone();
        #[allow(clippy::cast_possible_truncation)]
        self.session
            .set_metadata(
                self.frames_sent as u32,
                metadata.title.as_deref(),
                metadata.artist.as_deref(),
                metadata.album.as_deref(),
            )
            .await?;
        if let Some((artwork, mimetype)) = &metadata.artwork {
            #[allow(clippy::cast_possible_truncation)]
            self.session
                .set_artwork(self.frames_sent as u32, mimetype, artwork.clone())
                .await?;
        }

        let retransmit_task = spawn_retransmit_listener(
            control_socket.clone(),
            SocketAddr::new(self.remote_address, ports.control_port),
            self.ring.clone(),
        );
        let timing_task = spawn_timing_responder(timing_socket.clone());

        let result = self
            .pump_audio(&mut source, &audio_socket, &control_socket, &ports)
            .await;

        retransmit_task.abort();
        timing_task.abort();
        self.session.teardown().await.ok();

        result
    }

    async fn pump_audio(
        &mut self,
        source: &mut AudioStream,
        audio_socket: &UdpSocket,
        control_socket: &UdpSocket,
        ports: &TransportPorts,
    ) -> Result<StreamStats> {
        let audio_target = SocketAddr::new(self.remote_address, ports.server_port);
        let control_target = SocketAddr::new(self.remote_address, ports.control_port);
        let frames_per_packet = self.properties.frames_per_packet as usize;
        let channels = usize::from(self.properties.channels);
        let samples_per_packet = frames_per_packet * channels;
        let sample_rate = f64::from(self.properties.sample_rate);

        let target_format = AudioFormat {
            sample_rate: self.properties.sample_rate,
            channels: self.properties.channels,
        };
        let mut converter = Converter::new(source.format, target_format)?;

        let alac_output = alac_encoder::FormatDescription::alac(
            f64::from(self.properties.sample_rate),
            self.properties.frames_per_packet,
            u32::from(self.properties.channels),
        );
        let alac_input = alac_encoder::FormatDescription::pcm::<i16>(
            f64::from(self.properties.sample_rate),
            u32::from(self.properties.channels),
        );
        let mut alac = (self.properties.codec == StreamCodec::Alac)
            .then(|| alac_encoder::AlacEncoder::new(&alac_output));

        let start = Instant::now();
        let mut first_packet = true;
        let mut last_sync = Instant::now() - SYNC_INTERVAL;

        // Preroll: silence packets sent immediately keep the receiver
        // buffer ahead of the wall clock for the whole stream
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let preroll_frames = (PREROLL.as_secs_f64() * sample_rate) as u64;
        let mut preroll_remaining = preroll_frames;
        let silence = vec![0i16; samples_per_packet];
        while preroll_remaining > 0 {
            let payload = encode_payload(
                self.properties.codec,
                alac.as_mut(),
                &alac_input,
                &silence,
            );
            self.send_packet(audio_socket, audio_target, &payload, first_packet)
                .await?;
            first_packet = false;
            preroll_remaining = preroll_remaining.saturating_sub(frames_per_packet as u64);
        }

        let mut pending: Vec<i16> = Vec::new();
        let mut content_frames: u64 = 0;
        let mut drained = false;

        loop {
            // Fill one packet's worth of converted samples
            while pending.len() < samples_per_packet && !drained {
                match source.chunks.recv().await {
                    Some(chunk) => pending.extend(converter.push(&chunk)?),
                    None => {
                        pending.extend(converter.finish()?);
                        drained = true;
                    }
                }
            }
            if pending.is_empty() && drained {
                break;
            }
            let mut samples: Vec<i16> = pending
                .drain(..pending.len().min(samples_per_packet))
                .collect();
            // Final short packet is zero-padded to keep packet sizes fixed
            samples.resize(samples_per_packet, 0);

            // Absolute-time pacing: frames beyond the preroll map to
            // wall time so drift cannot accumulate
            let content_sent = self.frames_sent.saturating_sub(preroll_frames);
            #[allow(clippy::cast_precision_loss)]
            let due = start + Duration::from_secs_f64(content_sent as f64 / sample_rate);
            tokio::time::sleep_until(due).await;

            if last_sync.elapsed() >= SYNC_INTERVAL {
                let sync = SyncPacket {
                    #[allow(clippy::cast_possible_truncation)]
                    rtp_timestamp: self.frames_sent as u32,
                    ntp_time: super::rtp::NtpTimestamp::now(),
                    #[allow(clippy::cast_possible_truncation)]
                    next_timestamp: (self.frames_sent + frames_per_packet as u64) as u32,
                    first: content_sent == 0,
                };
                control_socket
                    .send_to(&sync.encode(), control_target)
                    .await?;
                last_sync = Instant::now();
            }

            let payload = encode_payload(
                self.properties.codec,
                alac.as_mut(),
                &alac_input,
                &samples,
            );
            self.send_packet(audio_socket, audio_target, &payload, first_packet)
                .await?;
            first_packet = false;
            content_frames += frames_per_packet as u64;
        }

        debug!(
            "stream complete: {} frames ({} content)",
            self.frames_sent, content_frames
        );
        Ok(StreamStats {
            frames_sent: self.frames_sent,
            content_frames,
        })
    }

    async fn send_packet(
        &mut self,
        socket: &UdpSocket,
        target: SocketAddr,
        payload: &[u8],
        first: bool,
    ) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let packet = AudioPacket {
            first,
            sequence: self.sequence,
            timestamp: self.frames_sent as u32,
            ssrc: self.ssrc,
        };
        let encoded = packet.encode(payload);
        socket.send_to(&encoded, target).await?;

        self.ring
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(BufferedPacket {
                sequence: self.sequence,
                timestamp: packet.timestamp,
                data: Bytes::from(encoded),
            });

        self.sequence = self.sequence.wrapping_add(1);
        self.frames_sent += u64::from(self.properties.frames_per_packet);
        Ok(())
    }
}

/// Answer NACKs from the ring buffer, in order, with the retransmit
/// marker. Missing entries are silently dropped.
#[must_use]
pub fn retransmit_packets(
    ring: &PacketBuffer,
    request: &RetransmitRequest,
) -> Vec<Vec<u8>> {
    ring.get_range(request.first_sequence, request.count)
        .into_iter()
        .map(|packet| retransmit_wrap(&packet.data))
        .collect()
}

fn spawn_retransmit_listener(
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    ring: Arc<StdMutex<PacketBuffer>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 2048];
        loop {
            let Ok((len, _)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(request) = RetransmitRequest::decode(&buf[..len]) else {
                continue;
            };
            trace!(
                "retransmit request: {} from {}",
                request.count, request.first_sequence
            );
            let packets = {
                let ring = ring
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                retransmit_packets(&ring, &request)
            };
            for packet in packets {
                if socket.send_to(&packet, target).await.is_err() {
                    return;
                }
            }
        }
    })
}

fn spawn_timing_responder(socket: Arc<UdpSocket>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 128];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Ok(request) = TimingPacket::decode(&buf[..len]) else {
                continue;
            };
            if request.is_response {
                continue;
            }
            let response = TimingPacket::response_to(&request);
            if socket.send_to(&response.encode(), from).await.is_err() {
                return;
            }
        }
    })
}

/// Frames-sent invariant used by callers: the stream never drifts more
/// than one packet from `duration * sample_rate`.
#[must_use]
pub fn expected_frames(duration: Duration, sample_rate: u32, frames_per_packet: u32) -> (u64, u64) {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let exact = (duration.as_secs_f64() * f64::from(sample_rate)) as u64;
    (
        exact.saturating_sub(u64::from(frames_per_packet)),
        exact + u64::from(frames_per_packet),
    )
}
