//! RAOP RTSP session bring-up and parameter control

use super::sdp::{AnnounceParams, announce_body};
use crate::error::{AtvError, Result};
use crate::net::{HttpConnection, HttpRequest, HttpResponse};
use crate::protocol::dmap::{DmapItem, DmapValue, encode as dmap_encode};
use base64::Engine;
use rand::Rng;
use std::net::IpAddr;
use tracing::debug;

/// Codec negotiated for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCodec {
    /// Raw big-endian PCM16
    Pcm,
    /// Apple Lossless
    Alac,
}

/// Stream parameters declared in ANNOUNCE.
#[derive(Debug, Clone, Copy)]
pub struct StreamProperties {
    /// Audio codec
    pub codec: StreamCodec,
    /// Sample rate
    pub sample_rate: u32,
    /// Channels
    pub channels: u16,
    /// Frames per RTP packet (352 for ALAC-sized frames)
    pub frames_per_packet: u32,
}

impl Default for StreamProperties {
    fn default() -> Self {
        Self {
            codec: StreamCodec::Alac,
            sample_rate: 44_100,
            channels: 2,
            frames_per_packet: 352,
        }
    }
}

/// Receiver transport ports from SETUP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportPorts {
    /// Audio data port
    pub server_port: u16,
    /// Control (sync and retransmit) port
    pub control_port: u16,
    /// Timing port
    pub timing_port: u16,
}

/// One RTSP control session for an audio stream.
pub struct RaopSession {
    connection: HttpConnection,
    url: String,
    session_id: u32,
    cseq: u32,
    rtsp_session: Option<String>,
    dacp_id: String,
    active_remote: String,
    password: Option<String>,
}

pub(crate) fn parse_transport(response: &HttpResponse) -> TransportPorts {
    let mut ports = TransportPorts::default();
    if let Some(transport) = response.headers.get("transport") {
        for part in transport.split(';') {
            if let Some((key, value)) = part.split_once('=')
                && let Ok(port) = value.trim().parse::<u16>()
            {
                match key.trim() {
                    "server_port" => ports.server_port = port,
                    "control_port" => ports.control_port = port,
                    "timing_port" => ports.timing_port = port,
                    _ => {}
                }
            }
        }
    }
    ports
}

/// RTSP digest authentication response per RFC 2069.
pub(crate) fn digest_response(
    username: &str,
    password: &str,
    realm: &str,
    nonce: &str,
    method: &str,
    uri: &str,
) -> String {
    let ha1 = format!("{:x}", md5::compute(format!("{username}:{realm}:{password}")));
    let ha2 = format!("{:x}", md5::compute(format!("{method}:{uri}")));
    format!("{:x}", md5::compute(format!("{ha1}:{nonce}:{ha2}")))
}

fn parse_auth_param<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    header.split(',').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name.trim().eq_ignore_ascii_case(key)).then(|| value.trim().trim_matches('"'))
    })
}

impl RaopSession {
    /// Create a session over an established RTSP connection.
    #[must_use]
    pub fn new(connection: HttpConnection, local_address: IpAddr) -> Self {
        let session_id: u32 = rand::thread_rng().r#gen();
        Self {
            connection,
            url: format!("rtsp://{local_address}/{session_id}"),
            session_id,
            cseq: 0,
            rtsp_session: None,
            dacp_id: format!("{:016X}", rand::thread_rng().r#gen::<u64>()),
            active_remote: format!("{}", rand::thread_rng().r#gen::<u32>()),
            password: None,
        }
    }

    /// Set the access password used for digest authentication.
    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }

    /// Stream session id (also used in the RTSP URL).
    #[must_use]
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    fn base_request(&mut self, method: &str, url: Option<&str>) -> HttpRequest {
        self.cseq += 1;
        let mut request = HttpRequest::rtsp(method, url.unwrap_or(&self.url))
            .with_header("CSeq", self.cseq.to_string())
            .with_header("User-Agent", "AirPlay/320.20")
            .with_header("DACP-ID", self.dacp_id.clone())
            .with_header("Active-Remote", self.active_remote.clone())
            .with_header("Client-Instance", self.dacp_id.clone());
        if let Some(session) = &self.rtsp_session {
            request = request.with_header("Session", session.clone());
        }
        request
    }

    async fn exchange(&mut self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.connection.send(&request).await?;

        // Password-protected receivers challenge with digest auth
        if response.code == 401 {
            let Some(password) = self.password.clone() else {
                return Err(AtvError::auth("receiver requires a password"));
            };
            let challenge = response
                .headers
                .get("www-authenticate")
                .unwrap_or_default()
                .to_string();
            let realm = parse_auth_param(&challenge, "realm").unwrap_or("raop");
            let nonce = parse_auth_param(&challenge, "nonce").unwrap_or_default();
            let answer = digest_response(
                "iTunes",
                &password,
                realm,
                nonce,
                &request.method,
                &request.path,
            );
            let authorization = format!(
                "Digest username=\"iTunes\", realm=\"{realm}\", nonce=\"{nonce}\", \
                 uri=\"{}\", response=\"{answer}\"",
                request.path
            );
            let retry = request.with_header("Authorization", authorization);
            let response = self.connection.send(&retry).await?;
            if response.code == 401 {
                return Err(AtvError::auth("receiver rejected password"));
            }
            return Self::check(response);
        }

        Self::check(response)
    }

    fn check(response: HttpResponse) -> Result<HttpResponse> {
        if response.is_ok() {
            Ok(response)
        } else {
            Err(AtvError::Protocol(format!(
                "RTSP error {} {}",
                response.code, response.message
            )))
        }
    }

    /// OPTIONS with an Apple-Challenge, starting the exchange.
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the request.
    pub async fn options(&mut self) -> Result<()> {
        let mut challenge = [0u8; 16];
        rand::thread_rng().fill(&mut challenge);
        let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(challenge);

        let request = self
            .base_request("OPTIONS", Some("*"))
            .with_header("Apple-Challenge", encoded);
        self.exchange(request).await?;
        Ok(())
    }

    /// ANNOUNCE the stream format.
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the SDP.
    pub async fn announce(
        &mut self,
        properties: StreamProperties,
        local_address: IpAddr,
        remote_address: IpAddr,
    ) -> Result<()> {
        let body = announce_body(&AnnounceParams {
            session_id: self.session_id,
            local_address,
            remote_address,
            codec: properties.codec,
            sample_rate: properties.sample_rate,
            channels: properties.channels,
            frames_per_packet: properties.frames_per_packet,
        });
        let request = self
            .base_request("ANNOUNCE", None)
            .with_header("Content-Type", "application/sdp")
            .with_body(body.into_bytes());
        self.exchange(request).await?;
        Ok(())
    }

    /// SETUP our transport ports; returns the receiver's.
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the transport.
    pub async fn setup(&mut self, control_port: u16, timing_port: u16) -> Result<TransportPorts> {
        let transport = format!(
            "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;\
             control_port={control_port};timing_port={timing_port}"
        );
        let request = self
            .base_request("SETUP", None)
            .with_header("Transport", transport);
        let response = self.exchange(request).await?;

        if let Some(session) = response.headers.get("session") {
            self.rtsp_session = Some(session.to_string());
        }
        let ports = parse_transport(&response);
        debug!(
            "receiver ports: audio {} control {} timing {}",
            ports.server_port, ports.control_port, ports.timing_port
        );
        Ok(ports)
    }

    /// RECORD: begin streaming at a sequence/timestamp origin.
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the request.
    pub async fn record(&mut self, sequence: u16, rtp_time: u32) -> Result<()> {
        let request = self
            .base_request("RECORD", None)
            .with_header("Range", "npt=0-")
            .with_header(
                "RTP-Info",
                format!("seq={sequence};rtptime={rtp_time}"),
            );
        self.exchange(request).await?;
        Ok(())
    }

    /// Set playback volume in dB (-30.0 to 0.0; -144.0 mutes).
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the parameter.
    pub async fn set_volume(&mut self, volume_db: f32) -> Result<()> {
        let body = format!("volume: {volume_db:.6}\r\n");
        let request = self
            .base_request("SET_PARAMETER", None)
            .with_header("Content-Type", "text/parameters")
            .with_body(body.into_bytes());
        self.exchange(request).await?;
        Ok(())
    }

    /// Push track metadata as DAAP tags.
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the parameter.
    pub async fn set_metadata(
        &mut self,
        rtp_time: u32,
        title: Option<&str>,
        artist: Option<&str>,
        album: Option<&str>,
    ) -> Result<()> {
        let mut children = Vec::new();
        if let Some(title) = title {
            children.push(DmapItem::new(b"minm", DmapValue::Str(title.to_string())));
        }
        if let Some(artist) = artist {
            children.push(DmapItem::new(b"asar", DmapValue::Str(artist.to_string())));
        }
        if let Some(album) = album {
            children.push(DmapItem::new(b"asal", DmapValue::Str(album.to_string())));
        }
        let blob = dmap_encode(&[DmapItem::new(b"mlit", DmapValue::Container(children))]);

        let request = self
            .base_request("SET_PARAMETER", None)
            .with_header("Content-Type", "application/x-dmap-tagged")
            .with_header("RTP-Info", format!("rtptime={rtp_time}"))
            .with_body(blob);
        self.exchange(request).await?;
        Ok(())
    }

    /// Push cover art.
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the parameter.
    pub async fn set_artwork(
        &mut self,
        rtp_time: u32,
        mimetype: &str,
        artwork: Vec<u8>,
    ) -> Result<()> {
        let request = self
            .base_request("SET_PARAMETER", None)
            .with_header("Content-Type", mimetype.to_string())
            .with_header("RTP-Info", format!("rtptime={rtp_time}"))
            .with_body(artwork);
        self.exchange(request).await?;
        Ok(())
    }

    /// Report playback progress.
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the parameter.
    pub async fn set_progress(&mut self, start: u32, current: u32, end: u32) -> Result<()> {
        let body = format!("progress: {start}/{current}/{end}\r\n");
        let request = self
            .base_request("SET_PARAMETER", None)
            .with_header("Content-Type", "text/parameters")
            .with_body(body.into_bytes());
        self.exchange(request).await?;
        Ok(())
    }

    /// FLUSH pending audio.
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the request.
    pub async fn flush(&mut self, sequence: u16, rtp_time: u32) -> Result<()> {
        let request = self.base_request("FLUSH", None).with_header(
            "RTP-Info",
            format!("seq={sequence};rtptime={rtp_time}"),
        );
        self.exchange(request).await?;
        Ok(())
    }

    /// TEARDOWN the session.
    ///
    /// # Errors
    ///
    /// Fails when the receiver rejects the request.
    pub async fn teardown(&mut self) -> Result<()> {
        let request = self.base_request("TEARDOWN", None);
        self.exchange(request).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) use {digest_response as digest_for_tests, parse_transport as transport_for_tests};
