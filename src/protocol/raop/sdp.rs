//! SDP body for the RAOP ANNOUNCE request

use super::session::StreamCodec;
use std::net::IpAddr;

/// Parameters announced to the receiver.
#[derive(Debug, Clone)]
pub struct AnnounceParams {
    /// Session id used in the RTSP URL
    pub session_id: u32,
    /// Our address
    pub local_address: IpAddr,
    /// Receiver address
    pub remote_address: IpAddr,
    /// Audio codec
    pub codec: StreamCodec,
    /// Sample rate
    pub sample_rate: u32,
    /// Channel count
    pub channels: u16,
    /// Frames per packet
    pub frames_per_packet: u32,
}

fn ip_version(addr: IpAddr) -> &'static str {
    match addr {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    }
}

/// Render the ANNOUNCE SDP body.
#[must_use]
pub fn announce_body(params: &AnnounceParams) -> String {
    let rtpmap = match params.codec {
        StreamCodec::Pcm => format!(
            "a=rtpmap:96 L16/{}/{}\r\n",
            params.sample_rate, params.channels
        ),
        StreamCodec::Alac => format!(
            "a=rtpmap:96 AppleLossless\r\na=fmtp:96 {} 0 16 40 10 14 {} 255 0 0 {}\r\n",
            params.frames_per_packet, params.channels, params.sample_rate
        ),
    };

    format!(
        "v=0\r\n\
         o=iTunes {} 0 IN {} {}\r\n\
         s=iTunes\r\n\
         c=IN {} {}\r\n\
         t=0 0\r\n\
         m=audio 0 RTP/AVP 96\r\n\
         {rtpmap}",
        params.session_id,
        ip_version(params.local_address),
        params.local_address,
        ip_version(params.remote_address),
        params.remote_address,
    )
}
