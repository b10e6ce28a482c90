//! RAOP (AirTunes) audio streaming

pub mod buffer;
pub mod rtp;
pub mod sdp;
pub mod session;
pub mod streamer;


pub use buffer::{BufferedPacket, PacketBuffer};
pub use rtp::{AudioPacket, NtpTimestamp, RetransmitRequest, SyncPacket, TimingPacket};
pub use session::{RaopSession, StreamCodec, StreamProperties};
pub use streamer::RaopStreamer;
