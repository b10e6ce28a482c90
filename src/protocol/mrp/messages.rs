//! MRP protobuf messages
//!
//! The outer [`ProtocolMessage`] carries a type discriminator and the
//! inner payload as extension fields sharing the same byte stream. Each
//! payload struct is declared with its extension tag; decoding runs the
//! full frame through the matching wrapper, so unknown outer fields are
//! skipped tolerantly. Dispatch is an enum-indexed table built once at
//! load.

#![allow(missing_docs)]

use prost::Message;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Outer message types.
pub mod message_type {
    pub const GENERIC: i32 = 1;
    pub const SEND_COMMAND: i32 = 3;
    pub const COMMAND_RESULT: i32 = 4;
    pub const SET_STATE: i32 = 6;
    pub const SEND_HID_EVENT: i32 = 10;
    pub const DEVICE_INFO: i32 = 15;
    pub const CLIENT_UPDATES_CONFIG: i32 = 16;
    pub const VOLUME_CONTROL_AVAILABILITY: i32 = 17;
    pub const KEYBOARD: i32 = 21;
    pub const GET_KEYBOARD_SESSION: i32 = 22;
    pub const TEXT_INPUT: i32 = 23;
    pub const SET_CONNECTION_STATE: i32 = 32;
    pub const CRYPTO_PAIRING: i32 = 34;
    pub const SET_NOW_PLAYING_CLIENT: i32 = 46;
    pub const UPDATE_CLIENT: i32 = 55;
    pub const UPDATE_CONTENT_ITEM: i32 = 56;
    pub const WAKE_DEVICE: i32 = 58;
    pub const UPDATE_OUTPUT_DEVICE: i32 = 59;
    pub const PLAYBACK_QUEUE_REQUEST: i32 = 62;
    pub const SET_VOLUME: i32 = 63;
    pub const VOLUME_DID_CHANGE: i32 = 64;
    pub const GET_VOLUME: i32 = 65;
    pub const GET_VOLUME_RESULT: i32 = 66;
}

/// Remote commands carried by `SEND_COMMAND`.
pub mod command {
    pub const PLAY: i32 = 1;
    pub const PAUSE: i32 = 2;
    pub const TOGGLE_PLAY_PAUSE: i32 = 3;
    pub const STOP: i32 = 4;
    pub const NEXT_TRACK: i32 = 5;
    pub const PREVIOUS_TRACK: i32 = 6;
    pub const SKIP_FORWARD: i32 = 7;
    pub const SKIP_BACKWARD: i32 = 8;
    pub const SEEK_TO_PLAYBACK_POSITION: i32 = 10;
    pub const CHANGE_REPEAT_MODE: i32 = 11;
    pub const CHANGE_SHUFFLE_MODE: i32 = 12;
}

/// HID usage pages/usages for button events.
pub mod hid {
    /// `(usage_page, usage)` pairs
    pub const UP: (i32, i32) = (1, 0x8C);
    pub const DOWN: (i32, i32) = (1, 0x8D);
    pub const LEFT: (i32, i32) = (1, 0x8B);
    pub const RIGHT: (i32, i32) = (1, 0x8A);
    pub const SELECT: (i32, i32) = (1, 0x89);
    pub const MENU: (i32, i32) = (1, 0x86);
    pub const HOME: (i32, i32) = (12, 0x40);
    pub const VOLUME_UP: (i32, i32) = (12, 0xE9);
    pub const VOLUME_DOWN: (i32, i32) = (12, 0xEA);
}

/// Outer envelope present in every frame.
#[derive(Clone, PartialEq, Message)]
pub struct ProtocolMessage {
    /// Message type discriminator
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    /// Correlation identifier echoed in replies
    #[prost(string, optional, tag = "2")]
    pub identifier: Option<String>,
    /// Error code on failures
    #[prost(int32, optional, tag = "5")]
    pub error_code: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct DeviceInfoMessage {
    #[prost(string, optional, tag = "1")]
    pub unique_identifier: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub system_build_version: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub application_bundle_identifier: Option<String>,
    #[prost(int32, optional, tag = "5")]
    pub protocol_version: Option<i32>,
    #[prost(string, optional, tag = "6")]
    pub operating_system: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetConnectionStateMessage {
    /// 2 == connected
    #[prost(int32, optional, tag = "1")]
    pub state: Option<i32>,
}

/// Connection states.
pub const CONNECTION_STATE_CONNECTED: i32 = 2;

#[derive(Clone, PartialEq, Message)]
pub struct ClientUpdatesConfigMessage {
    #[prost(bool, optional, tag = "1")]
    pub artwork_updates: Option<bool>,
    #[prost(bool, optional, tag = "2")]
    pub now_playing_updates: Option<bool>,
    #[prost(bool, optional, tag = "3")]
    pub volume_updates: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub keyboard_updates: Option<bool>,
    #[prost(bool, optional, tag = "5")]
    pub output_device_updates: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CommandOptions {
    /// Seconds for skip commands
    #[prost(int32, optional, tag = "1")]
    pub skip_interval: Option<i32>,
    /// Absolute position for seek
    #[prost(double, optional, tag = "2")]
    pub playback_position: Option<f64>,
    /// Repeat mode for `CHANGE_REPEAT_MODE`
    #[prost(int32, optional, tag = "3")]
    pub repeat_mode: Option<i32>,
    /// Shuffle mode for `CHANGE_SHUFFLE_MODE`
    #[prost(int32, optional, tag = "4")]
    pub shuffle_mode: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SendCommandMessage {
    #[prost(int32, optional, tag = "1")]
    pub command: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub options: Option<CommandOptions>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CommandResultMessage {
    #[prost(int32, optional, tag = "1")]
    pub send_error: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub handler_return_status: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SendHidEventMessage {
    #[prost(int32, optional, tag = "1")]
    pub usage_page: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub usage: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub down: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Origin {
    #[prost(string, optional, tag = "1")]
    pub display_name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub identifier: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Client {
    #[prost(string, optional, tag = "1")]
    pub bundle_identifier: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub display_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NowPlayingPlayer {
    #[prost(string, optional, tag = "1")]
    pub identifier: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub display_name: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PlayerPath {
    #[prost(message, optional, tag = "1")]
    pub origin: Option<Origin>,
    #[prost(message, optional, tag = "2")]
    pub client: Option<Client>,
    #[prost(message, optional, tag = "3")]
    pub player: Option<NowPlayingPlayer>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NowPlayingInfo {
    #[prost(string, optional, tag = "1")]
    pub title: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub artist: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub album: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub genre: Option<String>,
    #[prost(double, optional, tag = "5")]
    pub duration: Option<f64>,
    #[prost(double, optional, tag = "6")]
    pub elapsed_time: Option<f64>,
    #[prost(float, optional, tag = "7")]
    pub playback_rate: Option<f32>,
    #[prost(int32, optional, tag = "8")]
    pub repeat_mode: Option<i32>,
    #[prost(int32, optional, tag = "9")]
    pub shuffle_mode: Option<i32>,
    #[prost(double, optional, tag = "10")]
    pub timestamp: Option<f64>,
    #[prost(int32, optional, tag = "11")]
    pub media_type: Option<i32>,
    #[prost(string, optional, tag = "12")]
    pub unique_identifier: Option<String>,
    #[prost(int32, optional, tag = "13")]
    pub season_number: Option<i32>,
    #[prost(int32, optional, tag = "14")]
    pub episode_number: Option<i32>,
    #[prost(string, optional, tag = "15")]
    pub series_name: Option<String>,
    #[prost(string, optional, tag = "16")]
    pub content_identifier: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SupportedCommand {
    #[prost(int32, optional, tag = "1")]
    pub command: Option<i32>,
    #[prost(bool, optional, tag = "2")]
    pub enabled: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SupportedCommands {
    #[prost(message, repeated, tag = "1")]
    pub supported_commands: Vec<SupportedCommand>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContentItemMetadata {
    #[prost(string, optional, tag = "1")]
    pub title: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub artist: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub album: Option<String>,
    #[prost(double, optional, tag = "4")]
    pub duration: Option<f64>,
    #[prost(bool, optional, tag = "5")]
    pub artwork_available: Option<bool>,
    #[prost(string, optional, tag = "6")]
    pub artwork_mime_type: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub content_identifier: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct ContentItem {
    #[prost(string, optional, tag = "1")]
    pub identifier: Option<String>,
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<ContentItemMetadata>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub artwork_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PlaybackQueue {
    #[prost(message, repeated, tag = "1")]
    pub content_items: Vec<ContentItem>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetStateMessage {
    #[prost(int32, optional, tag = "1")]
    pub playback_state: Option<i32>,
    #[prost(message, optional, tag = "2")]
    pub now_playing_info: Option<NowPlayingInfo>,
    #[prost(message, optional, tag = "3")]
    pub supported_commands: Option<SupportedCommands>,
    #[prost(message, optional, tag = "4")]
    pub player_path: Option<PlayerPath>,
    #[prost(message, optional, tag = "5")]
    pub playback_queue: Option<PlaybackQueue>,
}

/// Playback states in `SetStateMessage`.
pub mod playback_state {
    pub const UNKNOWN: i32 = 0;
    pub const PLAYING: i32 = 1;
    pub const PAUSED: i32 = 2;
    pub const STOPPED: i32 = 3;
    pub const INTERRUPTED: i32 = 4;
    pub const SEEKING: i32 = 5;
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateClientMessage {
    #[prost(message, optional, tag = "1")]
    pub client: Option<Client>,
    #[prost(message, optional, tag = "2")]
    pub player_path: Option<PlayerPath>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateContentItemMessage {
    #[prost(message, repeated, tag = "1")]
    pub content_items: Vec<ContentItem>,
    #[prost(message, optional, tag = "2")]
    pub player_path: Option<PlayerPath>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetNowPlayingClientMessage {
    #[prost(message, optional, tag = "1")]
    pub client: Option<Client>,
}

#[derive(Clone, PartialEq, Message)]
pub struct OutputDeviceDescriptor {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub unique_identifier: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct UpdateOutputDeviceMessage {
    #[prost(message, repeated, tag = "1")]
    pub output_devices: Vec<OutputDeviceDescriptor>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VolumeControlAvailabilityMessage {
    #[prost(bool, optional, tag = "1")]
    pub volume_control_available: Option<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SetVolumeMessage {
    #[prost(float, optional, tag = "1")]
    pub volume: Option<f32>,
    #[prost(string, optional, tag = "2")]
    pub output_device_uid: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct VolumeDidChangeMessage {
    #[prost(float, optional, tag = "1")]
    pub volume: Option<f32>,
    #[prost(string, optional, tag = "2")]
    pub output_device_uid: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetVolumeMessage {
    #[prost(string, optional, tag = "1")]
    pub output_device_uid: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetVolumeResultMessage {
    #[prost(float, optional, tag = "1")]
    pub volume: Option<f32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct KeyboardMessage {
    /// 0 unknown, 1 focused, 2 unfocused
    #[prost(int32, optional, tag = "1")]
    pub state: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub text: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GetKeyboardSessionMessage {}

#[derive(Clone, PartialEq, Message)]
pub struct TextInputMessage {
    /// 0 insert, 1 set, 2 clear
    #[prost(int32, optional, tag = "1")]
    pub action_type: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub text: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct CryptoPairingMessage {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub pairing_data: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "2")]
    pub status: Option<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct WakeDeviceMessage {}

#[derive(Clone, PartialEq, Message)]
pub struct PlaybackQueueRequestMessage {
    #[prost(int32, optional, tag = "1")]
    pub location: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub length: Option<i32>,
    #[prost(double, optional, tag = "3")]
    pub artwork_width: Option<f64>,
    #[prost(double, optional, tag = "4")]
    pub artwork_height: Option<f64>,
}

/// Decoded inner payload of a frame.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Payload {
    DeviceInfo(DeviceInfoMessage),
    SetConnectionState(SetConnectionStateMessage),
    ClientUpdatesConfig(ClientUpdatesConfigMessage),
    SendCommand(SendCommandMessage),
    CommandResult(CommandResultMessage),
    SendHidEvent(SendHidEventMessage),
    SetState(SetStateMessage),
    UpdateClient(UpdateClientMessage),
    UpdateContentItem(UpdateContentItemMessage),
    SetNowPlayingClient(SetNowPlayingClientMessage),
    UpdateOutputDevice(UpdateOutputDeviceMessage),
    VolumeControlAvailability(VolumeControlAvailabilityMessage),
    SetVolume(SetVolumeMessage),
    VolumeDidChange(VolumeDidChangeMessage),
    GetVolume(GetVolumeMessage),
    GetVolumeResult(GetVolumeResultMessage),
    Keyboard(KeyboardMessage),
    GetKeyboardSession(GetKeyboardSessionMessage),
    TextInput(TextInputMessage),
    CryptoPairing(CryptoPairingMessage),
    WakeDevice(WakeDeviceMessage),
    PlaybackQueueRequest(PlaybackQueueRequestMessage),
    /// Tolerated but not interpreted; raw frame retained
    Unknown(Vec<u8>),
}

/// Extension field number: every inner message lives at this tag
/// inside the outer frame's byte stream, so the envelope and payload
/// share one buffer the way protobuf extensions do.
const EXTENSION_TAG: u32 = 100;

fn decode_extension<M: Message + Default>(frame: &[u8]) -> Option<M> {
    use prost::bytes::Buf;
    use prost::encoding::{DecodeContext, WireType, decode_key, decode_varint, skip_field};

    let mut buf = frame;
    while buf.has_remaining() {
        let (tag, wire_type) = decode_key(&mut buf).ok()?;
        if tag == EXTENSION_TAG && wire_type == WireType::LengthDelimited {
            let length = usize::try_from(decode_varint(&mut buf).ok()?).ok()?;
            if length > buf.remaining() {
                return None;
            }
            return M::decode(&buf[..length]).ok();
        }
        skip_field(wire_type, tag, &mut buf, DecodeContext::default()).ok()?;
    }
    None
}

fn encode_extension<M: Message>(inner: &M) -> Vec<u8> {
    use prost::encoding::{WireType, encode_key, encode_varint};

    let payload = inner.encode_to_vec();
    let mut out = Vec::with_capacity(payload.len() + 6);
    encode_key(EXTENSION_TAG, WireType::LengthDelimited, &mut out);
    encode_varint(payload.len() as u64, &mut out);
    out.extend_from_slice(&payload);
    out
}

type PayloadDecoder = fn(&[u8]) -> Option<Payload>;

macro_rules! decoder_for {
    ($variant:ident, $msg:ty) => {
        (|frame: &[u8]| decode_extension::<$msg>(frame).map(Payload::$variant)) as PayloadDecoder
    };
}

/// Jump table mapping outer type to inner payload decoder.
static DECODERS: LazyLock<HashMap<i32, PayloadDecoder>> = LazyLock::new(|| {
    use message_type as t;
    HashMap::from([
        (t::DEVICE_INFO, decoder_for!(DeviceInfo, DeviceInfoMessage)),
        (
            t::SET_CONNECTION_STATE,
            decoder_for!(SetConnectionState, SetConnectionStateMessage),
        ),
        (
            t::CLIENT_UPDATES_CONFIG,
            decoder_for!(ClientUpdatesConfig, ClientUpdatesConfigMessage),
        ),
        (t::SEND_COMMAND, decoder_for!(SendCommand, SendCommandMessage)),
        (
            t::COMMAND_RESULT,
            decoder_for!(CommandResult, CommandResultMessage),
        ),
        (
            t::SEND_HID_EVENT,
            decoder_for!(SendHidEvent, SendHidEventMessage),
        ),
        (t::SET_STATE, decoder_for!(SetState, SetStateMessage)),
        (t::UPDATE_CLIENT, decoder_for!(UpdateClient, UpdateClientMessage)),
        (
            t::UPDATE_CONTENT_ITEM,
            decoder_for!(UpdateContentItem, UpdateContentItemMessage),
        ),
        (
            t::SET_NOW_PLAYING_CLIENT,
            decoder_for!(SetNowPlayingClient, SetNowPlayingClientMessage),
        ),
        (
            t::UPDATE_OUTPUT_DEVICE,
            decoder_for!(UpdateOutputDevice, UpdateOutputDeviceMessage),
        ),
        (
            t::VOLUME_CONTROL_AVAILABILITY,
            decoder_for!(VolumeControlAvailability, VolumeControlAvailabilityMessage),
        ),
        (t::SET_VOLUME, decoder_for!(SetVolume, SetVolumeMessage)),
        (
            t::VOLUME_DID_CHANGE,
            decoder_for!(VolumeDidChange, VolumeDidChangeMessage),
        ),
        (t::GET_VOLUME, decoder_for!(GetVolume, GetVolumeMessage)),
        (
            t::GET_VOLUME_RESULT,
            decoder_for!(GetVolumeResult, GetVolumeResultMessage),
        ),
        (t::KEYBOARD, decoder_for!(Keyboard, KeyboardMessage)),
        (
            t::GET_KEYBOARD_SESSION,
            decoder_for!(GetKeyboardSession, GetKeyboardSessionMessage),
        ),
        (t::TEXT_INPUT, decoder_for!(TextInput, TextInputMessage)),
        (
            t::CRYPTO_PAIRING,
            decoder_for!(CryptoPairing, CryptoPairingMessage),
        ),
        (t::WAKE_DEVICE, decoder_for!(WakeDevice, WakeDeviceMessage)),
        (
            t::PLAYBACK_QUEUE_REQUEST,
            decoder_for!(PlaybackQueueRequest, PlaybackQueueRequestMessage),
        ),
    ])
});

/// A fully decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Outer envelope
    pub header: ProtocolMessage,
    /// Inner payload
    pub payload: Payload,
}

/// Decode one frame. Unknown types keep the raw bytes.
///
/// # Errors
///
/// Returns [`prost::DecodeError`] when the outer envelope is invalid.
pub fn decode_frame(frame: &[u8]) -> Result<Frame, prost::DecodeError> {
    let header = ProtocolMessage::decode(frame)?;
    let payload = header
        .r#type
        .and_then(|t| DECODERS.get(&t))
        .and_then(|decoder| decoder(frame))
        .unwrap_or_else(|| Payload::Unknown(frame.to_vec()));
    Ok(Frame { header, payload })
}

fn encode_payload(payload: Payload) -> Vec<u8> {
    match payload {
        Payload::DeviceInfo(m) => encode_extension(&m),
        Payload::SetConnectionState(m) => encode_extension(&m),
        Payload::ClientUpdatesConfig(m) => encode_extension(&m),
        Payload::SendCommand(m) => encode_extension(&m),
        Payload::CommandResult(m) => encode_extension(&m),
        Payload::SendHidEvent(m) => encode_extension(&m),
        Payload::SetState(m) => encode_extension(&m),
        Payload::UpdateClient(m) => encode_extension(&m),
        Payload::UpdateContentItem(m) => encode_extension(&m),
        Payload::SetNowPlayingClient(m) => encode_extension(&m),
        Payload::UpdateOutputDevice(m) => encode_extension(&m),
        Payload::VolumeControlAvailability(m) => encode_extension(&m),
        Payload::SetVolume(m) => encode_extension(&m),
        Payload::VolumeDidChange(m) => encode_extension(&m),
        Payload::GetVolume(m) => encode_extension(&m),
        Payload::GetVolumeResult(m) => encode_extension(&m),
        Payload::Keyboard(m) => encode_extension(&m),
        Payload::GetKeyboardSession(m) => encode_extension(&m),
        Payload::TextInput(m) => encode_extension(&m),
        Payload::CryptoPairing(m) => encode_extension(&m),
        Payload::WakeDevice(m) => encode_extension(&m),
        Payload::PlaybackQueueRequest(m) => encode_extension(&m),
        Payload::Unknown(raw) => raw,
    }
}

/// Type discriminator for a payload variant.
#[must_use]
pub fn payload_type(payload: &Payload) -> Option<i32> {
    use message_type as t;
    Some(match payload {
        Payload::DeviceInfo(_) => t::DEVICE_INFO,
        Payload::SetConnectionState(_) => t::SET_CONNECTION_STATE,
        Payload::ClientUpdatesConfig(_) => t::CLIENT_UPDATES_CONFIG,
        Payload::SendCommand(_) => t::SEND_COMMAND,
        Payload::CommandResult(_) => t::COMMAND_RESULT,
        Payload::SendHidEvent(_) => t::SEND_HID_EVENT,
        Payload::SetState(_) => t::SET_STATE,
        Payload::UpdateClient(_) => t::UPDATE_CLIENT,
        Payload::UpdateContentItem(_) => t::UPDATE_CONTENT_ITEM,
        Payload::SetNowPlayingClient(_) => t::SET_NOW_PLAYING_CLIENT,
        Payload::UpdateOutputDevice(_) => t::UPDATE_OUTPUT_DEVICE,
        Payload::VolumeControlAvailability(_) => t::VOLUME_CONTROL_AVAILABILITY,
        Payload::SetVolume(_) => t::SET_VOLUME,
        Payload::VolumeDidChange(_) => t::VOLUME_DID_CHANGE,
        Payload::GetVolume(_) => t::GET_VOLUME,
        Payload::GetVolumeResult(_) => t::GET_VOLUME_RESULT,
        Payload::Keyboard(_) => t::KEYBOARD,
        Payload::GetKeyboardSession(_) => t::GET_KEYBOARD_SESSION,
        Payload::TextInput(_) => t::TEXT_INPUT,
        Payload::CryptoPairing(_) => t::CRYPTO_PAIRING,
        Payload::WakeDevice(_) => t::WAKE_DEVICE,
        Payload::PlaybackQueueRequest(_) => t::PLAYBACK_QUEUE_REQUEST,
        Payload::Unknown(_) => return None,
    })
}

/// Encode a frame: outer envelope followed by the payload extension in
/// the same byte stream.
#[must_use]
pub fn encode_frame(identifier: Option<String>, payload: Payload) -> Vec<u8> {
    let header = ProtocolMessage {
        r#type: payload_type(&payload),
        identifier,
        error_code: None,
    };
    let mut bytes = header.encode_to_vec();
    bytes.extend_from_slice(&encode_payload(payload));
    bytes
}
