//! MRP client: handshake, heartbeats, commands and state tracking

use super::connection::{MrpConnection, MrpWriter};
use super::messages::{
    self, ClientUpdatesConfigMessage, CommandOptions, CryptoPairingMessage, DeviceInfoMessage,
    Frame, GetKeyboardSessionMessage, GetVolumeMessage, Payload, PlaybackQueueRequestMessage,
    ProtocolMessage, SendCommandMessage, SendHidEventMessage, SetConnectionStateMessage,
    SetVolumeMessage, TextInputMessage, WakeDeviceMessage, command, decode_frame, encode_frame,
    hid, message_type,
};
use super::player::PlayerRegistry;
use crate::error::{AtvError, Result};
use crate::interface::{InputAction, KeyboardFocusState};
use crate::protocol::hap::{HandshakeStep, PairVerify};
use crate::state::{DeviceEvent, PlayStatusDedup, StateProducer};
use crate::types::{HapCredentials, PlayingState, RepeatState, ShuffleState};
use prost::Message;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Heartbeat interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Replies slower than this count as a missed heartbeat.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);
/// Consecutive misses closing the connection.
const HEARTBEAT_MAX_MISSES: u32 = 3;
/// Reply timeout for acknowledged commands.
const REPLY_TIMEOUT: Duration = Duration::from_secs(25);
/// Duration of a held button.
const HOLD_DURATION: Duration = Duration::from_millis(700);

type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<Frame>>>>;

/// Shared mutable state fed by the dispatcher.
struct SharedState {
    registry: StdMutex<PlayerRegistry>,
    volume: StdMutex<Option<f32>>,
    keyboard_focus: StdMutex<KeyboardFocusState>,
    dedup: PlayStatusDedup,
}

/// One MRP connection to a device.
pub struct MrpClient {
    writer: Arc<Mutex<MrpWriter>>,
    pending: PendingMap,
    shared: Arc<SharedState>,
    producer: Arc<StateProducer>,
    closing: Arc<AtomicBool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

fn new_identifier() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl MrpClient {
    /// Connect over a discovered MRP service.
    ///
    /// # Errors
    ///
    /// Fails without credentials (MRP pairing is mandatory) or when the
    /// handshake cannot complete.
    pub async fn connect(
        remote: std::net::SocketAddr,
        credentials: &HapCredentials,
        producer: Arc<StateProducer>,
    ) -> Result<Self> {
        let connection = MrpConnection::connect(remote).await?;
        Self::handshake(connection, Some(credentials), producer).await
    }

    /// Run the handshake over an existing connection.
    ///
    /// Framing and messages are identical on every transport; passing
    /// no credentials skips Pair-Verify and frame encryption, which is
    /// how the tunneled variant runs (the outer AirPlay channel is
    /// already encrypted).
    ///
    /// # Errors
    ///
    /// Fails when any handshake step is rejected.
    pub async fn handshake(
        mut connection: MrpConnection,
        credentials: Option<&HapCredentials>,
        producer: Arc<StateProducer>,
    ) -> Result<Self> {
        // 1. Exchange device information in the clear
        let device_info = Payload::DeviceInfo(DeviceInfoMessage {
            unique_identifier: Some(new_identifier()),
            name: Some("atvlink".to_string()),
            system_build_version: Some("17K449".to_string()),
            application_bundle_identifier: Some("com.apple.TVRemote".to_string()),
            protocol_version: Some(1),
            operating_system: None,
        });
        connection
            .send(&encode_frame(Some(new_identifier()), device_info))
            .await?;
        loop {
            let frame = decode_frame(&connection.receive().await?)
                .map_err(|e| AtvError::Protocol(e.to_string()))?;
            if frame.header.r#type == Some(message_type::DEVICE_INFO) {
                debug!("device info received");
                break;
            }
        }

        // 2. Pair-Verify wrapped in crypto pairing messages (skipped on
        //    transports that are already encrypted)
        if let Some(credentials) = credentials {
            let mut verify = PairVerify::new(credentials.clone());
            let mut outgoing = verify.start().map_err(AtvError::from)?;
            let keys = loop {
                let wrapper = Payload::CryptoPairing(CryptoPairingMessage {
                    pairing_data: Some(outgoing),
                    status: Some(0),
                });
                connection.send(&encode_frame(None, wrapper)).await?;

                let reply = loop {
                    let frame = decode_frame(&connection.receive().await?)
                        .map_err(|e| AtvError::Protocol(e.to_string()))?;
                    if let Payload::CryptoPairing(message) = frame.payload {
                        break message;
                    }
                };
                let data = reply.pairing_data.unwrap_or_default();
                match verify.handle(&data).map_err(AtvError::from)? {
                    HandshakeStep::Send(next) => outgoing = next,
                    HandshakeStep::Done(keys) => break keys,
                }
            };
            connection.enable_encryption(&keys)?;
        }

        // 3. Declare connection state and subscribe to updates
        connection
            .send(&encode_frame(
                None,
                Payload::SetConnectionState(SetConnectionStateMessage {
                    state: Some(messages::CONNECTION_STATE_CONNECTED),
                }),
            ))
            .await?;
        connection
            .send(&encode_frame(
                Some(new_identifier()),
                Payload::ClientUpdatesConfig(ClientUpdatesConfigMessage {
                    artwork_updates: Some(true),
                    now_playing_updates: Some(true),
                    volume_updates: Some(true),
                    keyboard_updates: Some(true),
                    output_device_updates: Some(true),
                }),
            ))
            .await?;

        let (reader, writer) = connection.split();
        let writer = Arc::new(Mutex::new(writer));
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let shared = Arc::new(SharedState {
            registry: StdMutex::new(PlayerRegistry::new()),
            volume: StdMutex::new(None),
            keyboard_focus: StdMutex::new(KeyboardFocusState::Unknown),
            dedup: PlayStatusDedup::new(),
        });
        let closing = Arc::new(AtomicBool::new(false));

        let client = Self {
            writer,
            pending,
            shared,
            producer,
            closing,
            tasks: StdMutex::new(Vec::new()),
        };
        client.spawn_dispatcher(reader);
        client.spawn_heartbeat();
        Ok(client)
    }

    fn push_task(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(task);
    }

    fn spawn_dispatcher(&self, mut reader: super::connection::MrpReader) {
        let pending = self.pending.clone();
        let shared = self.shared.clone();
        let producer = self.producer.clone();
        let closing = self.closing.clone();

        self.push_task(tokio::spawn(async move {
            loop {
                let frame = match reader.receive().await {
                    Ok(bytes) => match decode_frame(&bytes) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!("undecodable MRP frame: {err}");
                            continue;
                        }
                    },
                    Err(err) => {
                        // Transport gone: surface to listeners, do not
                        // reconnect silently. The application restarts.
                        if !closing.load(Ordering::SeqCst) {
                            producer.emit(&DeviceEvent::ConnectionLost(err.to_string()));
                        }
                        return;
                    }
                };

                // Replies first: identifier correlation
                if let Some(identifier) = &frame.header.identifier {
                    let waiter = pending
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .remove(identifier);
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(frame);
                        continue;
                    }
                }

                Self::dispatch(&frame, &shared, &producer);
            }
        }));
    }

    /// Messages are delivered to subscribers in the order received.
    fn dispatch(frame: &Frame, shared: &SharedState, producer: &StateProducer) {
        match &frame.payload {
            Payload::SetState(message) => {
                let mut registry = shared
                    .registry
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                registry.handle_set_state(message);
                let playing = registry.playing_state();
                drop(registry);
                Self::emit_playing(shared, producer, playing);
            }
            Payload::UpdateClient(message) => {
                shared
                    .registry
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .handle_update_client(message);
            }
            Payload::UpdateContentItem(message) => {
                let mut registry = shared
                    .registry
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                registry.handle_update_content_item(message);
                let playing = registry.playing_state();
                drop(registry);
                Self::emit_playing(shared, producer, playing);
            }
            Payload::SetNowPlayingClient(message) => {
                let mut registry = shared
                    .registry
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                registry.handle_set_now_playing_client(message);
                let playing = registry.playing_state();
                drop(registry);
                Self::emit_playing(shared, producer, playing);
            }
            Payload::UpdateOutputDevice(message) => {
                let devices: Vec<String> = message
                    .output_devices
                    .iter()
                    .filter_map(|d| d.name.clone())
                    .collect();
                producer.emit(&DeviceEvent::OutputDevicesUpdate(devices));
            }
            Payload::VolumeDidChange(message) => {
                if let Some(volume) = message.volume {
                    let level = (volume * 100.0).clamp(0.0, 100.0);
                    *shared
                        .volume
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(level);
                    producer.emit(&DeviceEvent::VolumeUpdate(level));
                }
            }
            Payload::Keyboard(message) => {
                let focus = match message.state {
                    Some(1) => KeyboardFocusState::Focused,
                    Some(2) => KeyboardFocusState::Unfocused,
                    _ => KeyboardFocusState::Unknown,
                };
                *shared
                    .keyboard_focus
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = focus;
                producer.emit(&DeviceEvent::KeyboardUpdate(focus));
            }
            _ => {}
        }
    }

    fn emit_playing(shared: &SharedState, producer: &StateProducer, playing: PlayingState) {
        if shared.dedup.accept(&playing) {
            producer.emit(&DeviceEvent::PlayStatusUpdate(playing));
        }
    }

    fn spawn_heartbeat(&self) {
        let writer = self.writer.clone();
        let pending = self.pending.clone();
        let producer = self.producer.clone();
        let closing = self.closing.clone();

        self.push_task(tokio::spawn(async move {
            let misses = AtomicU32::new(0);
            let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
            tick.tick().await;
            loop {
                tick.tick().await;
                if closing.load(Ordering::SeqCst) {
                    return;
                }

                let identifier = new_identifier();
                let (tx, rx) = oneshot::channel();
                pending
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(identifier.clone(), tx);

                let header = ProtocolMessage {
                    r#type: Some(message_type::GENERIC),
                    identifier: Some(identifier.clone()),
                    error_code: None,
                };
                let sent = writer.lock().await.send(&header.encode_to_vec()).await;

                let replied = match sent {
                    Ok(()) => tokio::time::timeout(HEARTBEAT_TIMEOUT, rx).await.is_ok(),
                    Err(_) => false,
                };
                pending
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&identifier);

                if replied {
                    misses.store(0, Ordering::SeqCst);
                } else {
                    let count = misses.fetch_add(1, Ordering::SeqCst) + 1;
                    debug!("heartbeat miss {count}/{HEARTBEAT_MAX_MISSES}");
                    if count >= HEARTBEAT_MAX_MISSES {
                        closing.store(true, Ordering::SeqCst);
                        producer.emit(&DeviceEvent::ConnectionLost(
                            "heartbeat timed out".to_string(),
                        ));
                        return;
                    }
                }
            }
        }));
    }

    /// Send a frame without waiting for a reply (HID events need no ack
    /// on tvOS 14 and later).
    async fn send(&self, payload: Payload) -> Result<()> {
        self.writer
            .lock()
            .await
            .send(&encode_frame(None, payload))
            .await
    }

    /// Send a frame and await the reply frame echoing its identifier.
    async fn send_and_wait(&self, payload: Payload) -> Result<Frame> {
        let identifier = new_identifier();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(identifier.clone(), tx);

        let result = async {
            self.writer
                .lock()
                .await
                .send(&encode_frame(Some(identifier.clone()), payload))
                .await?;
            tokio::time::timeout(REPLY_TIMEOUT, rx)
                .await
                .map_err(|_| AtvError::Timeout(REPLY_TIMEOUT))?
                .map_err(|_| AtvError::Connection("connection closed".to_string()))
        }
        .await;

        if result.is_err() {
            self.pending
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&identifier);
        }
        result
    }

    /// Run an acknowledged command and check its result codes.
    async fn run_command(&self, cmd: i32, options: Option<CommandOptions>) -> Result<()> {
        let frame = self
            .send_and_wait(Payload::SendCommand(SendCommandMessage {
                command: Some(cmd),
                options,
            }))
            .await?;

        match frame.payload {
            Payload::CommandResult(result) => {
                let send_error = result.send_error.unwrap_or(0);
                let handler_status = result.handler_return_status.unwrap_or(0);
                if send_error != 0 || handler_status != 0 {
                    return Err(AtvError::Command {
                        error_code: send_error,
                        handler_status,
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Press a HID button with an input action modifier.
    pub async fn press_button(&self, button: (i32, i32), action: InputAction) -> Result<()> {
        let repeats = if action == InputAction::DoubleTap { 2 } else { 1 };
        for _ in 0..repeats {
            self.send(Payload::SendHidEvent(SendHidEventMessage {
                usage_page: Some(button.0),
                usage: Some(button.1),
                down: Some(true),
            }))
            .await?;
            if action == InputAction::Hold {
                tokio::time::sleep(HOLD_DURATION).await;
            }
            self.send(Payload::SendHidEvent(SendHidEventMessage {
                usage_page: Some(button.0),
                usage: Some(button.1),
                down: Some(false),
            }))
            .await?;
        }
        Ok(())
    }

    /// Directional and menu buttons.
    pub async fn up(&self, action: InputAction) -> Result<()> {
        self.press_button(hid::UP, action).await
    }
    /// Down button.
    pub async fn down(&self, action: InputAction) -> Result<()> {
        self.press_button(hid::DOWN, action).await
    }
    /// Left button.
    pub async fn left(&self, action: InputAction) -> Result<()> {
        self.press_button(hid::LEFT, action).await
    }
    /// Right button.
    pub async fn right(&self, action: InputAction) -> Result<()> {
        self.press_button(hid::RIGHT, action).await
    }
    /// Select button.
    pub async fn select(&self, action: InputAction) -> Result<()> {
        self.press_button(hid::SELECT, action).await
    }
    /// Menu button.
    pub async fn menu(&self, action: InputAction) -> Result<()> {
        self.press_button(hid::MENU, action).await
    }
    /// Home button.
    pub async fn home(&self, action: InputAction) -> Result<()> {
        self.press_button(hid::HOME, action).await
    }

    /// Transport commands.
    pub async fn play(&self) -> Result<()> {
        self.run_command(command::PLAY, None).await
    }
    /// Pause playback.
    pub async fn pause(&self) -> Result<()> {
        self.run_command(command::PAUSE, None).await
    }
    /// Toggle play/pause.
    pub async fn play_pause(&self) -> Result<()> {
        self.run_command(command::TOGGLE_PLAY_PAUSE, None).await
    }
    /// Stop playback.
    pub async fn stop(&self) -> Result<()> {
        self.run_command(command::STOP, None).await
    }
    /// Next track.
    pub async fn next(&self) -> Result<()> {
        self.run_command(command::NEXT_TRACK, None).await
    }
    /// Previous track.
    pub async fn previous(&self) -> Result<()> {
        self.run_command(command::PREVIOUS_TRACK, None).await
    }

    /// Seek to an absolute position in seconds.
    pub async fn set_position(&self, position: u32) -> Result<()> {
        self.run_command(
            command::SEEK_TO_PLAYBACK_POSITION,
            Some(CommandOptions {
                playback_position: Some(f64::from(position)),
                ..CommandOptions::default()
            }),
        )
        .await
    }

    /// Skip forward.
    pub async fn skip_forward(&self, seconds: u32) -> Result<()> {
        self.run_command(
            command::SKIP_FORWARD,
            Some(CommandOptions {
                skip_interval: Some(i32::try_from(seconds).unwrap_or(i32::MAX)),
                ..CommandOptions::default()
            }),
        )
        .await
    }

    /// Skip backward.
    pub async fn skip_backward(&self, seconds: u32) -> Result<()> {
        self.run_command(
            command::SKIP_BACKWARD,
            Some(CommandOptions {
                skip_interval: Some(i32::try_from(seconds).unwrap_or(i32::MAX)),
                ..CommandOptions::default()
            }),
        )
        .await
    }

    /// Change repeat mode.
    pub async fn set_repeat(&self, repeat: RepeatState) -> Result<()> {
        let mode = match repeat {
            RepeatState::Off => 1,
            RepeatState::Track => 2,
            RepeatState::All => 3,
        };
        self.run_command(
            command::CHANGE_REPEAT_MODE,
            Some(CommandOptions {
                repeat_mode: Some(mode),
                ..CommandOptions::default()
            }),
        )
        .await
    }

    /// Change shuffle mode.
    pub async fn set_shuffle(&self, shuffle: ShuffleState) -> Result<()> {
        let mode = match shuffle {
            ShuffleState::Off => 1,
            ShuffleState::Albums => 2,
            ShuffleState::Songs => 3,
        };
        self.run_command(
            command::CHANGE_SHUFFLE_MODE,
            Some(CommandOptions {
                shuffle_mode: Some(mode),
                ..CommandOptions::default()
            }),
        )
        .await
    }

    /// Current play state snapshot from the player registry.
    #[must_use]
    pub fn playing(&self) -> PlayingState {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .playing_state()
    }

    /// Last known volume in percent.
    #[must_use]
    pub fn cached_volume(&self) -> Option<f32> {
        *self
            .shared
            .volume
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Query the device volume.
    ///
    /// # Errors
    ///
    /// Fails when the device does not answer.
    pub async fn volume(&self) -> Result<f32> {
        if let Some(volume) = self.cached_volume() {
            return Ok(volume);
        }
        let frame = self
            .send_and_wait(Payload::GetVolume(GetVolumeMessage {
                output_device_uid: None,
            }))
            .await?;
        match frame.payload {
            Payload::GetVolumeResult(result) => Ok((result.volume.unwrap_or(0.0) * 100.0)
                .clamp(0.0, 100.0)),
            _ => Err(AtvError::Protocol("unexpected volume reply".to_string())),
        }
    }

    /// Set the absolute volume (percent).
    ///
    /// # Errors
    ///
    /// Fails when the transport is gone.
    pub async fn set_volume(&self, level: f32) -> Result<()> {
        self.send(Payload::SetVolume(SetVolumeMessage {
            volume: Some(level / 100.0),
            output_device_uid: None,
        }))
        .await
    }

    /// Current keyboard focus.
    #[must_use]
    pub fn keyboard_focus(&self) -> KeyboardFocusState {
        *self
            .shared
            .keyboard_focus
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Read the focused text field.
    ///
    /// # Errors
    ///
    /// Fails when no keyboard session exists.
    pub async fn text_get(&self) -> Result<Option<String>> {
        let frame = self
            .send_and_wait(Payload::GetKeyboardSession(GetKeyboardSessionMessage {}))
            .await?;
        match frame.payload {
            Payload::Keyboard(keyboard) => Ok(keyboard.text),
            _ => Ok(None),
        }
    }

    async fn text_input(&self, action: i32, text: Option<String>) -> Result<()> {
        self.send(Payload::TextInput(TextInputMessage {
            action_type: Some(action),
            text,
        }))
        .await
    }

    /// Replace the text field contents.
    pub async fn text_set(&self, text: &str) -> Result<()> {
        self.text_input(1, Some(text.to_string())).await
    }

    /// Append to the text field.
    pub async fn text_append(&self, text: &str) -> Result<()> {
        self.text_input(0, Some(text.to_string())).await
    }

    /// Clear the text field.
    pub async fn text_clear(&self) -> Result<()> {
        self.text_input(2, None).await
    }

    /// Wake the device.
    ///
    /// # Errors
    ///
    /// Fails when the transport is gone.
    pub async fn wake(&self) -> Result<()> {
        self.send(Payload::WakeDevice(WakeDeviceMessage {})).await
    }

    /// Fetch artwork for the playing item via a playback queue request.
    ///
    /// Width/height follow the caller's hint; with no hint the full
    /// artwork is requested (sized by the sender, unlike DMAP where the
    /// device scales).
    ///
    /// # Errors
    ///
    /// Fails when no artwork is available.
    pub async fn artwork(
        &self,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<(Vec<u8>, String)> {
        let frame = self
            .send_and_wait(Payload::PlaybackQueueRequest(PlaybackQueueRequestMessage {
                location: Some(0),
                length: Some(1),
                artwork_width: width.map(f64::from),
                artwork_height: height.map(f64::from),
            }))
            .await?;

        if let Payload::SetState(state) = frame.payload
            && let Some(queue) = state.playback_queue
            && let Some(item) = queue.content_items.into_iter().next()
            && let Some(data) = item.artwork_data
            && !data.is_empty()
        {
            let mimetype = item
                .metadata
                .and_then(|m| m.artwork_mime_type)
                .unwrap_or_else(|| "image/jpeg".to_string());
            return Ok((data, mimetype));
        }
        Err(AtvError::Protocol("no artwork available".to_string()))
    }

    /// Tear the connection down; returns the aborted background tasks
    /// so the caller may await them draining.
    pub fn close(&self) -> Vec<JoinHandle<()>> {
        self.closing.store(true, Ordering::SeqCst);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in &tasks {
            task.abort();
        }
        self.producer.emit(&DeviceEvent::ConnectionClosed);
        tasks
    }
}

impl Drop for MrpClient {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}
