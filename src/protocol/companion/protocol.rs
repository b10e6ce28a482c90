//! Companion RPC client: events, app control, power and keyboard

use super::connection::{CompanionConnection, CompanionWriter, FrameType};
use super::opack::{OpackValue, decode, encode};
use crate::error::{AtvError, Result};
use crate::interface::{App, KeyboardFocusState};
use crate::protocol::hap::{HandshakeStep, PairVerify};
use crate::state::{DeviceEvent, StateProducer};
use crate::types::HapCredentials;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// HID command codes carried by `_hidC` requests.
pub mod hid_command {
    pub const UP: i64 = 1;
    pub const DOWN: i64 = 2;
    pub const LEFT: i64 = 3;
    pub const RIGHT: i64 = 4;
    pub const MENU: i64 = 5;
    pub const SELECT: i64 = 6;
    pub const HOME: i64 = 7;
    pub const VOLUME_UP: i64 = 8;
    pub const VOLUME_DOWN: i64 = 9;
    pub const SLEEP: i64 = 12;
    pub const WAKE: i64 = 13;
    pub const PLAY_PAUSE: i64 = 14;
}

/// Message kinds in the `_t` field.
mod message_kind {
    pub const EVENT: i64 = 1;
    pub const REQUEST: i64 = 2;
    pub const RESPONSE: i64 = 3;
}

/// Events subscribed to after connecting.
const SUBSCRIBED_EVENTS: [&str; 4] = [
    "_tiStarted",
    "_tiStopped",
    "_volumeChanged",
    "_nowPlayingApp",
];

const REPLY_TIMEOUT: Duration = Duration::from_secs(25);

type PendingMap = Arc<StdMutex<HashMap<i64, oneshot::Sender<OpackValue>>>>;

/// One Companion link session.
pub struct CompanionClient {
    writer: Arc<Mutex<CompanionWriter>>,
    pending: PendingMap,
    xid: AtomicU64,
    keyboard_focus: Arc<StdMutex<KeyboardFocusState>>,
    now_playing_app: Arc<StdMutex<Option<String>>>,
    power_state: StdMutex<crate::interface::PowerState>,
    producer: Arc<StateProducer>,
    closing: Arc<AtomicBool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl CompanionClient {
    /// Connect and establish an encrypted session from credentials.
    ///
    /// # Errors
    ///
    /// Fails without valid credentials or when verification is
    /// rejected.
    pub async fn connect(
        remote: SocketAddr,
        credentials: &HapCredentials,
        producer: Arc<StateProducer>,
    ) -> Result<Self> {
        let mut connection = CompanionConnection::connect(remote).await?;

        // Pair-Verify wrapped in PV frames carrying `_pd` TLV payloads
        let mut verify = PairVerify::new(credentials.clone());
        let mut outgoing = verify.start().map_err(AtvError::from)?;
        let mut frame_type = FrameType::PvStart;
        let keys = loop {
            let payload = encode(&OpackValue::dict([
                ("_pd", OpackValue::Bytes(outgoing)),
                ("_auTy", OpackValue::Int(4)),
            ]));
            connection.send(frame_type, &payload).await?;
            frame_type = FrameType::PvNext;

            let (_, reply) = connection.receive().await?;
            let reply = decode(&reply).map_err(|e| AtvError::Protocol(e.to_string()))?;
            let tlv = reply
                .get("_pd")
                .and_then(OpackValue::as_bytes)
                .ok_or_else(|| AtvError::Protocol("missing _pd in reply".to_string()))?;

            match verify.handle(tlv).map_err(AtvError::from)? {
                HandshakeStep::Send(next) => outgoing = next,
                HandshakeStep::Done(keys) => break keys,
            }
        };
        connection.enable_encryption(&keys)?;
        debug!("companion session established");

        let (reader, writer) = connection.split();
        let writer = Arc::new(Mutex::new(writer));
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let keyboard_focus = Arc::new(StdMutex::new(KeyboardFocusState::Unknown));
        let now_playing_app = Arc::new(StdMutex::new(None));
        let closing = Arc::new(AtomicBool::new(false));

        let client = Self {
            writer,
            pending,
            xid: AtomicU64::new(1),
            keyboard_focus,
            now_playing_app,
            power_state: StdMutex::new(crate::interface::PowerState::Unknown),
            producer,
            closing,
            tasks: StdMutex::new(Vec::new()),
        };
        client.spawn_dispatcher(reader);

        // Start a remote control session and subscribe to events
        client
            .request(
                "_sessionStart",
                OpackValue::dict([
                    ("_srvT", OpackValue::Str("com.apple.tvremoteservices".to_string())),
                    ("_sid", OpackValue::Int(i64::from(rand::random::<u32>()))),
                ]),
            )
            .await?;
        client
            .send_event(
                "_interest",
                OpackValue::dict([(
                    "_regEvents",
                    OpackValue::Array(
                        SUBSCRIBED_EVENTS
                            .iter()
                            .map(|e| OpackValue::Str((*e).to_string()))
                            .collect(),
                    ),
                )]),
            )
            .await?;

        Ok(client)
    }

    fn spawn_dispatcher(&self, mut reader: super::connection::CompanionReader) {
        let pending = self.pending.clone();
        let keyboard_focus = self.keyboard_focus.clone();
        let now_playing_app = self.now_playing_app.clone();
        let producer = self.producer.clone();
        let closing = self.closing.clone();

        let task = tokio::spawn(async move {
            loop {
                let (frame_type, payload) = match reader.receive().await {
                    Ok(frame) => frame,
                    Err(err) => {
                        if !closing.load(Ordering::SeqCst) {
                            producer.emit(&DeviceEvent::ConnectionLost(err.to_string()));
                        }
                        return;
                    }
                };
                if frame_type == FrameType::NoOp {
                    continue;
                }
                let message = match decode(&payload) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!("undecodable companion payload: {err}");
                        continue;
                    }
                };

                let kind = message.get("_t").and_then(OpackValue::as_int);
                match kind {
                    Some(message_kind::RESPONSE) => {
                        if let Some(xid) = message.get("_x").and_then(OpackValue::as_int) {
                            let waiter = pending
                                .lock()
                                .unwrap_or_else(std::sync::PoisonError::into_inner)
                                .remove(&xid);
                            if let Some(waiter) = waiter {
                                let content = message
                                    .get("_c")
                                    .cloned()
                                    .unwrap_or(OpackValue::Dict(Vec::new()));
                                let _ = waiter.send(content);
                            }
                        }
                    }
                    Some(message_kind::EVENT) => {
                        let name = message.get("_i").and_then(OpackValue::as_str);
                        match name {
                            Some("_tiStarted") => {
                                *keyboard_focus
                                    .lock()
                                    .unwrap_or_else(std::sync::PoisonError::into_inner) =
                                    KeyboardFocusState::Focused;
                                producer.emit(&DeviceEvent::KeyboardUpdate(
                                    KeyboardFocusState::Focused,
                                ));
                            }
                            Some("_tiStopped") => {
                                *keyboard_focus
                                    .lock()
                                    .unwrap_or_else(std::sync::PoisonError::into_inner) =
                                    KeyboardFocusState::Unfocused;
                                producer.emit(&DeviceEvent::KeyboardUpdate(
                                    KeyboardFocusState::Unfocused,
                                ));
                            }
                            Some("_volumeChanged") => {
                                if let Some(volume) = message
                                    .get("_c")
                                    .and_then(|c| c.get("_vol"))
                                    .and_then(|v| match v {
                                        OpackValue::Float(f) => Some(*f),
                                        #[allow(clippy::cast_precision_loss)]
                                        OpackValue::Int(i) => Some(*i as f64),
                                        _ => None,
                                    })
                                {
                                    #[allow(clippy::cast_possible_truncation)]
                                    producer.emit(&DeviceEvent::VolumeUpdate(
                                        ((volume * 100.0).clamp(0.0, 100.0)) as f32,
                                    ));
                                }
                            }
                            Some("_nowPlayingApp") => {
                                let bundle = message
                                    .get("_c")
                                    .and_then(|c| c.get("_bundleID"))
                                    .and_then(OpackValue::as_str)
                                    .map(str::to_string);
                                *now_playing_app
                                    .lock()
                                    .unwrap_or_else(std::sync::PoisonError::into_inner) = bundle;
                            }
                            _ => debug!("unhandled companion event {name:?}"),
                        }
                    }
                    _ => {}
                }
            }
        });
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(task);
    }

    async fn send_message(&self, message: &OpackValue) -> Result<()> {
        self.writer
            .lock()
            .await
            .send(FrameType::EOpack, &encode(message))
            .await
    }

    /// Fire-and-forget event.
    async fn send_event(&self, name: &str, content: OpackValue) -> Result<()> {
        self.send_message(&OpackValue::dict([
            ("_i", OpackValue::Str(name.to_string())),
            ("_t", OpackValue::Int(message_kind::EVENT)),
            ("_c", content),
        ]))
        .await
    }

    /// Request and await the matching response content.
    async fn request(&self, name: &str, content: OpackValue) -> Result<OpackValue> {
        #[allow(clippy::cast_possible_wrap)]
        let xid = self.xid.fetch_add(1, Ordering::SeqCst) as i64;
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(xid, tx);

        let result = async {
            self.send_message(&OpackValue::dict([
                ("_i", OpackValue::Str(name.to_string())),
                ("_t", OpackValue::Int(message_kind::REQUEST)),
                ("_x", OpackValue::Int(xid)),
                ("_c", content),
            ]))
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
                .remove(&xid);
        }
        result
    }

    /// Press and release a HID button.
    ///
    /// # Errors
    ///
    /// Fails when the device rejects the command.
    pub async fn hid_command(&self, code: i64) -> Result<()> {
        for state in [1, 2] {
            self.request(
                "_hidC",
                OpackValue::dict([
                    ("_hBtS", OpackValue::Int(state)),
                    ("_hidC", OpackValue::Int(code)),
                ]),
            )
            .await?;
        }
        Ok(())
    }

    /// Installed launchable applications.
    ///
    /// # Errors
    ///
    /// Fails when the device does not answer.
    pub async fn app_list(&self) -> Result<Vec<App>> {
        let content = self
            .request("FetchLaunchableApplicationsEvent", OpackValue::Dict(Vec::new()))
            .await?;
        let OpackValue::Dict(entries) = content else {
            return Ok(Vec::new());
        };
        Ok(entries
            .into_iter()
            .map(|(identifier, name)| App {
                name: name.as_str().map(str::to_string),
                identifier,
            })
            .collect())
    }

    /// Launch an app by bundle id or URL.
    ///
    /// # Errors
    ///
    /// Fails when the device rejects the launch.
    pub async fn launch_app(&self, bundle_id_or_url: &str) -> Result<()> {
        let key = if bundle_id_or_url.contains("://") {
            "_url"
        } else {
            "_bundleID"
        };
        self.request(
            "_launchApp",
            OpackValue::dict([(key, OpackValue::Str(bundle_id_or_url.to_string()))]),
        )
        .await?;
        Ok(())
    }

    /// Wake the device.
    ///
    /// # Errors
    ///
    /// Fails when the device rejects the command.
    pub async fn turn_on(&self) -> Result<()> {
        self.hid_command(hid_command::WAKE).await?;
        self.set_power_state(crate::interface::PowerState::On);
        Ok(())
    }

    /// Put the device to sleep.
    ///
    /// # Errors
    ///
    /// Fails when the device rejects the command.
    pub async fn turn_off(&self) -> Result<()> {
        self.hid_command(hid_command::SLEEP).await?;
        self.set_power_state(crate::interface::PowerState::Off);
        Ok(())
    }

    fn set_power_state(&self, state: crate::interface::PowerState) {
        let changed = {
            let mut guard = self
                .power_state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            let changed = *guard != state;
            *guard = state;
            changed
        };
        if changed {
            self.producer.emit(&DeviceEvent::PowerStateChanged(state));
        }
    }

    /// Last known power state (tracked from acknowledged commands).
    #[must_use]
    pub fn power_state(&self) -> crate::interface::PowerState {
        *self
            .power_state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Current keyboard focus.
    #[must_use]
    pub fn keyboard_focus(&self) -> KeyboardFocusState {
        *self
            .keyboard_focus
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Bundle id of the now-playing app, when an event reported one.
    #[must_use]
    pub fn now_playing_app(&self) -> Option<String> {
        self.now_playing_app
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Read the focused text field.
    ///
    /// # Errors
    ///
    /// Fails when no text session is active.
    pub async fn text_get(&self) -> Result<Option<String>> {
        let content = self
            .request("_tiGetText", OpackValue::Dict(Vec::new()))
            .await?;
        Ok(content
            .get("_tiD")
            .and_then(OpackValue::as_str)
            .map(str::to_string))
    }

    /// Replace the text field contents.
    ///
    /// # Errors
    ///
    /// Fails when no text session is active.
    pub async fn text_set(&self, text: &str) -> Result<()> {
        self.request(
            "_tiSetText",
            OpackValue::dict([("_tiD", OpackValue::Str(text.to_string()))]),
        )
        .await?;
        Ok(())
    }

    /// Append to the text field.
    ///
    /// # Errors
    ///
    /// Fails when no text session is active.
    pub async fn text_append(&self, text: &str) -> Result<()> {
        self.request(
            "_tiAppendText",
            OpackValue::dict([("_tiD", OpackValue::Str(text.to_string()))]),
        )
        .await?;
        Ok(())
    }

    /// Clear the text field.
    ///
    /// # Errors
    ///
    /// Fails when no text session is active.
    pub async fn text_clear(&self) -> Result<()> {
        self.request("_tiClearText", OpackValue::Dict(Vec::new()))
            .await?;
        Ok(())
    }

    /// Close the session; returns the aborted background tasks so the
    /// caller may await them draining.
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

impl Drop for CompanionClient {
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
