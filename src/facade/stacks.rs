//! Per-protocol capability registrations
//!
//! Each stack wraps its protocol client and implements the subset of
//! capability interfaces the protocol actually provides; the subset is
//! declared as a feature set so the relayer can compute candidates.

#[cfg(feature = "decoders")]
use crate::audio;
use crate::error::Result;
use crate::interface::{
    App, Apps, Artwork, Audio, FeatureName, FeatureSet, InputAction, Keyboard,
    KeyboardFocusState, Metadata, Power, PushUpdater, RemoteControl, Stream,
};
#[cfg(feature = "decoders")]
use crate::net::HttpConnection;
use crate::protocol::airplay::AirPlayClient;
use crate::protocol::companion::CompanionClient;
use crate::protocol::companion::protocol::hid_command;
use crate::protocol::dmap::{DmapClient, DmapPushUpdater};
use crate::protocol::mrp::MrpClient;
#[cfg(feature = "decoders")]
use crate::protocol::raop::{RaopSession, RaopStreamer};
use crate::protocol::raop::StreamProperties;
use crate::types::{PlayingState, Protocol, RepeatState, ShuffleState};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Everything one protocol contributes to the facade.
pub struct SetupData {
    /// Contributing protocol
    pub protocol: Protocol,
    /// Operations this stack really implements
    pub features: FeatureSet,
    /// Remote control implementation
    pub remote_control: Option<Arc<dyn RemoteControl>>,
    /// Metadata implementation
    pub metadata: Option<Arc<dyn Metadata>>,
    /// Power implementation
    pub power: Option<Arc<dyn Power>>,
    /// Audio implementation
    pub audio: Option<Arc<dyn Audio>>,
    /// Apps implementation
    pub apps: Option<Arc<dyn Apps>>,
    /// Keyboard implementation
    pub keyboard: Option<Arc<dyn Keyboard>>,
    /// Stream implementation
    pub stream: Option<Arc<dyn Stream>>,
    /// Push updater implementation
    pub push_updater: Option<Arc<dyn PushUpdater>>,
    /// Stops the stack; returns background tasks still draining
    pub close: Box<dyn Fn() -> Vec<JoinHandle<()>> + Send + Sync>,
}

// ---------------------------------------------------------------- MRP

/// MRP capability bundle.
pub struct MrpStack {
    client: Arc<MrpClient>,
}

impl MrpStack {
    /// Wire an MRP client into the facade.
    #[must_use]
    pub fn setup(client: Arc<MrpClient>) -> SetupData {
        let stack = Arc::new(Self {
            client: client.clone(),
        });
        use FeatureName as F;
        let features: FeatureSet = [
            F::Up,
            F::Down,
            F::Left,
            F::Right,
            F::Select,
            F::Menu,
            F::Home,
            F::HomeHold,
            F::TopMenu,
            F::Play,
            F::Pause,
            F::PlayPause,
            F::Stop,
            F::Next,
            F::Previous,
            F::SkipForward,
            F::SkipBackward,
            F::SetPosition,
            F::SetRepeat,
            F::SetShuffle,
            F::Playing,
            F::Artwork,
            F::PushUpdates,
            F::Volume,
            F::SetVolume,
            F::VolumeUp,
            F::VolumeDown,
            F::TurnOn,
            F::TextGet,
            F::TextSet,
            F::TextAppend,
            F::TextClear,
            F::TextFocusState,
        ]
        .into();

        SetupData {
            protocol: Protocol::Mrp,
            features,
            remote_control: Some(stack.clone()),
            metadata: Some(stack.clone()),
            power: Some(stack.clone()),
            audio: Some(stack.clone()),
            apps: None,
            keyboard: Some(stack.clone()),
            stream: None,
            push_updater: Some(stack),
            close: Box::new(move || client.close()),
        }
    }
}

#[async_trait]
impl RemoteControl for MrpStack {
    async fn up(&self, action: InputAction) -> Result<()> {
        self.client.up(action).await
    }
    async fn down(&self, action: InputAction) -> Result<()> {
        self.client.down(action).await
    }
    async fn left(&self, action: InputAction) -> Result<()> {
        self.client.left(action).await
    }
    async fn right(&self, action: InputAction) -> Result<()> {
        self.client.right(action).await
    }
    async fn select(&self, action: InputAction) -> Result<()> {
        self.client.select(action).await
    }
    async fn menu(&self, action: InputAction) -> Result<()> {
        self.client.menu(action).await
    }
    async fn home(&self, action: InputAction) -> Result<()> {
        self.client.home(action).await
    }
    async fn top_menu(&self) -> Result<()> {
        // Long menu press exits to the top menu on tvOS
        self.client.menu(InputAction::Hold).await
    }
    async fn play(&self) -> Result<()> {
        self.client.play().await
    }
    async fn pause(&self) -> Result<()> {
        self.client.pause().await
    }
    async fn play_pause(&self) -> Result<()> {
        self.client.play_pause().await
    }
    async fn stop(&self) -> Result<()> {
        self.client.stop().await
    }
    async fn next(&self) -> Result<()> {
        self.client.next().await
    }
    async fn previous(&self) -> Result<()> {
        self.client.previous().await
    }
    async fn set_position(&self, position: u32) -> Result<()> {
        self.client.set_position(position).await
    }
    async fn skip_forward(&self, seconds: u32) -> Result<()> {
        self.client.skip_forward(seconds).await
    }
    async fn skip_backward(&self, seconds: u32) -> Result<()> {
        self.client.skip_backward(seconds).await
    }
    async fn set_repeat(&self, repeat: RepeatState) -> Result<()> {
        self.client.set_repeat(repeat).await
    }
    async fn set_shuffle(&self, shuffle: ShuffleState) -> Result<()> {
        self.client.set_shuffle(shuffle).await
    }
}

#[async_trait]
impl Metadata for MrpStack {
    async fn playing(&self) -> Result<PlayingState> {
        Ok(self.client.playing())
    }
    async fn artwork(&self, width: Option<u32>, height: Option<u32>) -> Result<Artwork> {
        let (bytes, mimetype) = self.client.artwork(width, height).await?;
        Ok(Artwork {
            bytes,
            mimetype,
            width,
            height,
        })
    }
    async fn content_identifier(&self) -> Result<Option<String>> {
        Ok(self.client.playing().content_identifier)
    }
}

#[async_trait]
impl Power for MrpStack {
    async fn turn_on(&self) -> Result<()> {
        self.client.wake().await
    }
}

#[async_trait]
impl Audio for MrpStack {
    async fn volume(&self) -> Result<f32> {
        self.client.volume().await
    }
    async fn set_volume(&self, level: f32) -> Result<()> {
        self.client.set_volume(level).await
    }
    async fn volume_up(&self) -> Result<()> {
        self.client
            .press_button(
                crate::protocol::mrp::messages::hid::VOLUME_UP,
                InputAction::SingleTap,
            )
            .await
    }
    async fn volume_down(&self) -> Result<()> {
        self.client
            .press_button(
                crate::protocol::mrp::messages::hid::VOLUME_DOWN,
                InputAction::SingleTap,
            )
            .await
    }
}

#[async_trait]
impl Keyboard for MrpStack {
    async fn text_get(&self) -> Result<Option<String>> {
        self.client.text_get().await
    }
    async fn text_set(&self, text: &str) -> Result<()> {
        self.client.text_set(text).await
    }
    async fn text_append(&self, text: &str) -> Result<()> {
        self.client.text_append(text).await
    }
    async fn text_clear(&self) -> Result<()> {
        self.client.text_clear().await
    }
    fn text_focus_state(&self) -> KeyboardFocusState {
        self.client.keyboard_focus()
    }
}

#[async_trait]
impl PushUpdater for MrpStack {
    async fn start(&self, _initial_delay: Option<Duration>) -> Result<()> {
        // MRP pushes through its subscription; nothing to poll
        Ok(())
    }
    fn is_active(&self) -> bool {
        true
    }
}

// --------------------------------------------------------------- DMAP

/// DMAP capability bundle.
pub struct DmapStack {
    client: Mutex<DmapClient>,
    push: DmapPushUpdater,
}

/// Immediate (non-blocking) play status poll timeout.
const DMAP_POLL_TIMEOUT: Duration = Duration::from_secs(25);

impl DmapStack {
    /// Wire a logged-in control client plus a dedicated push client.
    #[must_use]
    pub fn setup(client: DmapClient, push: DmapPushUpdater) -> SetupData {
        let stack = Arc::new(Self {
            client: Mutex::new(client),
            push,
        });
        use FeatureName as F;
        let features: FeatureSet = [
            F::Up,
            F::Down,
            F::Left,
            F::Right,
            F::Select,
            F::Menu,
            F::TopMenu,
            F::Play,
            F::Pause,
            F::PlayPause,
            F::Stop,
            F::Next,
            F::Previous,
            F::SetPosition,
            F::SkipForward,
            F::SkipBackward,
            F::SetRepeat,
            F::SetShuffle,
            F::Playing,
            F::Artwork,
            F::PushUpdates,
            F::Volume,
            F::SetVolume,
            F::VolumeUp,
            F::VolumeDown,
        ]
        .into();

        let closer = stack.clone();
        SetupData {
            protocol: Protocol::Dmap,
            features,
            remote_control: Some(stack.clone()),
            metadata: Some(stack.clone()),
            power: None,
            audio: Some(stack.clone()),
            apps: None,
            keyboard: None,
            stream: None,
            push_updater: Some(stack),
            close: Box::new(move || {
                closer.push.stop();
                Vec::new()
            }),
        }
    }

    async fn current_position(&self) -> Result<u32> {
        let (playing, _) = self
            .client
            .lock()
            .await
            .play_status(0, DMAP_POLL_TIMEOUT)
            .await?;
        Ok(playing.position.unwrap_or(0))
    }
}

#[async_trait]
impl RemoteControl for DmapStack {
    async fn up(&self, _action: InputAction) -> Result<()> {
        self.client.lock().await.touch_swipe((20, 275), (20, 240)).await
    }
    async fn down(&self, _action: InputAction) -> Result<()> {
        self.client.lock().await.touch_swipe((20, 250), (20, 285)).await
    }
    async fn left(&self, _action: InputAction) -> Result<()> {
        self.client.lock().await.touch_swipe((75, 100), (40, 100)).await
    }
    async fn right(&self, _action: InputAction) -> Result<()> {
        self.client.lock().await.touch_swipe((50, 100), (85, 100)).await
    }
    async fn select(&self, _action: InputAction) -> Result<()> {
        self.client.lock().await.control_prompt("select").await
    }
    async fn menu(&self, _action: InputAction) -> Result<()> {
        self.client.lock().await.control_prompt("menu").await
    }
    async fn top_menu(&self) -> Result<()> {
        self.client.lock().await.control_prompt("topmenu").await
    }
    async fn play(&self) -> Result<()> {
        self.client.lock().await.command("play").await
    }
    async fn pause(&self) -> Result<()> {
        self.client.lock().await.command("pause").await
    }
    async fn play_pause(&self) -> Result<()> {
        self.client.lock().await.command("playpause").await
    }
    async fn stop(&self) -> Result<()> {
        self.client.lock().await.command("stop").await
    }
    async fn next(&self) -> Result<()> {
        self.client.lock().await.command("nextitem").await
    }
    async fn previous(&self) -> Result<()> {
        self.client.lock().await.command("previtem").await
    }
    async fn set_position(&self, position: u32) -> Result<()> {
        self.client
            .lock()
            .await
            .set_property("dacp.playingtime", &(u64::from(position) * 1000).to_string())
            .await
    }
    async fn skip_forward(&self, seconds: u32) -> Result<()> {
        let position = self.current_position().await?;
        self.set_position(position.saturating_add(seconds)).await
    }
    async fn skip_backward(&self, seconds: u32) -> Result<()> {
        let position = self.current_position().await?;
        self.set_position(position.saturating_sub(seconds)).await
    }
    async fn set_repeat(&self, repeat: RepeatState) -> Result<()> {
        let value = match repeat {
            RepeatState::Off => "0",
            RepeatState::Track => "1",
            RepeatState::All => "2",
        };
        self.client
            .lock()
            .await
            .set_property("dacp.repeatstate", value)
            .await
    }
    async fn set_shuffle(&self, shuffle: ShuffleState) -> Result<()> {
        let value = match shuffle {
            ShuffleState::Off => "0",
            _ => "1",
        };
        self.client
            .lock()
            .await
            .set_property("dacp.shufflestate", value)
            .await
    }
}

#[async_trait]
impl Metadata for DmapStack {
    async fn playing(&self) -> Result<PlayingState> {
        let (playing, _) = self
            .client
            .lock()
            .await
            .play_status(0, DMAP_POLL_TIMEOUT)
            .await?;
        Ok(playing)
    }
    async fn artwork(&self, width: Option<u32>, height: Option<u32>) -> Result<Artwork> {
        let (bytes, mimetype) = self.client.lock().await.artwork(width, height).await?;
        Ok(Artwork {
            bytes,
            mimetype,
            width,
            height,
        })
    }
}

#[async_trait]
impl Audio for DmapStack {
    async fn volume(&self) -> Result<f32> {
        self.client.lock().await.volume().await
    }
    async fn set_volume(&self, level: f32) -> Result<()> {
        self.client
            .lock()
            .await
            .set_property("dmcp.device-volume", &format!("{level:.0}"))
            .await
    }
    async fn volume_up(&self) -> Result<()> {
        self.client.lock().await.command("volumeup").await
    }
    async fn volume_down(&self) -> Result<()> {
        self.client.lock().await.command("volumedown").await
    }
}

#[async_trait]
impl PushUpdater for DmapStack {
    async fn start(&self, initial_delay: Option<Duration>) -> Result<()> {
        self.push.start(initial_delay);
        Ok(())
    }
    async fn stop(&self) {
        self.push.stop();
    }
    fn is_active(&self) -> bool {
        self.push.is_active()
    }
}

// ---------------------------------------------------------- Companion

/// Companion capability bundle.
pub struct CompanionStack {
    client: Arc<CompanionClient>,
}

impl CompanionStack {
    /// Wire a Companion client into the facade.
    #[must_use]
    pub fn setup(client: Arc<CompanionClient>) -> SetupData {
        let stack = Arc::new(Self {
            client: client.clone(),
        });
        use FeatureName as F;
        let features: FeatureSet = [
            F::Up,
            F::Down,
            F::Left,
            F::Right,
            F::Select,
            F::Menu,
            F::Home,
            F::PlayPause,
            F::VolumeUp,
            F::VolumeDown,
            F::TurnOn,
            F::TurnOff,
            F::PowerState,
            F::AppList,
            F::LaunchApp,
            F::TextGet,
            F::TextSet,
            F::TextAppend,
            F::TextClear,
            F::TextFocusState,
        ]
        .into();

        SetupData {
            protocol: Protocol::Companion,
            features,
            remote_control: Some(stack.clone()),
            metadata: None,
            power: Some(stack.clone()),
            audio: Some(stack.clone()),
            apps: Some(stack.clone()),
            keyboard: Some(stack),
            stream: None,
            push_updater: None,
            close: Box::new(move || client.close()),
        }
    }
}

#[async_trait]
impl RemoteControl for CompanionStack {
    async fn up(&self, _action: InputAction) -> Result<()> {
        self.client.hid_command(hid_command::UP).await
    }
    async fn down(&self, _action: InputAction) -> Result<()> {
        self.client.hid_command(hid_command::DOWN).await
    }
    async fn left(&self, _action: InputAction) -> Result<()> {
        self.client.hid_command(hid_command::LEFT).await
    }
    async fn right(&self, _action: InputAction) -> Result<()> {
        self.client.hid_command(hid_command::RIGHT).await
    }
    async fn select(&self, _action: InputAction) -> Result<()> {
        self.client.hid_command(hid_command::SELECT).await
    }
    async fn menu(&self, _action: InputAction) -> Result<()> {
        self.client.hid_command(hid_command::MENU).await
    }
    async fn home(&self, _action: InputAction) -> Result<()> {
        self.client.hid_command(hid_command::HOME).await
    }
    async fn play_pause(&self) -> Result<()> {
        self.client.hid_command(hid_command::PLAY_PAUSE).await
    }
}

#[async_trait]
impl Power for CompanionStack {
    async fn turn_on(&self) -> Result<()> {
        self.client.turn_on().await
    }
    async fn turn_off(&self) -> Result<()> {
        self.client.turn_off().await
    }
    fn power_state(&self) -> crate::interface::PowerState {
        self.client.power_state()
    }
}

#[async_trait]
impl Audio for CompanionStack {
    async fn volume_up(&self) -> Result<()> {
        self.client.hid_command(hid_command::VOLUME_UP).await
    }
    async fn volume_down(&self) -> Result<()> {
        self.client.hid_command(hid_command::VOLUME_DOWN).await
    }
}

#[async_trait]
impl Apps for CompanionStack {
    async fn app_list(&self) -> Result<Vec<App>> {
        self.client.app_list().await
    }
    async fn launch_app(&self, bundle_id_or_url: &str) -> Result<()> {
        self.client.launch_app(bundle_id_or_url).await
    }
}

#[async_trait]
impl Keyboard for CompanionStack {
    async fn text_get(&self) -> Result<Option<String>> {
        self.client.text_get().await
    }
    async fn text_set(&self, text: &str) -> Result<()> {
        self.client.text_set(text).await
    }
    async fn text_append(&self, text: &str) -> Result<()> {
        self.client.text_append(text).await
    }
    async fn text_clear(&self) -> Result<()> {
        self.client.text_clear().await
    }
    fn text_focus_state(&self) -> KeyboardFocusState {
        self.client.keyboard_focus()
    }
}

// ------------------------------------------------------------ AirPlay

/// AirPlay capability bundle.
pub struct AirPlayStack {
    client: Mutex<AirPlayClient>,
}

impl AirPlayStack {
    /// Wire an AirPlay client into the facade.
    #[must_use]
    pub fn setup(client: AirPlayClient) -> SetupData {
        let stack = Arc::new(Self {
            client: Mutex::new(client),
        });
        use FeatureName as F;
        let features: FeatureSet = [F::PlayUrl, F::Play, F::Pause, F::Stop].into();

        SetupData {
            protocol: Protocol::AirPlay,
            features,
            remote_control: Some(stack.clone()),
            metadata: None,
            power: None,
            audio: None,
            apps: None,
            keyboard: None,
            stream: Some(stack),
            push_updater: None,
            close: Box::new(Vec::new),
        }
    }
}

#[async_trait]
impl Stream for AirPlayStack {
    async fn play_url(&self, url: &str) -> Result<()> {
        self.client.lock().await.play_url(url, 0.0).await
    }
}

#[async_trait]
impl RemoteControl for AirPlayStack {
    async fn play(&self) -> Result<()> {
        self.client.lock().await.set_rate(1.0).await
    }
    async fn pause(&self) -> Result<()> {
        self.client.lock().await.set_rate(0.0).await
    }
    async fn stop(&self) -> Result<()> {
        self.client.lock().await.stop().await
    }
}

// --------------------------------------------------------------- RAOP

/// RAOP capability bundle: builds one streaming session per file.
pub struct RaopStack {
    remote: SocketAddr,
    properties: StreamProperties,
    password: Option<String>,
    volume: StdMutex<f32>,
}

impl RaopStack {
    /// Wire a RAOP target into the facade.
    #[must_use]
    pub fn setup(
        remote: SocketAddr,
        properties: StreamProperties,
        password: Option<String>,
    ) -> SetupData {
        let stack = Arc::new(Self {
            remote,
            properties,
            password,
            volume: StdMutex::new(50.0),
        });
        use FeatureName as F;
        let features: FeatureSet = [F::StreamFile, F::SetVolume, F::Volume, F::VolumeUp, F::VolumeDown].into();

        SetupData {
            protocol: Protocol::Raop,
            features,
            remote_control: None,
            metadata: None,
            power: None,
            audio: Some(stack.clone()),
            apps: None,
            keyboard: None,
            stream: Some(stack),
            push_updater: None,
            close: Box::new(Vec::new),
        }
    }

    fn stored_volume(&self) -> f32 {
        *self
            .volume
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl Stream for RaopStack {
    async fn stream_file(&self, path: PathBuf) -> Result<()> {
        #[cfg(feature = "decoders")]
        {
            let source = audio::open_file(&path).await?;
            let connection = HttpConnection::connect(self.remote).await?;
            let local_address = connection.local_addr()?.ip();
            let mut session = RaopSession::new(connection, local_address);
            session.set_password(self.password.clone());
            let streamer = RaopStreamer::new(session, self.properties, self.remote.ip());
            streamer
                .stream(source, local_address, self.stored_volume())
                .await?;
            Ok(())
        }
        #[cfg(not(feature = "decoders"))]
        {
            let _ = path;
            Err(crate::error::AtvError::NotSupported)
        }
    }
}

#[async_trait]
impl Audio for RaopStack {
    async fn volume(&self) -> Result<f32> {
        Ok(self.stored_volume())
    }
    async fn set_volume(&self, level: f32) -> Result<()> {
        *self
            .volume
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = level;
        Ok(())
    }
    async fn volume_up(&self) -> Result<()> {
        let level = (self.stored_volume() + 5.0).min(100.0);
        self.set_volume(level).await
    }
    async fn volume_down(&self) -> Result<()> {
        let level = (self.stored_volume() - 5.0).max(0.0);
        self.set_volume(level).await
    }
}
