//! The unified device handle

use super::relayer::{AUDIO_PRIORITY, DEFAULT_PRIORITY, POWER_PRIORITY, Relayer};
use super::stacks::SetupData;
use crate::error::{AtvError, Result};
use crate::interface::{
    App, Apps, Artwork, Audio, FeatureInfo, FeatureName, FeatureState, InputAction, Keyboard,
    KeyboardFocusState, Metadata, Power, PowerState, PushUpdater, RemoteControl, Stream,
};
use crate::state::{ListenerHandle, StateProducer};
use crate::types::{DeviceConfiguration, PlayingState, Protocol, RepeatState, ShuffleState};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Small LRU for artwork, keyed by content identifier and size hint.
struct ArtworkCache {
    entries: VecDeque<((String, Option<u32>, Option<u32>), Artwork)>,
}

impl ArtworkCache {
    const CAPACITY: usize = 4;

    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &(String, Option<u32>, Option<u32>)) -> Option<Artwork> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(index)?;
        let artwork = entry.1.clone();
        self.entries.push_back(entry);
        Some(artwork)
    }

    fn put(&mut self, key: (String, Option<u32>, Option<u32>), artwork: Artwork) {
        self.entries.retain(|(k, _)| *k != key);
        if self.entries.len() >= Self::CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((key, artwork));
    }
}

/// One connected device: capability calls are validated here and
/// relayed to the highest-priority protocol implementing them.
pub struct AppleTv {
    config: DeviceConfiguration,
    producer: Arc<StateProducer>,
    remote_control: Relayer<dyn RemoteControl>,
    metadata: Relayer<dyn Metadata>,
    power: Relayer<dyn Power>,
    audio: Relayer<dyn Audio>,
    apps: Relayer<dyn Apps>,
    keyboard: Relayer<dyn Keyboard>,
    stream: Relayer<dyn Stream>,
    push_updater: StdMutex<Relayer<dyn PushUpdater>>,
    artwork_cache: StdMutex<ArtworkCache>,
    closers: Vec<Box<dyn Fn() -> Vec<JoinHandle<()>> + Send + Sync>>,
    closed: std::sync::atomic::AtomicBool,
}

impl AppleTv {
    /// Assemble the facade from per-protocol registrations.
    #[must_use]
    pub fn new(
        config: DeviceConfiguration,
        producer: Arc<StateProducer>,
        setups: Vec<SetupData>,
    ) -> Self {
        let mut remote_control = Relayer::new(&DEFAULT_PRIORITY);
        let mut metadata = Relayer::new(&DEFAULT_PRIORITY);
        let mut power = Relayer::new(&POWER_PRIORITY);
        let mut audio = Relayer::new(&AUDIO_PRIORITY);
        let mut apps = Relayer::new(&DEFAULT_PRIORITY);
        let mut keyboard = Relayer::new(&DEFAULT_PRIORITY);
        let mut stream = Relayer::new(&AUDIO_PRIORITY);
        let mut push_updater = Relayer::new(&DEFAULT_PRIORITY);
        let mut closers: Vec<Box<dyn Fn() -> Vec<JoinHandle<()>> + Send + Sync>> = Vec::new();

        for setup in setups {
            let features = setup.features;
            if let Some(instance) = setup.remote_control {
                remote_control.register(setup.protocol, instance, features.clone());
            }
            if let Some(instance) = setup.metadata {
                metadata.register(setup.protocol, instance, features.clone());
            }
            if let Some(instance) = setup.power {
                power.register(setup.protocol, instance, features.clone());
            }
            if let Some(instance) = setup.audio {
                audio.register(setup.protocol, instance, features.clone());
            }
            if let Some(instance) = setup.apps {
                apps.register(setup.protocol, instance, features.clone());
            }
            if let Some(instance) = setup.keyboard {
                keyboard.register(setup.protocol, instance, features.clone());
            }
            if let Some(instance) = setup.stream {
                stream.register(setup.protocol, instance, features.clone());
            }
            if let Some(instance) = setup.push_updater {
                push_updater.register(setup.protocol, instance, features);
            }
            closers.push(setup.close);
        }

        Self {
            config,
            producer,
            remote_control,
            metadata,
            power,
            audio,
            apps,
            keyboard,
            stream,
            push_updater: StdMutex::new(push_updater),
            artwork_cache: StdMutex::new(ArtworkCache::new()),
            closers,
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// The configuration this handle was built from.
    #[must_use]
    pub fn config(&self) -> &DeviceConfiguration {
        &self.config
    }

    /// Register a device event listener.
    pub fn add_listener(
        &self,
        listener: Weak<dyn crate::state::DeviceListener>,
    ) -> Option<ListenerHandle> {
        self.producer.register(listener)
    }

    // ------------------------------------------------- remote control

    /// Press a directional/menu button.
    ///
    /// # Errors
    ///
    /// [`AtvError::NotSupported`] without a provider; provider errors
    /// pass through.
    pub async fn up(&self, action: InputAction) -> Result<()> {
        self.remote_control.relay(FeatureName::Up)?.up(action).await
    }
    /// Press down.
    pub async fn down(&self, action: InputAction) -> Result<()> {
        self.remote_control
            .relay(FeatureName::Down)?
            .down(action)
            .await
    }
    /// Press left.
    pub async fn left(&self, action: InputAction) -> Result<()> {
        self.remote_control
            .relay(FeatureName::Left)?
            .left(action)
            .await
    }
    /// Press right.
    pub async fn right(&self, action: InputAction) -> Result<()> {
        self.remote_control
            .relay(FeatureName::Right)?
            .right(action)
            .await
    }
    /// Press select.
    pub async fn select(&self, action: InputAction) -> Result<()> {
        self.remote_control
            .relay(FeatureName::Select)?
            .select(action)
            .await
    }
    /// Press menu.
    pub async fn menu(&self, action: InputAction) -> Result<()> {
        self.remote_control
            .relay(FeatureName::Menu)?
            .menu(action)
            .await
    }
    /// Press home.
    pub async fn home(&self, action: InputAction) -> Result<()> {
        self.remote_control
            .relay(FeatureName::Home)?
            .home(action)
            .await
    }
    /// Go to the top menu.
    pub async fn top_menu(&self) -> Result<()> {
        self.remote_control.relay(FeatureName::TopMenu)?.top_menu().await
    }
    /// Start playback.
    pub async fn play(&self) -> Result<()> {
        self.remote_control.relay(FeatureName::Play)?.play().await
    }
    /// Pause playback.
    pub async fn pause(&self) -> Result<()> {
        self.remote_control.relay(FeatureName::Pause)?.pause().await
    }
    /// Toggle play/pause.
    pub async fn play_pause(&self) -> Result<()> {
        self.remote_control
            .relay(FeatureName::PlayPause)?
            .play_pause()
            .await
    }
    /// Stop playback.
    pub async fn stop(&self) -> Result<()> {
        self.remote_control.relay(FeatureName::Stop)?.stop().await
    }
    /// Next item.
    pub async fn next(&self) -> Result<()> {
        self.remote_control.relay(FeatureName::Next)?.next().await
    }
    /// Previous item.
    pub async fn previous(&self) -> Result<()> {
        self.remote_control
            .relay(FeatureName::Previous)?
            .previous()
            .await
    }

    /// Seek to an absolute position in seconds.
    ///
    /// # Errors
    ///
    /// [`AtvError::InvalidArgument`] for NaN or negative positions.
    pub async fn set_position(&self, position: f64) -> Result<()> {
        if position.is_nan() {
            return Err(AtvError::InvalidArgument("position is NaN".to_string()));
        }
        if position < 0.0 {
            return Err(AtvError::InvalidArgument(
                "position must not be negative".to_string(),
            ));
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let position = position.round() as u32;
        self.remote_control
            .relay(FeatureName::SetPosition)?
            .set_position(position)
            .await
    }

    /// Skip forward.
    pub async fn skip_forward(&self, seconds: u32) -> Result<()> {
        self.remote_control
            .relay(FeatureName::SkipForward)?
            .skip_forward(seconds)
            .await
    }
    /// Skip backward.
    pub async fn skip_backward(&self, seconds: u32) -> Result<()> {
        self.remote_control
            .relay(FeatureName::SkipBackward)?
            .skip_backward(seconds)
            .await
    }
    /// Change repeat mode.
    pub async fn set_repeat(&self, repeat: RepeatState) -> Result<()> {
        self.remote_control
            .relay(FeatureName::SetRepeat)?
            .set_repeat(repeat)
            .await
    }
    /// Change shuffle mode.
    pub async fn set_shuffle(&self, shuffle: ShuffleState) -> Result<()> {
        self.remote_control
            .relay(FeatureName::SetShuffle)?
            .set_shuffle(shuffle)
            .await
    }

    // -------------------------------------------------------- metadata

    /// What the device is playing.
    pub async fn playing(&self) -> Result<PlayingState> {
        self.metadata.relay(FeatureName::Playing)?.playing().await
    }

    /// Artwork for the playing item, served from a small cache keyed by
    /// content identity and requested size.
    pub async fn artwork(&self, width: Option<u32>, height: Option<u32>) -> Result<Artwork> {
        let provider = self.metadata.relay(FeatureName::Artwork)?;

        // Identify content; a synthetic key still caches the result
        let identifier = match provider.content_identifier().await {
            Ok(Some(id)) => id,
            _ => match provider.playing().await {
                Ok(playing) => playing.hash(),
                Err(_) => "synthetic".to_string(),
            },
        };
        let key = (identifier, width, height);

        if let Some(cached) = self
            .artwork_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
        {
            return Ok(cached);
        }

        let artwork = provider.artwork(width, height).await?;
        self.artwork_cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .put(key, artwork.clone());
        Ok(artwork)
    }

    // ----------------------------------------------------------- power

    /// Wake the device.
    pub async fn turn_on(&self) -> Result<()> {
        self.power.relay(FeatureName::TurnOn)?.turn_on().await
    }
    /// Put the device to sleep.
    pub async fn turn_off(&self) -> Result<()> {
        self.power.relay(FeatureName::TurnOff)?.turn_off().await
    }
    /// Last known power state.
    #[must_use]
    pub fn power_state(&self) -> PowerState {
        self.power
            .main_instance()
            .map_or(PowerState::Unknown, |p| p.power_state())
    }

    // ----------------------------------------------------------- audio

    /// Current volume in percent.
    pub async fn volume(&self) -> Result<f32> {
        self.audio.relay(FeatureName::Volume)?.volume().await
    }

    /// Set the volume in percent.
    ///
    /// # Errors
    ///
    /// [`AtvError::InvalidArgument`] outside 0.0 to 100.0.
    pub async fn set_volume(&self, level: f32) -> Result<()> {
        if !level.is_finite() || !(0.0..=100.0).contains(&level) {
            return Err(AtvError::InvalidArgument(format!(
                "volume {level} not in [0.0, 100.0]"
            )));
        }
        self.audio
            .relay(FeatureName::SetVolume)?
            .set_volume(level)
            .await
    }

    /// Step the volume up.
    pub async fn volume_up(&self) -> Result<()> {
        self.audio.relay(FeatureName::VolumeUp)?.volume_up().await
    }
    /// Step the volume down.
    pub async fn volume_down(&self) -> Result<()> {
        self.audio
            .relay(FeatureName::VolumeDown)?
            .volume_down()
            .await
    }

    // ------------------------------------------------------------ apps

    /// Installed applications.
    pub async fn app_list(&self) -> Result<Vec<App>> {
        self.apps.relay(FeatureName::AppList)?.app_list().await
    }
    /// Launch an app.
    pub async fn launch_app(&self, bundle_id_or_url: &str) -> Result<()> {
        self.apps
            .relay(FeatureName::LaunchApp)?
            .launch_app(bundle_id_or_url)
            .await
    }

    // -------------------------------------------------------- keyboard

    /// Read the focused text field.
    pub async fn text_get(&self) -> Result<Option<String>> {
        self.keyboard.relay(FeatureName::TextGet)?.text_get().await
    }
    /// Replace the text field contents.
    pub async fn text_set(&self, text: &str) -> Result<()> {
        self.keyboard.relay(FeatureName::TextSet)?.text_set(text).await
    }
    /// Append to the text field.
    pub async fn text_append(&self, text: &str) -> Result<()> {
        self.keyboard
            .relay(FeatureName::TextAppend)?
            .text_append(text)
            .await
    }
    /// Clear the text field.
    pub async fn text_clear(&self) -> Result<()> {
        self.keyboard.relay(FeatureName::TextClear)?.text_clear().await
    }
    /// Current keyboard focus.
    #[must_use]
    pub fn text_focus_state(&self) -> KeyboardFocusState {
        self.keyboard
            .main_instance()
            .map_or(KeyboardFocusState::Unknown, |k| k.text_focus_state())
    }

    // ---------------------------------------------------------- stream

    /// Play a URL on the device.
    pub async fn play_url(&self, url: &str) -> Result<()> {
        self.stream.relay(FeatureName::PlayUrl)?.play_url(url).await
    }
    /// Stream a local audio file.
    pub async fn stream_file(&self, path: PathBuf) -> Result<()> {
        self.stream
            .relay(FeatureName::StreamFile)?
            .stream_file(path)
            .await
    }

    // ---------------------------------------------------- push updates

    /// Start push updates, choosing the best provider.
    pub async fn push_updates_start(&self, initial_delay: Option<Duration>) -> Result<()> {
        let provider = {
            let relayer = self
                .push_updater
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            relayer.relay(FeatureName::PushUpdates)?.clone()
        };
        provider.start(initial_delay).await
    }

    /// Stop push updates.
    pub async fn push_updates_stop(&self) {
        let provider = {
            let relayer = self
                .push_updater
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            relayer.relay(FeatureName::PushUpdates).ok().cloned()
        };
        if let Some(provider) = provider {
            provider.stop().await;
        }
    }

    /// A streaming-capable protocol takes over push updates from a
    /// polling one (e.g. MRP over DMAP long-poll).
    pub fn push_updates_take_over(&self, protocol: Protocol) {
        self.push_updater
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take_over(protocol);
    }

    /// Release a push update takeover.
    pub fn push_updates_release(&self) {
        self.push_updater
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .release();
    }

    // -------------------------------------------------------- features

    /// Availability of one feature, computed from the union of protocol
    /// reports.
    #[must_use]
    pub fn feature(&self, name: FeatureName) -> FeatureInfo {
        use FeatureName as F;
        let provider = match name {
            F::Playing | F::Artwork => self.metadata.provider(name),
            F::TurnOn | F::TurnOff | F::PowerState => self.power.provider(name),
            F::Volume | F::SetVolume | F::VolumeUp | F::VolumeDown => {
                self.audio.provider(name).or_else(|| {
                    // Remote-control style volume buttons count too
                    self.remote_control.provider(name)
                })
            }
            F::AppList | F::LaunchApp => self.apps.provider(name),
            F::TextGet | F::TextSet | F::TextAppend | F::TextClear | F::TextFocusState => {
                self.keyboard.provider(name)
            }
            F::PlayUrl | F::StreamFile => self.stream.provider(name),
            F::PushUpdates => self
                .push_updater
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .provider(name),
            _ => self.remote_control.provider(name),
        };

        match provider {
            Some(protocol) => FeatureInfo {
                name,
                state: FeatureState::Available,
                protocol: Some(protocol),
            },
            None => FeatureInfo {
                name,
                state: FeatureState::Unsupported,
                protocol: None,
            },
        }
    }

    // ----------------------------------------------------------- close

    /// Tear all protocol stacks down; returns the background tasks
    /// still draining so the caller may await them.
    pub fn close(&self) -> Vec<JoinHandle<()>> {
        if self
            .closed
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Vec::new();
        }
        let mut draining = Vec::new();
        for closer in &self.closers {
            draining.extend(closer());
        }
        draining
    }
}

impl Drop for AppleTv {
    fn drop(&mut self) {
        self.close();
    }
}
