//! Capability interfaces implemented by the protocol stacks
//!
//! Every operation has a default implementation failing with
//! [`AtvError::NotSupported`]; a stack overrides the subset it actually
//! implements and declares that subset through [`FeatureName`] sets so
//! the relayer can route calls.

use crate::error::{AtvError, Result};
use crate::types::{PlayingState, Protocol};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Modifier for HID-style button presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputAction {
    /// Press and release
    #[default]
    SingleTap,
    /// Two quick presses
    DoubleTap,
    /// Press and hold
    Hold,
}

/// Power state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    /// State not known
    #[default]
    Unknown,
    /// Device is off or asleep
    Off,
    /// Device is on
    On,
}

/// Virtual keyboard focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyboardFocusState {
    /// Focus not known
    #[default]
    Unknown,
    /// A text field has focus
    Focused,
    /// No text field has focus
    Unfocused,
}

/// Availability of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeatureState {
    /// Supported but state cannot be determined
    #[default]
    Unknown,
    /// No configured protocol implements it
    Unsupported,
    /// Implemented but currently unusable
    Unavailable,
    /// Ready for use
    Available,
}

/// All operations routable through the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FeatureName {
    Up,
    Down,
    Left,
    Right,
    Select,
    Menu,
    Home,
    HomeHold,
    TopMenu,
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Previous,
    SkipForward,
    SkipBackward,
    SetPosition,
    SetRepeat,
    SetShuffle,
    Playing,
    Artwork,
    PushUpdates,
    Volume,
    SetVolume,
    VolumeUp,
    VolumeDown,
    TurnOn,
    TurnOff,
    PowerState,
    AppList,
    LaunchApp,
    PlayUrl,
    StreamFile,
    TextGet,
    TextSet,
    TextAppend,
    TextClear,
    TextFocusState,
}

/// Computed availability answer for one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureInfo {
    /// Queried feature
    pub name: FeatureName,
    /// Availability
    pub state: FeatureState,
    /// Protocol serving the feature, when available
    pub protocol: Option<Protocol>,
}

/// Artwork for the currently playing item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artwork {
    /// Image bytes
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `image/jpeg`
    pub mimetype: String,
    /// Pixel width, when known
    pub width: Option<u32>,
    /// Pixel height, when known
    pub height: Option<u32>,
}

/// Remote control buttons and transport commands.
#[async_trait]
#[allow(unused_variables)]
pub trait RemoteControl: Send + Sync {
    /// Press up.
    async fn up(&self, action: InputAction) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Press down.
    async fn down(&self, action: InputAction) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Press left.
    async fn left(&self, action: InputAction) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Press right.
    async fn right(&self, action: InputAction) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Press select.
    async fn select(&self, action: InputAction) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Press menu.
    async fn menu(&self, action: InputAction) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Press home.
    async fn home(&self, action: InputAction) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Go to the top menu.
    async fn top_menu(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Start playback.
    async fn play(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Pause playback.
    async fn pause(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Toggle between play and pause.
    async fn play_pause(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Stop playback.
    async fn stop(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Next item.
    async fn next(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Previous item.
    async fn previous(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Seek to an absolute position in seconds.
    async fn set_position(&self, position: u32) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Skip forward by a relative amount.
    async fn skip_forward(&self, seconds: u32) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Skip backward by a relative amount.
    async fn skip_backward(&self, seconds: u32) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Change repeat mode.
    async fn set_repeat(&self, repeat: crate::types::RepeatState) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Change shuffle mode.
    async fn set_shuffle(&self, shuffle: crate::types::ShuffleState) -> Result<()> {
        Err(AtvError::NotSupported)
    }
}

/// Metadata about what is playing.
#[async_trait]
#[allow(unused_variables)]
pub trait Metadata: Send + Sync {
    /// Current play state snapshot.
    async fn playing(&self) -> Result<PlayingState> {
        Err(AtvError::NotSupported)
    }
    /// Artwork for the playing item, optionally scaled.
    async fn artwork(&self, width: Option<u32>, height: Option<u32>) -> Result<Artwork> {
        Err(AtvError::NotSupported)
    }
    /// Identifier of the playing content, when reported.
    async fn content_identifier(&self) -> Result<Option<String>> {
        Err(AtvError::NotSupported)
    }
}

/// Device power control.
#[async_trait]
pub trait Power: Send + Sync {
    /// Wake the device.
    async fn turn_on(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Put the device to sleep.
    async fn turn_off(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Last known power state.
    fn power_state(&self) -> PowerState {
        PowerState::Unknown
    }
}

/// Volume control.
#[async_trait]
#[allow(unused_variables)]
pub trait Audio: Send + Sync {
    /// Current volume in percent (0.0 to 100.0).
    async fn volume(&self) -> Result<f32> {
        Err(AtvError::NotSupported)
    }
    /// Set the absolute volume in percent.
    async fn set_volume(&self, level: f32) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Step the volume up.
    async fn volume_up(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Step the volume down.
    async fn volume_down(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
}

/// An installed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct App {
    /// Display name, when reported
    pub name: Option<String>,
    /// Bundle identifier
    pub identifier: String,
}

/// App listing and launching.
#[async_trait]
#[allow(unused_variables)]
pub trait Apps: Send + Sync {
    /// Installed (launchable) applications.
    async fn app_list(&self) -> Result<Vec<App>> {
        Err(AtvError::NotSupported)
    }
    /// Launch an app by bundle identifier or URL.
    async fn launch_app(&self, bundle_id_or_url: &str) -> Result<()> {
        Err(AtvError::NotSupported)
    }
}

/// Virtual keyboard access.
#[async_trait]
#[allow(unused_variables)]
pub trait Keyboard: Send + Sync {
    /// Current text field contents.
    async fn text_get(&self) -> Result<Option<String>> {
        Err(AtvError::NotSupported)
    }
    /// Replace the text field contents.
    async fn text_set(&self, text: &str) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Append to the text field.
    async fn text_append(&self, text: &str) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Clear the text field.
    async fn text_clear(&self) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Current focus state.
    fn text_focus_state(&self) -> KeyboardFocusState {
        KeyboardFocusState::Unknown
    }
}

/// Media streaming to the device.
#[async_trait]
#[allow(unused_variables)]
pub trait Stream: Send + Sync {
    /// Play a URL (video) on the device.
    async fn play_url(&self, url: &str) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Stream a local audio file to the device.
    async fn stream_file(&self, path: PathBuf) -> Result<()> {
        Err(AtvError::NotSupported)
    }
}

/// Push update control.
#[async_trait]
#[allow(unused_variables)]
pub trait PushUpdater: Send + Sync {
    /// Begin delivering push updates to listeners.
    ///
    /// `initial_delay` seeds the reconnect backoff.
    async fn start(&self, initial_delay: Option<Duration>) -> Result<()> {
        Err(AtvError::NotSupported)
    }
    /// Stop delivering push updates.
    async fn stop(&self) {}
    /// True while the update loop runs.
    fn is_active(&self) -> bool {
        false
    }
}

/// The set of operations a protocol stack implements, used by the
/// relayer to compute candidates.
pub type FeatureSet = HashSet<FeatureName>;
