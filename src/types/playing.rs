//! Snapshot of what a device is currently playing

use sha2::{Digest, Sha256};

/// Kind of media being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    /// Nothing known about the content
    #[default]
    Unknown,
    /// Video content
    Video,
    /// Music content
    Music,
    /// TV show episode
    Tv,
}

/// Playback state reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// No app is playing anything
    #[default]
    Idle,
    /// Content is buffering
    Loading,
    /// Playback stopped
    Stopped,
    /// Playback paused
    Paused,
    /// Playback in progress
    Playing,
    /// Seek in progress
    Seeking,
    /// Fast-forwarding
    FastForward,
    /// Rewinding
    Rewind,
}

/// Repeat mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatState {
    /// No repeat
    #[default]
    Off,
    /// Repeat current track
    Track,
    /// Repeat whole queue
    All,
}

/// Shuffle mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShuffleState {
    /// No shuffle
    #[default]
    Off,
    /// Shuffle by album
    Albums,
    /// Shuffle by song
    Songs,
}

/// Immutable content snapshot emitted by push updaters.
///
/// Times are whole seconds; floating-point protocol values are rounded
/// at construction. The equality [`hash`](PlayingState::hash) is used to
/// suppress redundant push updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayingState {
    /// Kind of media
    pub media_type: MediaType,
    /// Playback state
    pub device_state: DeviceState,
    /// Title
    pub title: Option<String>,
    /// Artist
    pub artist: Option<String>,
    /// Album
    pub album: Option<String>,
    /// Genre
    pub genre: Option<String>,
    /// Total length in seconds
    pub total_time: Option<u32>,
    /// Current position in seconds
    pub position: Option<u32>,
    /// Season number (TV content)
    pub season_number: Option<u32>,
    /// Episode number (TV content)
    pub episode_number: Option<u32>,
    /// Series name (TV content)
    pub series_name: Option<String>,
    /// Repeat mode
    pub repeat: RepeatState,
    /// Shuffle mode
    pub shuffle: ShuffleState,
    /// Content identifier from the source app, when reported
    pub content_identifier: Option<String>,
}

impl PlayingState {
    /// Round a floating-point protocol time to whole seconds, rejecting
    /// non-finite and negative values.
    #[must_use]
    pub fn round_time(value: f64) -> Option<u32> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(value.round() as u32)
    }

    /// Content hash over `title|artist|album|total_time`.
    ///
    /// Two snapshots with the same hash describe the same content, so a
    /// push updater emits only when the hash changes or playback state
    /// fields differ.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_deref().unwrap_or_default());
        hasher.update(b"|");
        hasher.update(self.artist.as_deref().unwrap_or_default());
        hasher.update(b"|");
        hasher.update(self.album.as_deref().unwrap_or_default());
        hasher.update(b"|");
        hasher.update(
            self.total_time
                .map(|t| t.to_string())
                .unwrap_or_default(),
        );
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for PlayingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.device_state)?;
        if let Some(title) = &self.title {
            write!(f, " {title}")?;
        }
        if let Some(artist) = &self.artist {
            write!(f, " by {artist}")?;
        }
        if let (Some(pos), Some(total)) = (self.position, self.total_time) {
            write!(f, " ({pos}/{total}s)")?;
        }
        Ok(())
    }
}
