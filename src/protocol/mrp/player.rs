//! Player registry and active-player election
//!
//! `SetState`, `UpdateClient`, `UpdateContentItem` and
//! `UpdateOutputDevice` feed the registry. The active player is the
//! client named by the latest `SetNowPlayingClient`; ties resolve to
//! the most recent playback-state timestamp. Exactly zero or one player
//! is active at any time.

use super::messages::{
    NowPlayingInfo, PlayerPath, SetNowPlayingClientMessage, SetStateMessage, SupportedCommands,
    UpdateClientMessage, UpdateContentItemMessage, playback_state,
};
use crate::types::{DeviceState, MediaType, PlayingState, RepeatState, ShuffleState};
use std::collections::HashMap;
use std::time::Instant;

/// One tracked player.
#[derive(Debug, Clone)]
pub struct Player {
    /// Client bundle identifier, e.g. `com.apple.TVMusic`
    pub bundle_identifier: String,
    /// Display name reported by the client
    pub display_name: Option<String>,
    /// Last playback state value
    pub playback_state: Option<i32>,
    /// Last now-playing payload
    pub now_playing: Option<NowPlayingInfo>,
    /// Commands the player reports as available
    pub supported_commands: Option<SupportedCommands>,
    /// When the playback state last changed (local clock)
    pub state_updated: Instant,
}

fn path_key(path: Option<&PlayerPath>) -> String {
    let bundle = path
        .and_then(|p| p.client.as_ref())
        .and_then(|c| c.bundle_identifier.as_deref())
        .unwrap_or("unknown");
    let player = path
        .and_then(|p| p.player.as_ref())
        .and_then(|p| p.identifier.as_deref())
        .unwrap_or("default");
    format!("{bundle}/{player}")
}

/// Registry of players seen on one MRP connection.
#[derive(Default)]
pub struct PlayerRegistry {
    players: HashMap<String, Player>,
    active_bundle: Option<String>,
}

impl PlayerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a `SetState` message.
    pub fn handle_set_state(&mut self, message: &SetStateMessage) {
        let key = path_key(message.player_path.as_ref());
        let bundle = message
            .player_path
            .as_ref()
            .and_then(|p| p.client.as_ref())
            .and_then(|c| c.bundle_identifier.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let player = self.players.entry(key).or_insert_with(|| Player {
            bundle_identifier: bundle.clone(),
            display_name: None,
            playback_state: None,
            now_playing: None,
            supported_commands: None,
            state_updated: Instant::now(),
        });

        if let Some(state) = message.playback_state {
            if player.playback_state != Some(state) {
                player.state_updated = Instant::now();
            }
            player.playback_state = Some(state);
        }
        if let Some(info) = &message.now_playing_info {
            player.now_playing = Some(info.clone());
            player.state_updated = Instant::now();
        }
        if let Some(commands) = &message.supported_commands {
            player.supported_commands = Some(commands.clone());
        }
    }

    /// Ingest an `UpdateClient` message.
    pub fn handle_update_client(&mut self, message: &UpdateClientMessage) {
        let Some(client) = &message.client else {
            return;
        };
        let Some(bundle) = client.bundle_identifier.as_deref() else {
            return;
        };
        for player in self.players.values_mut() {
            if player.bundle_identifier == bundle
                && let Some(name) = &client.display_name
            {
                player.display_name = Some(name.clone());
            }
        }
    }

    /// Ingest an `UpdateContentItem`: merge metadata into the player's
    /// now-playing info.
    pub fn handle_update_content_item(&mut self, message: &UpdateContentItemMessage) {
        let key = path_key(message.player_path.as_ref());
        let Some(player) = self.players.get_mut(&key) else {
            return;
        };
        let info = player.now_playing.get_or_insert_with(NowPlayingInfo::default);
        for item in &message.content_items {
            let Some(metadata) = &item.metadata else {
                continue;
            };
            if metadata.title.is_some() {
                info.title = metadata.title.clone();
            }
            if metadata.artist.is_some() {
                info.artist = metadata.artist.clone();
            }
            if metadata.album.is_some() {
                info.album = metadata.album.clone();
            }
            if metadata.duration.is_some() {
                info.duration = metadata.duration;
            }
            if metadata.content_identifier.is_some() {
                info.content_identifier = metadata.content_identifier.clone();
            }
        }
    }

    /// Ingest a `SetNowPlayingClient`: elects the active client.
    pub fn handle_set_now_playing_client(&mut self, message: &SetNowPlayingClientMessage) {
        self.active_bundle = message
            .client
            .as_ref()
            .and_then(|c| c.bundle_identifier.clone());
    }

    /// The active player, when any.
    #[must_use]
    pub fn active(&self) -> Option<&Player> {
        if let Some(bundle) = &self.active_bundle {
            let named = self
                .players
                .values()
                .filter(|p| &p.bundle_identifier == bundle)
                .max_by_key(|p| p.state_updated);
            if named.is_some() {
                return named;
            }
        }
        self.players.values().max_by_key(|p| p.state_updated)
    }

    /// Snapshot of what the active player is doing.
    ///
    /// Position extrapolates from the last report:
    /// `elapsed + (now - reported_at) * rate` while playing. A playback
    /// rate of zero while the state says playing is reported as paused
    /// (some apps pause without changing state).
    #[must_use]
    pub fn playing_state(&self) -> PlayingState {
        let Some(player) = self.active() else {
            return PlayingState::default();
        };

        let info = player.now_playing.as_ref();
        let rate = info.and_then(|i| i.playback_rate).unwrap_or(0.0);
        let mut device_state = match player.playback_state {
            Some(playback_state::PLAYING) => DeviceState::Playing,
            Some(playback_state::PAUSED) => DeviceState::Paused,
            Some(playback_state::STOPPED) => DeviceState::Stopped,
            Some(playback_state::INTERRUPTED) => DeviceState::Loading,
            Some(playback_state::SEEKING) => DeviceState::Seeking,
            _ => DeviceState::Idle,
        };
        if device_state == DeviceState::Playing && rate == 0.0 {
            device_state = DeviceState::Paused;
        }

        let elapsed = info.and_then(|i| i.elapsed_time).unwrap_or(0.0);
        let position = if device_state == DeviceState::Playing {
            elapsed + player.state_updated.elapsed().as_secs_f64() * f64::from(rate)
        } else {
            elapsed
        };

        PlayingState {
            media_type: match info.and_then(|i| i.media_type) {
                Some(1) => MediaType::Music,
                Some(2) => MediaType::Video,
                Some(3) => MediaType::Tv,
                _ => MediaType::Unknown,
            },
            device_state,
            title: info.and_then(|i| i.title.clone()),
            artist: info.and_then(|i| i.artist.clone()),
            album: info.and_then(|i| i.album.clone()),
            genre: info.and_then(|i| i.genre.clone()),
            total_time: info
                .and_then(|i| i.duration)
                .and_then(PlayingState::round_time),
            position: PlayingState::round_time(position),
            season_number: info
                .and_then(|i| i.season_number)
                .and_then(|n| u32::try_from(n).ok()),
            episode_number: info
                .and_then(|i| i.episode_number)
                .and_then(|n| u32::try_from(n).ok()),
            series_name: info.and_then(|i| i.series_name.clone()),
            repeat: match info.and_then(|i| i.repeat_mode) {
                Some(2) => RepeatState::Track,
                Some(3) => RepeatState::All,
                _ => RepeatState::Off,
            },
            shuffle: match info.and_then(|i| i.shuffle_mode) {
                Some(2) => ShuffleState::Albums,
                Some(3) => ShuffleState::Songs,
                _ => ShuffleState::Off,
            },
            content_identifier: info.and_then(|i| i.content_identifier.clone()),
        }
    }
}
