//! Core types

pub mod config;
pub mod credentials;
pub mod playing;

#[cfg(test)]
mod tests;

pub use config::{
    DeviceConfiguration, DeviceInfo, PairingRequirement, Protocol, Service,
};
pub use credentials::{Credentials, DmapCredentials, HapCredentials, LegacyCredentials};
pub use playing::{DeviceState, MediaType, PlayingState, RepeatState, ShuffleState};
