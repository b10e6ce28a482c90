//! Facade: one device handle over many protocol stacks

pub mod device;
pub mod relayer;
pub mod stacks;

#[cfg(test)]
mod tests;

pub use device::AppleTv;
pub use relayer::{AUDIO_PRIORITY, DEFAULT_PRIORITY, POWER_PRIORITY, Relayer};
pub use stacks::SetupData;
