//! Audio decoding and format conversion for streaming

pub mod convert;
pub mod source;

#[cfg(test)]
mod tests;

pub use convert::Converter;
#[cfg(feature = "decoders")]
pub use source::{open_file, open_reader};
pub use source::{AudioStream, MediaMetadata, from_pcm};

/// PCM audio format: signed 16-bit interleaved samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channels
    pub channels: u16,
}

impl AudioFormat {
    /// CD-quality stereo, the format most receivers accept.
    pub const DEFAULT: Self = Self {
        sample_rate: 44_100,
        channels: 2,
    };

    /// Frames per second worth of samples.
    #[must_use]
    pub fn samples_per_second(&self) -> usize {
        self.sample_rate as usize * usize::from(self.channels)
    }
}
