//! PCM conversion: channel remixing and resampling
//!
//! Everything is converted to the receiver's declared format before
//! packetization. Channel count changes are simple mix rules; rate
//! changes go through an FFT resampler in fixed-size chunks.

use super::AudioFormat;
use crate::error::{AtvError, Result};
use rubato::{FftFixedIn, Resampler};

const RESAMPLE_CHUNK: usize = 1024;

/// Streaming PCM converter.
pub struct Converter {
    source: AudioFormat,
    target: AudioFormat,
    resampler: Option<FftFixedIn<f32>>,
    /// Channel-mixed samples waiting for a full resampler chunk
    pending: Vec<i16>,
}

/// Mix interleaved samples to the target channel count.
fn remix(samples: &[i16], from: u16, to: u16) -> Vec<i16> {
    if from == to {
        return samples.to_vec();
    }
    let from = usize::from(from);
    let mut out = Vec::with_capacity(samples.len() / from * usize::from(to));
    for frame in samples.chunks_exact(from) {
        match to {
            1 => {
                let sum: i32 = frame.iter().map(|s| i32::from(*s)).sum();
                #[allow(clippy::cast_possible_truncation)]
                out.push((sum / frame.len() as i32) as i16);
            }
            _ => {
                for channel in 0..usize::from(to) {
                    out.push(frame.get(channel).copied().unwrap_or(frame[0]));
                }
            }
        }
    }
    out
}

impl Converter {
    /// Create a converter between two formats.
    ///
    /// # Errors
    ///
    /// Fails when the resampler cannot be constructed.
    pub fn new(source: AudioFormat, target: AudioFormat) -> Result<Self> {
        let resampler = if source.sample_rate == target.sample_rate {
            None
        } else {
            Some(
                FftFixedIn::new(
                    source.sample_rate as usize,
                    target.sample_rate as usize,
                    RESAMPLE_CHUNK,
                    2,
                    usize::from(target.channels),
                )
                .map_err(|e| AtvError::Protocol(format!("resampler setup failed: {e}")))?,
            )
        };
        Ok(Self {
            source,
            target,
            resampler,
            pending: Vec::new(),
        })
    }

    /// Feed source samples; returns whatever converted output is ready.
    ///
    /// # Errors
    ///
    /// Fails when resampling fails.
    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<i16>> {
        let mixed = remix(samples, self.source.channels, self.target.channels);
        let Some(resampler) = &mut self.resampler else {
            return Ok(mixed);
        };

        self.pending.extend_from_slice(&mixed);
        let channels = usize::from(self.target.channels);
        let mut out = Vec::new();
        while self.pending.len() >= RESAMPLE_CHUNK * channels {
            let chunk: Vec<i16> = self.pending.drain(..RESAMPLE_CHUNK * channels).collect();
            out.extend(resample_chunk(resampler, &chunk, channels)?);
        }
        Ok(out)
    }

    /// Flush remaining buffered samples, zero-padding the last chunk.
    ///
    /// # Errors
    ///
    /// Fails when resampling fails.
    pub fn finish(&mut self) -> Result<Vec<i16>> {
        let Some(resampler) = &mut self.resampler else {
            return Ok(std::mem::take(&mut self.pending));
        };
        if self.pending.is_empty() {
            return Ok(Vec::new());
        }
        let channels = usize::from(self.target.channels);
        self.pending
            .resize(RESAMPLE_CHUNK * channels, 0);
        let tail: Vec<i16> = std::mem::take(&mut self.pending);
        resample_chunk(resampler, &tail, channels)
    }
}

/// Run one fixed-size interleaved chunk through the resampler.
fn resample_chunk(
    resampler: &mut FftFixedIn<f32>,
    chunk: &[i16],
    channels: usize,
) -> Result<Vec<i16>> {
    let mut planes = vec![Vec::with_capacity(RESAMPLE_CHUNK); channels];
    for frame in chunk.chunks_exact(channels) {
        for (plane, sample) in planes.iter_mut().zip(frame) {
            plane.push(f32::from(*sample) / f32::from(i16::MAX));
        }
    }
    let resampled = resampler
        .process(&planes, None)
        .map_err(|e| AtvError::Protocol(format!("resampling failed: {e}")))?;

    let frames = resampled.first().map_or(0, Vec::len);
    let mut out = Vec::with_capacity(frames * channels);
    for index in 0..frames {
        for plane in &resampled {
            #[allow(clippy::cast_possible_truncation)]
            out.push((plane[index].clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16);
        }
    }
    Ok(out)
}

/// One-shot conversion helper for fully buffered audio.
///
/// # Errors
///
/// Fails when resampling fails.
pub fn convert_all(
    samples: &[i16],
    source: AudioFormat,
    target: AudioFormat,
) -> Result<Vec<i16>> {
    let mut converter = Converter::new(source, target)?;
    let mut out = converter.push(samples)?;
    out.extend(converter.finish()?);
    Ok(out)
}
