//! Audio sources: decoded PCM streams with metadata
//!
//! Decoding is blocking work and runs on the worker pool; decoded
//! chunks flow to the async streamer through a bounded channel.

use super::AudioFormat;
use crate::error::{AtvError, Result};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;

#[cfg(feature = "decoders")]
use symphonia::core::audio::{AudioBufferRef, Signal};
#[cfg(feature = "decoders")]
use symphonia::core::codecs::CODEC_TYPE_NULL;
#[cfg(feature = "decoders")]
use symphonia::core::conv::IntoSample;
#[cfg(feature = "decoders")]
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions, ReadOnlySource};
#[cfg(feature = "decoders")]
use symphonia::core::meta::StandardTagKey;

/// Media metadata extracted from a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    /// Track title
    pub title: Option<String>,
    /// Artist
    pub artist: Option<String>,
    /// Album
    pub album: Option<String>,
    /// Duration in seconds, when known
    pub duration: Option<f64>,
    /// Cover art bytes and MIME type
    pub artwork: Option<(Vec<u8>, String)>,
}

/// A decoded PCM stream.
pub struct AudioStream {
    /// Source sample format
    pub format: AudioFormat,
    /// Metadata extracted before decoding started
    pub metadata: MediaMetadata,
    /// Interleaved PCM16 chunks; closes at end of stream
    pub chunks: mpsc::Receiver<Vec<i16>>,
}

/// Open a file for streaming. Seekable input, so all symphonia formats
/// (MP3, WAV, FLAC, OGG, ALAC) are accepted.
///
/// # Errors
///
/// Fails when the file cannot be opened or probed.
#[cfg(feature = "decoders")]
pub async fn open_file(path: &Path) -> Result<AudioStream> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());
    let mut hint = symphonia::core::probe::Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }
    decode_stream(mss, hint, false).await
}

/// Open a non-seekable reader for streaming.
///
/// Only MP3 is supported here: other containers need random access for
/// header parsing.
///
/// # Errors
///
/// Fails for non-MP3 content.
#[cfg(feature = "decoders")]
pub async fn open_reader(
    reader: Box<dyn std::io::Read + Send + Sync>,
) -> Result<AudioStream> {
    let source = ReadOnlySource::new(reader);
    let mss = MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());
    let mut hint = symphonia::core::probe::Hint::new();
    hint.with_extension("mp3");
    decode_stream(mss, hint, true).await
}

#[cfg(feature = "decoders")]
async fn decode_stream(
    mss: MediaSourceStream,
    hint: symphonia::core::probe::Hint,
    mp3_only: bool,
) -> Result<AudioStream> {
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::meta::MetadataOptions;

    // Probe on the worker pool: header parsing reads and may block
    let mut probed = tokio::task::spawn_blocking(move || {
        symphonia::default::get_probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
    })
    .await
    .map_err(|e| AtvError::Protocol(e.to_string()))?
    .map_err(|e| AtvError::Protocol(format!("unsupported media: {e}")))?;

    let mut metadata = MediaMetadata::default();
    if let Some(revision) = probed.format.metadata().current() {
        for tag in revision.tags() {
            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => {
                    metadata.title = Some(tag.value.to_string());
                }
                Some(StandardTagKey::Artist) => metadata.artist = Some(tag.value.to_string()),
                Some(StandardTagKey::Album) => metadata.album = Some(tag.value.to_string()),
                _ => {}
            }
        }
        if let Some(visual) = revision.visuals().first() {
            metadata.artwork = Some((
                visual.data.to_vec(),
                visual.media_type.clone(),
            ));
        }
    }

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AtvError::Protocol("no audio track".to_string()))?
        .clone();

    if mp3_only && track.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_MP3 {
        return Err(AtvError::NotSupported);
    }

    let format = AudioFormat {
        sample_rate: track.codec_params.sample_rate.unwrap_or(44_100),
        channels: u16::try_from(
            track
                .codec_params
                .channels
                .map_or(2, symphonia::core::audio::Channels::count),
        )
        .unwrap_or(2),
    };
    metadata.duration = track
        .codec_params
        .n_frames
        .map(|frames| frames as f64 / f64::from(format.sample_rate));

    let decoder = symphonia::default::get_codecs()
        .make(
            &track.codec_params,
            &symphonia::core::codecs::DecoderOptions::default(),
        )
        .map_err(|e| AtvError::Protocol(format!("decoder setup failed: {e}")))?;

    let (tx, rx) = mpsc::channel(16);
    let track_id = track.id;
    let mut reader = probed.format;
    let mut decoder = decoder;

    // Decode loop on the worker pool; backpressure through the channel
    tokio::task::spawn_blocking(move || {
        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(err) => {
                    debug!("decode stopped: {err}");
                    break;
                }
            };
            if packet.track_id() != track_id {
                continue;
            }
            match decoder.decode(&packet) {
                Ok(buffer) => {
                    let samples = interleave_i16(&buffer);
                    if !samples.is_empty() && tx.blocking_send(samples).is_err() {
                        break;
                    }
                }
                Err(symphonia::core::errors::Error::DecodeError(err)) => {
                    debug!("skipping undecodable packet: {err}");
                }
                Err(err) => {
                    debug!("decode stopped: {err}");
                    break;
                }
            }
        }
    });

    Ok(AudioStream {
        format,
        metadata,
        chunks: rx,
    })
}

/// Convert any symphonia buffer into interleaved i16.
#[cfg(feature = "decoders")]
fn interleave_i16(buffer: &AudioBufferRef<'_>) -> Vec<i16> {
    macro_rules! interleave {
        ($buf:expr) => {{
            let channels = $buf.spec().channels.count();
            let frames = $buf.frames();
            let mut out = Vec::with_capacity(frames * channels);
            for frame in 0..frames {
                for channel in 0..channels {
                    out.push($buf.chan(channel)[frame].into_sample());
                }
            }
            out
        }};
    }

    match buffer {
        AudioBufferRef::U8(b) => interleave!(b),
        AudioBufferRef::U16(b) => interleave!(b),
        AudioBufferRef::U24(b) => interleave!(b),
        AudioBufferRef::U32(b) => interleave!(b),
        AudioBufferRef::S8(b) => interleave!(b),
        AudioBufferRef::S16(b) => interleave!(b),
        AudioBufferRef::S24(b) => interleave!(b),
        AudioBufferRef::S32(b) => interleave!(b),
        AudioBufferRef::F32(b) => interleave!(b),
        AudioBufferRef::F64(b) => interleave!(b),
    }
}

/// In-memory PCM source for tests and raw-buffer streaming.
#[must_use]
pub fn from_pcm(samples: Vec<i16>, format: AudioFormat, metadata: MediaMetadata) -> AudioStream {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        for chunk in samples.chunks(8192) {
            if tx.send(chunk.to_vec()).await.is_err() {
                return;
            }
        }
    });
    AudioStream {
        format,
        metadata,
        chunks: rx,
    }
}
