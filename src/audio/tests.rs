use super::convert::{Converter, convert_all};
use super::{AudioFormat, MediaMetadata, from_pcm};

const STEREO_44K: AudioFormat = AudioFormat::DEFAULT;
const MONO_44K: AudioFormat = AudioFormat {
    sample_rate: 44_100,
    channels: 1,
};
const STEREO_48K: AudioFormat = AudioFormat {
    sample_rate: 48_000,
    channels: 2,
};

#[test]
fn same_format_passes_through() {
    let samples = vec![1i16, -1, 2, -2, 3, -3];
    let out = convert_all(&samples, STEREO_44K, STEREO_44K).unwrap();
    assert_eq!(out, samples);
}

#[test]
fn mono_upmixes_to_stereo() {
    let out = convert_all(&[10, 20, 30], MONO_44K, STEREO_44K).unwrap();
    assert_eq!(out, vec![10, 10, 20, 20, 30, 30]);
}

#[test]
fn stereo_downmixes_to_mono_by_average() {
    let out = convert_all(&[10, 20, -10, -20], STEREO_44K, MONO_44K).unwrap();
    assert_eq!(out, vec![15, -15]);
}

#[test]
fn resampling_changes_sample_count_proportionally() {
    // One second of stereo silence with a marker tone shape
    let samples: Vec<i16> = (0..48_000 * 2).map(|i| ((i % 7) * 100) as i16).collect();
    let out = convert_all(&samples, STEREO_48K, STEREO_44K).unwrap();

    let expected_frames = 44_100f64;
    let actual_frames = (out.len() / 2) as f64;
    let error = (actual_frames - expected_frames).abs() / expected_frames;
    assert!(
        error < 0.05,
        "expected about {expected_frames} frames, got {actual_frames}"
    );
    assert_eq!(out.len() % 2, 0);
}

#[test]
fn incremental_push_matches_chunked_input() {
    let samples: Vec<i16> = (0..10_000).map(|i| (i % 128) as i16).collect();
    let mut converter = Converter::new(STEREO_44K, STEREO_44K).unwrap();
    let mut out = Vec::new();
    for chunk in samples.chunks(333) {
        out.extend(converter.push(chunk).unwrap());
    }
    out.extend(converter.finish().unwrap());
    assert_eq!(out, samples);
}

#[tokio::test]
async fn pcm_source_delivers_all_samples() {
    let samples: Vec<i16> = (0..20_000).map(|i| (i % 100) as i16).collect();
    let mut stream = from_pcm(samples.clone(), STEREO_44K, MediaMetadata::default());

    let mut collected = Vec::new();
    while let Some(chunk) = stream.chunks.recv().await {
        collected.extend(chunk);
    }
    assert_eq!(collected, samples);
    assert_eq!(stream.format, STEREO_44K);
}
