//! Audio payload helpers.
//!
//! Speech payloads arrive as base64 of raw 16-bit little-endian PCM,
//! mono at 24 kHz. Decoding is only needed for playback and export;
//! the cache keeps the encoded form.

use std::path::Path;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Sample rate of synthesized speech.
pub const SAMPLE_RATE: u32 = 24_000;

/// Decode a base64 payload into i16 samples.
pub fn decode_pcm(audio_base64: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD
        .decode(audio_base64.trim())
        .context("audio payload is not valid base64")?;
    if bytes.len() % 2 != 0 {
        bail!("audio payload has odd length {}", bytes.len());
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Playback length of a sample buffer.
pub fn duration_secs(samples: usize) -> f32 {
    samples as f32 / SAMPLE_RATE as f32
}

/// Write samples as a 16-bit mono WAV file.
pub fn write_wav(path: &Path, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize().context("failed to finalize WAV file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(samples: &[i16]) -> String {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        STANDARD.encode(bytes)
    }

    #[test]
    fn decode_little_endian_samples() {
        let samples = decode_pcm(&encode(&[0, 1, -1, i16::MAX, i16::MIN])).unwrap();
        assert_eq!(samples, vec![0, 1, -1, i16::MAX, i16::MIN]);
    }

    #[test]
    fn odd_length_rejected() {
        assert!(decode_pcm(&STANDARD.encode([1u8, 2, 3])).is_err());
    }

    #[test]
    fn invalid_base64_rejected() {
        assert!(decode_pcm("not base64!!").is_err());
    }

    #[test]
    fn duration_at_24k() {
        assert!((duration_secs(24_000) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn wav_roundtrip_through_hound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        write_wav(&path, &[0, 100, -100]).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 100, -100]);
    }
}
