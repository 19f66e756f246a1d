//! WAV decode/encode plus the channel and rate conversions used before inference
//!
//! Samples are held as interleaved `f32` in `[-1.0, 1.0]`.

use crate::{ProcessingError, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;

/// Sample rate expected by the voice-cloning reference input
pub const VOICE_REFERENCE_SAMPLE_RATE: u32 = 22_050;

/// Sample rate expected by lip-sync audio encoders
pub const LIP_SYNC_SAMPLE_RATE: u32 = 16_000;

/// Decoded PCM audio
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples
    pub samples: Vec<f32>,
}

impl AudioTrack {
    /// Number of sample frames (samples per channel)
    #[must_use]
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / usize::from(self.channels)
    }

    /// Duration in seconds
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / f64::from(self.sample_rate)
    }

    /// Average all channels into one
    #[must_use]
    pub fn to_mono(&self) -> AudioTrack {
        if self.channels <= 1 {
            return self.clone();
        }
        let channels = usize::from(self.channels);
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();
        AudioTrack {
            sample_rate: self.sample_rate,
            channels: 1,
            samples,
        }
    }

    /// Linear-interpolation resample to `target_rate`
    #[must_use]
    pub fn resample(&self, target_rate: u32) -> AudioTrack {
        if target_rate == self.sample_rate || self.sample_rate == 0 || self.channels == 0 {
            return AudioTrack {
                sample_rate: if self.sample_rate == 0 { target_rate } else { self.sample_rate },
                ..self.clone()
            };
        }

        let channels = usize::from(self.channels);
        let in_frames = self.frame_count();
        let out_frames =
            (in_frames as u64 * u64::from(target_rate) / u64::from(self.sample_rate)) as usize;
        let step = f64::from(self.sample_rate) / f64::from(target_rate);

        let mut samples = Vec::with_capacity(out_frames * channels);
        for i in 0..out_frames {
            let pos = i as f64 * step;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let next = (idx + 1).min(in_frames.saturating_sub(1));
            for ch in 0..channels {
                let a = self.samples[idx * channels + ch];
                let b = self.samples[next * channels + ch];
                samples.push(a + (b - a) * frac);
            }
        }

        AudioTrack {
            sample_rate: target_rate,
            channels: self.channels,
            samples,
        }
    }

    /// Keep only the first `seconds` of audio
    #[must_use]
    pub fn trimmed(&self, seconds: f64) -> AudioTrack {
        let frames = (seconds * f64::from(self.sample_rate)).round() as usize;
        let keep = frames.min(self.frame_count()) * usize::from(self.channels);
        AudioTrack {
            samples: self.samples[..keep].to_vec(),
            ..self.clone()
        }
    }

    /// Trim, or pad with trailing silence, to exactly `seconds`
    #[must_use]
    pub fn fitted(&self, seconds: f64) -> AudioTrack {
        let frames = (seconds * f64::from(self.sample_rate)).round() as usize;
        let len = frames * usize::from(self.channels);
        let mut samples = self.samples.clone();
        samples.resize(len, 0.0);
        AudioTrack {
            samples,
            ..self.clone()
        }
    }
}

/// Decode a RIFF/WAV byte buffer
pub fn decode_wav(bytes: &[u8]) -> Result<AudioTrack> {
    let mut reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Result<Vec<f32>> = match spec.sample_format {
        SampleFormat::Int => {
            let max_val = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val).map_err(ProcessingError::from))
                .collect()
        }
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map_err(ProcessingError::from))
            .collect(),
    };

    Ok(AudioTrack {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples: samples?,
    })
}

/// Encode as 16-bit PCM WAV
pub fn encode_wav(track: &AudioTrack) -> Result<Vec<u8>> {
    if track.channels == 0 {
        return Err(ProcessingError::AudioError(
            "cannot encode audio with zero channels".to_string(),
        ));
    }

    let spec = WavSpec {
        channels: track.channels,
        sample_rate: track.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut buf = Vec::with_capacity(44 + track.samples.len() * 2);
    {
        let mut writer = WavWriter::new(Cursor::new(&mut buf), spec)?;
        for &sample in &track.samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * f32::from(i16::MAX)) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(buf)
}

/// True when `bytes` start with a RIFF/WAVE header
#[must_use]
pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(sample_rate: u32, channels: u16, seconds: f64) -> AudioTrack {
        let frames = (seconds * f64::from(sample_rate)) as usize;
        let mut samples = Vec::with_capacity(frames * usize::from(channels));
        for i in 0..frames {
            let v = ((i as f32) * 0.05).sin() * 0.5;
            for _ in 0..channels {
                samples.push(v);
            }
        }
        AudioTrack {
            sample_rate,
            channels,
            samples,
        }
    }

    #[test]
    fn test_wav_encode_decode_keeps_shape() {
        let track = tone(16_000, 2, 0.25);
        let bytes = encode_wav(&track).unwrap();
        assert!(is_wav(&bytes));

        let decoded = decode_wav(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.frame_count(), track.frame_count());
        assert!((decoded.duration_secs() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_to_mono_averages_channels() {
        let track = AudioTrack {
            sample_rate: 8_000,
            channels: 2,
            samples: vec![0.2, 0.4, -1.0, 1.0],
        };
        let mono = track.to_mono();
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples.len(), 2);
        assert!((mono.samples[0] - 0.3).abs() < 1e-6);
        assert!(mono.samples[1].abs() < 1e-6);
    }

    #[test]
    fn test_resample_preserves_duration() {
        let track = tone(44_100, 1, 1.0);
        let out = track.resample(VOICE_REFERENCE_SAMPLE_RATE);
        assert_eq!(out.sample_rate, VOICE_REFERENCE_SAMPLE_RATE);
        assert!((out.duration_secs() - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_trimmed_cuts_to_length() {
        let track = tone(1_000, 1, 2.0);
        let cut = track.trimmed(0.5);
        assert_eq!(cut.frame_count(), 500);
        // Trimming past the end is a no-op
        assert_eq!(track.trimmed(10.0).frame_count(), 2_000);
    }

    #[test]
    fn test_fitted_pads_with_silence() {
        let track = tone(1_000, 2, 0.5);
        let padded = track.fitted(1.0);
        assert_eq!(padded.frame_count(), 1_000);
        assert_eq!(padded.samples.last(), Some(&0.0));
        assert_eq!(track.fitted(0.25).frame_count(), 250);
    }

    #[test]
    fn test_decode_rejects_non_wav() {
        assert!(!is_wav(b"ID3\x03not a wav file"));
        assert!(decode_wav(b"ID3\x03not a wav file").is_err());
    }
}
