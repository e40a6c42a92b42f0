//! # PCM Utilities
//!
//! Helpers for the raw 16-bit little-endian PCM carried in binary frames:
//! - **Decoding**: bytes → `i16` samples
//! - **Level measurement**: RMS/peak, used to skip uploading silent windows
//! - **WAV packaging**: transcription providers expect a container, not raw PCM

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Decode little-endian 16-bit samples.
///
/// A trailing odd byte (half a sample) is ignored; clients may split frames at
/// any byte offset and the windower joins them back together.
pub fn decode_samples(data: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    samples
}

/// Loudness summary of a block of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalLevel {
    /// Root mean square, normalised to 0.0..=1.0
    pub rms: f32,
    /// Largest absolute sample, normalised to 0.0..=1.0
    pub peak: f32,
}

impl SignalLevel {
    pub fn measure(samples: &[i16]) -> Self {
        if samples.is_empty() {
            return Self { rms: 0.0, peak: 0.0 };
        }

        let sum_squares: f64 = samples
            .iter()
            .map(|&s| {
                let v = s as f64 / 32768.0;
                v * v
            })
            .sum();
        let rms = (sum_squares / samples.len() as f64).sqrt() as f32;
        let peak = samples
            .iter()
            .map(|&s| (s as i32).abs())
            .max()
            .unwrap_or(0) as f32
            / 32768.0;

        Self { rms, peak }
    }

    /// Digital near-silence (peak below 1% of full scale).
    pub fn is_quiet(&self) -> bool {
        self.peak < 0.01
    }
}

/// Wrap raw PCM in a WAV container (16 kHz, mono, 16-bit).
pub fn encode_wav(pcm: &[u8], sample_rate: u32) -> std::io::Result<Vec<u8>> {
    let samples = decode_samples(pcm);
    let header = wav::Header::new(wav::header::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    wav::write(header, &wav::BitDepth::Sixteen(samples), &mut cursor)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_pcm(samples: usize, amplitude: f32) -> Vec<u8> {
        let mut data = Vec::with_capacity(samples * 2);
        for i in 0..samples {
            let sample = ((i as f32 * 0.3).sin() * amplitude) as i16;
            data.extend_from_slice(&sample.to_le_bytes());
        }
        data
    }

    #[test]
    fn test_decode_ignores_trailing_byte() {
        let data = [0x01, 0x00, 0xff, 0x7f, 0x42];
        assert_eq!(decode_samples(&data), vec![1, i16::MAX]);
    }

    #[test]
    fn test_signal_level() {
        let silent = decode_samples(&vec![0u8; 3200]);
        assert!(SignalLevel::measure(&silent).is_quiet());

        let loud = decode_samples(&sine_pcm(1600, 10_000.0));
        let level = SignalLevel::measure(&loud);
        assert!(!level.is_quiet());
        assert!(level.peak > 0.25 && level.peak <= 0.31);
        assert!(level.rms > 0.0 && level.rms < level.peak);

        assert_eq!(SignalLevel::measure(&[]).rms, 0.0);
    }

    #[test]
    fn test_wav_container() {
        let pcm = sine_pcm(800, 5_000.0);
        let wav = encode_wav(&pcm, 16_000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // The PCM payload follows the header verbatim
        assert_eq!(&wav[wav.len() - pcm.len()..], &pcm[..]);
    }
}
