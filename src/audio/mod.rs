//! # Audio Handling
//!
//! Inbound audio arrives as raw PCM in binary websocket frames and is cut into
//! windows for transcription.
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit signed PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian, no container
//!
//! At this format one second of audio is 32,000 bytes, the default window size.

pub mod pcm;     // PCM decoding, level measurement, WAV packaging
pub mod window;  // Threshold-based windowing of the session buffer

pub use window::{AudioWindow, AudioWindower};

/// Samples per second of the inbound stream.
pub const SAMPLE_RATE: u32 = 16_000;

/// Bytes per second of the inbound stream (16-bit mono).
pub const BYTES_PER_SECOND: usize = SAMPLE_RATE as usize * 2;
