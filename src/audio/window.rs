//! # Audio Windowing
//!
//! Accumulates inbound audio bytes for one session and releases them as
//! windows once `window_threshold_bytes` have been collected.
//!
//! ## Window Policies:
//! - **Drain** (default): the whole buffer becomes the window. A single large
//!   append can therefore produce a window longer than the threshold; windows
//!   are variable-length in practice and the transcriber handles any length.
//! - **CarryOver**: each window is exactly the threshold; surplus bytes stay
//!   buffered and are released by the next `take_ready()` call.
//!
//! ## Backlog Bound:
//! While a turn is being processed the session keeps buffering audio. The
//! buffer never grows beyond `max_buffered_bytes`; bytes that don't fit are
//! dropped and counted so the session can tell the client.
//!
//! The windower never blocks and has no side effects beyond its own buffer.

use crate::config::{PipelineConfig, WindowPolicy};

/// A contiguous span of session audio handed to the transcriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioWindow {
    /// 1-based position of this window within the session
    pub sequence: u64,
    pub bytes: Vec<u8>,
}

impl AudioWindow {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Duration of the window assuming 16 kHz mono 16-bit PCM.
    pub fn duration_ms(&self) -> u64 {
        (self.bytes.len() as u64 * 1000) / super::BYTES_PER_SECOND as u64
    }
}

/// Per-session audio buffer with threshold-based window extraction.
#[derive(Debug)]
pub struct AudioWindower {
    buffer: Vec<u8>,
    threshold: usize,
    max_buffered_bytes: usize,
    policy: WindowPolicy,
    windows_emitted: u64,
    dropped_bytes: usize,
}

impl AudioWindower {
    pub fn new(threshold: usize, max_buffered_bytes: usize, policy: WindowPolicy) -> Self {
        let threshold = threshold.max(1);
        Self {
            buffer: Vec::with_capacity(threshold),
            threshold,
            max_buffered_bytes: max_buffered_bytes.max(threshold),
            policy,
            windows_emitted: 0,
            dropped_bytes: 0,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.window_threshold_bytes,
            config.max_buffered_audio_bytes,
            config.window_policy,
        )
    }

    /// Append bytes and, if the threshold is now reached, take one window.
    ///
    /// Exactly one window is returned per threshold crossing. Under `Drain`
    /// the buffer is empty afterwards; under `CarryOver` it keeps the bytes
    /// beyond the first `threshold`.
    pub fn append(&mut self, bytes: &[u8]) -> Option<AudioWindow> {
        self.push(bytes);
        self.take_ready()
    }

    /// Append bytes without releasing a window (used while a turn is in flight).
    ///
    /// Returns how many of the offered bytes were dropped because the backlog
    /// bound was reached.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let room = self.max_buffered_bytes.saturating_sub(self.buffer.len());
        let accepted = bytes.len().min(room);
        self.buffer.extend_from_slice(&bytes[..accepted]);

        let dropped = bytes.len() - accepted;
        self.dropped_bytes += dropped;
        dropped
    }

    /// Release a window if the buffer has reached the threshold.
    pub fn take_ready(&mut self) -> Option<AudioWindow> {
        if self.buffer.len() < self.threshold {
            return None;
        }

        let bytes = match self.policy {
            WindowPolicy::Drain => std::mem::take(&mut self.buffer),
            WindowPolicy::CarryOver => self.buffer.drain(..self.threshold).collect(),
        };
        Some(self.emit(bytes))
    }

    /// Release everything buffered, even below the threshold.
    pub fn flush(&mut self) -> Option<AudioWindow> {
        if self.buffer.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.buffer);
        Some(self.emit(bytes))
    }

    fn emit(&mut self, bytes: Vec<u8>) -> AudioWindow {
        self.windows_emitted += 1;
        AudioWindow {
            sequence: self.windows_emitted,
            bytes,
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes dropped over the session lifetime.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn drain(threshold: usize) -> AudioWindower {
        AudioWindower::new(threshold, threshold * 10, WindowPolicy::Drain)
    }

    #[test]
    fn test_exact_threshold_emits_and_clears() {
        let mut windower = drain(32_000);
        assert!(windower.append(&vec![0u8; 16_000]).is_none());
        let window = windower.append(&vec![0u8; 16_000]).expect("window at threshold");
        assert_eq!(window.len(), 32_000);
        assert_eq!(window.sequence, 1);
        assert_eq!(window.duration_ms(), 1000);
        assert_eq!(windower.buffered_len(), 0);
    }

    #[test]
    fn test_drain_takes_oversized_burst() {
        let mut windower = drain(100);
        windower.push(&[1u8; 60]);
        let window = windower.append(&[2u8; 70]).unwrap();
        assert_eq!(window.len(), 130);
        assert_eq!(windower.buffered_len(), 0);
    }

    #[test]
    fn test_carry_over_keeps_surplus() {
        let mut windower = AudioWindower::new(100, 1_000, WindowPolicy::CarryOver);
        let window = windower.append(&[7u8; 250]).unwrap();
        assert_eq!(window.len(), 100);
        assert_eq!(windower.buffered_len(), 150);

        let next = windower.take_ready().unwrap();
        assert_eq!(next.sequence, 2);
        assert_eq!(windower.buffered_len(), 50);
        assert!(windower.take_ready().is_none());
    }

    #[test]
    fn test_push_never_releases_and_respects_bound() {
        let mut windower = AudioWindower::new(10, 25, WindowPolicy::Drain);
        assert_eq!(windower.push(&[0u8; 20]), 0);
        assert_eq!(windower.push(&[0u8; 20]), 15);
        assert_eq!(windower.buffered_len(), 25);
        assert_eq!(windower.dropped_bytes(), 15);
        assert_eq!(windower.take_ready().map(|window| window.sequence), Some(1));
    }

    #[test]
    fn test_flush_below_threshold() {
        let mut windower = drain(100);
        assert!(windower.flush().is_none());
        windower.push(&[3u8; 10]);
        let window = windower.flush().unwrap();
        assert_eq!(window.bytes, vec![3u8; 10]);
        assert_eq!(windower.buffered_len(), 0);
    }

    proptest! {
        /// One window per crossing; with carry-over the buffer keeps exactly the
        /// bytes beyond the consumed window.
        #[test]
        fn prop_one_window_per_crossing(chunks in prop::collection::vec(1usize..400, 1..40)) {
            let threshold = 500;
            let mut windower = AudioWindower::new(threshold, usize::MAX, WindowPolicy::CarryOver);
            let mut total = 0usize;
            let mut emitted = 0usize;

            for size in chunks {
                total += size;
                if let Some(window) = windower.append(&vec![0u8; size]) {
                    prop_assert_eq!(window.len(), threshold);
                    emitted += 1;
                }
                // Chunks are shorter than the threshold, so the buffer can never
                // hold a second complete window
                prop_assert!(windower.buffered_len() < threshold);
                prop_assert_eq!(windower.buffered_len(), total - emitted * threshold);
            }
            prop_assert_eq!(emitted, total / threshold);
        }

        #[test]
        fn prop_drain_leaves_buffer_below_threshold(chunks in prop::collection::vec(1usize..2_000, 1..40)) {
            let mut windower = AudioWindower::new(500, usize::MAX, WindowPolicy::Drain);
            let mut total_out = 0usize;
            let mut total_in = 0usize;
            for size in chunks {
                total_in += size;
                if let Some(window) = windower.append(&vec![0u8; size]) {
                    prop_assert!(window.len() >= 500);
                    total_out += window.len();
                }
                prop_assert!(windower.buffered_len() < 500);
            }
            prop_assert_eq!(total_out + windower.buffered_len(), total_in);
        }
    }
}
