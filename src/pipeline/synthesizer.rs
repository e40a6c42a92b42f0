//! # Speech Synthesizer
//!
//! Two pieces live here:
//! - [`SynthesisPlanner`] decides *when* accumulated reply text is worth voicing.
//!   Short units sound choppy, long ones add latency; the planner waits for
//!   `synthesis_trigger_word_count` words, or a sentence end with at least
//!   `synthesis_min_sentence_words` words, and never cuts a word in half.
//! - [`SpeechSynthesizer`] adapts a text-to-speech engine into a finite stream
//!   of numbered [`SynthesisChunk`]s.

use crate::pipeline::error::SynthesisError;
use futures_util::future::ready;
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;

/// Raw audio bytes from an engine, in playback order.
pub type AudioStream = BoxStream<'static, Result<Vec<u8>, SynthesisError>>;

pub type SynthesisStream = BoxStream<'static, Result<SynthesisChunk, SynthesisError>>;

/// A text-to-speech engine.
///
/// The audio format is the engine's choice and must be documented by the
/// implementation. The stream is lazy and finite.
pub trait TextToSpeech: Send + Sync {
    fn stream_speech(&self, text: String, voice: String) -> AudioStream;
}

/// One piece of synthesized audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisChunk {
    pub sequence: u64,
    pub audio: Vec<u8>,
}

#[derive(Clone)]
pub struct SpeechSynthesizer {
    engine: Arc<dyn TextToSpeech>,
}

impl SpeechSynthesizer {
    pub fn new(engine: Arc<dyn TextToSpeech>) -> Self {
        Self { engine }
    }

    pub fn synthesize(&self, text: &str, voice: &str) -> SynthesisStream {
        let mut sequence = 0u64;

        self.engine
            .stream_speech(text.to_string(), voice.to_string())
            .filter(|item| ready(!matches!(item, Ok(audio) if audio.is_empty())))
            .map(move |item| {
                item.map(|audio| {
                    sequence += 1;
                    SynthesisChunk { sequence, audio }
                })
            })
            .scan(false, |failed, item| {
                if *failed {
                    return ready(None);
                }
                *failed = item.is_err();
                ready(Some(item))
            })
            .boxed()
    }
}

/// Groups streamed reply text into units for synthesis.
#[derive(Debug)]
pub struct SynthesisPlanner {
    pending: String,
    trigger_words: usize,
    min_sentence_words: usize,
}

impl SynthesisPlanner {
    pub fn new(trigger_words: usize, min_sentence_words: usize) -> Self {
        Self {
            pending: String::new(),
            trigger_words: trigger_words.max(1),
            min_sentence_words: min_sentence_words.max(1),
        }
    }

    /// Add a reply chunk; returns a unit to voice once one is ready.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.pending.push_str(delta);

        let cut = self.complete_prefix_len();
        let candidate = &self.pending[..cut];
        let words = candidate.split_whitespace().count();
        let sentence_end = ends_sentence(candidate);

        let ready = words >= self.trigger_words || (sentence_end && words >= self.min_sentence_words);
        if !ready {
            return None;
        }

        let unit = candidate.trim().to_string();
        self.pending = self.pending[cut..].trim_start().to_string();
        Some(unit)
    }

    /// Whatever is left once the reply is complete.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Length of the prefix made only of complete words.
    fn complete_prefix_len(&self) -> usize {
        let text = self.pending.as_str();
        match text.chars().last() {
            None => 0,
            Some(last) if last.is_whitespace() || is_terminator(last) => text.len(),
            Some(_) => text
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(idx, c)| idx + c.len_utf8())
                .unwrap_or(0),
        }
    }
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end().chars().last().map_or(false, is_terminator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn test_short_reply_waits_for_finish() {
        let mut planner = SynthesisPlanner::new(10, 4);
        assert_eq!(planner.push("Hi"), None);
        assert_eq!(planner.push(" there"), None);
        assert_eq!(planner.finish(), Some("Hi there".to_string()));
        assert_eq!(planner.finish(), None);
    }

    #[test]
    fn test_word_count_trigger_keeps_partial_word() {
        let mut planner = SynthesisPlanner::new(3, 10);
        assert_eq!(planner.push("one two thr"), None);
        // "three" is still incomplete until whitespace arrives
        assert_eq!(planner.push("ee fo"), Some("one two three".to_string()));
        assert_eq!(planner.push("ur"), None);
        assert_eq!(planner.finish(), Some("four".to_string()));
    }

    #[test]
    fn test_sentence_end_releases_early() {
        let mut planner = SynthesisPlanner::new(10, 4);
        assert_eq!(planner.push("Tell me about"), None);
        assert_eq!(
            planner.push(" your last project. What"),
            Some("Tell me about your last project.".to_string())
        );
        assert_eq!(planner.finish(), Some("What".to_string()));
    }

    #[test]
    fn test_short_sentence_is_not_released() {
        let mut planner = SynthesisPlanner::new(10, 4);
        assert_eq!(planner.push("Great."), None);
        assert_eq!(planner.push(" Thanks!"), None);
        assert_eq!(planner.finish(), Some("Great. Thanks!".to_string()));
    }

    struct ScriptedSpeech(Vec<Result<Vec<u8>, SynthesisError>>);

    impl TextToSpeech for ScriptedSpeech {
        fn stream_speech(&self, _text: String, _voice: String) -> AudioStream {
            stream::iter(self.0.clone()).boxed()
        }
    }

    #[tokio::test]
    async fn test_synthesizer_numbers_chunks_and_stops_on_error() {
        let synthesizer = SpeechSynthesizer::new(Arc::new(ScriptedSpeech(vec![
            Ok(vec![1, 2]),
            Ok(Vec::new()),
            Ok(vec![3]),
            Err(SynthesisError::Stream("eof".into())),
            Ok(vec![4]),
        ])));

        let chunks: Vec<_> = synthesizer.synthesize("Hi there", "alloy").collect().await;

        assert_eq!(
            chunks,
            vec![
                Ok(SynthesisChunk { sequence: 1, audio: vec![1, 2] }),
                Ok(SynthesisChunk { sequence: 2, audio: vec![3] }),
                Err(SynthesisError::Stream("eof".into())),
            ]
        );
    }
}
