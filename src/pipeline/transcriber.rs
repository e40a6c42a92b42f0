//! # Transcriber
//!
//! Adapter between audio windows and a speech-to-text capability. The engine
//! returns raw text pieces; the adapter trims them and drops blanks so callers
//! only ever see usable segments. An empty result means silence.

use crate::audio::AudioWindow;
use crate::pipeline::error::TranscriptionError;
use async_trait::async_trait;
use std::sync::Arc;

/// A speech-to-text engine.
///
/// Implementations receive raw 16 kHz mono 16-bit PCM and may return any
/// number of text pieces, including none.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, window: &AudioWindow) -> Result<Vec<String>, TranscriptionError>;
}

/// Non-empty, trimmed text recognised in one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSegment {
    /// Sequence number of the window the text came from
    pub window: u64,
    pub text: String,
}

/// Normalising wrapper around a [`SpeechToText`] engine.
#[derive(Clone)]
pub struct Transcriber {
    engine: Arc<dyn SpeechToText>,
}

impl Transcriber {
    pub fn new(engine: Arc<dyn SpeechToText>) -> Self {
        Self { engine }
    }

    pub async fn transcribe(
        &self,
        window: &AudioWindow,
    ) -> Result<Vec<TranscriptSegment>, TranscriptionError> {
        let pieces = self.engine.transcribe(window).await?;

        Ok(pieces
            .into_iter()
            .filter_map(|piece| {
                let text = piece.trim();
                (!text.is_empty()).then(|| TranscriptSegment {
                    window: window.sequence,
                    text: text.to_string(),
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> AudioWindow {
        AudioWindow {
            sequence: 3,
            bytes: vec![0u8; 320],
        }
    }

    #[tokio::test]
    async fn test_segments_are_trimmed_and_blanks_dropped() {
        let mut engine = MockSpeechToText::new();
        engine
            .expect_transcribe()
            .times(1)
            .returning(|_| Ok(vec!["  hello ".to_string(), "   ".to_string(), "\tworld\n".to_string()]));

        let transcriber = Transcriber::new(Arc::new(engine));
        let segments = transcriber.transcribe(&window()).await.unwrap();

        assert_eq!(
            segments,
            vec![
                TranscriptSegment { window: 3, text: "hello".into() },
                TranscriptSegment { window: 3, text: "world".into() },
            ]
        );
    }

    #[tokio::test]
    async fn test_silence_yields_no_segments() {
        let mut engine = MockSpeechToText::new();
        engine.expect_transcribe().returning(|_| Ok(vec![String::new()]));

        let transcriber = Transcriber::new(Arc::new(engine));
        assert!(transcriber.transcribe(&window()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_engine_failure_is_passed_through() {
        let mut engine = MockSpeechToText::new();
        engine
            .expect_transcribe()
            .returning(|_| Err(TranscriptionError::Unavailable("connection refused".into())));

        let transcriber = Transcriber::new(Arc::new(engine));
        let err = transcriber.transcribe(&window()).await.unwrap_err();
        assert_eq!(err, TranscriptionError::Unavailable("connection refused".into()));
    }
}
