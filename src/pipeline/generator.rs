//! # Response Generator
//!
//! Adapter over a streaming language model. The model yields text deltas; the
//! generator numbers them, skips empty deltas and ends the sequence after the
//! first error, so consumers get a finite, non-restartable stream of
//! [`ResponseChunk`]s in production order.

use crate::conversation::Turn;
use crate::pipeline::error::GenerationError;
use futures_util::future::ready;
use futures_util::stream::{BoxStream, StreamExt};
use std::sync::Arc;

/// Raw text deltas from a model, in the order produced.
pub type TokenStream = BoxStream<'static, Result<String, GenerationError>>;

/// Numbered reply chunks handed to the session.
pub type ResponseStream = BoxStream<'static, Result<ResponseChunk, GenerationError>>;

/// A streaming text-generation engine.
///
/// The returned stream is lazy: no request is made until it is first polled.
pub trait LanguageModel: Send + Sync {
    fn stream_reply(&self, history: Vec<Turn>) -> TokenStream;
}

/// One incremental piece of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    /// Starts at 1 for every generation
    pub sequence: u64,
    pub text: String,
}

#[derive(Clone)]
pub struct ResponseGenerator {
    model: Arc<dyn LanguageModel>,
}

impl ResponseGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Start a reply for `history` (oldest turn first).
    pub fn generate(&self, history: Vec<Turn>) -> ResponseStream {
        let mut sequence = 0u64;

        self.model
            .stream_reply(history)
            .filter(|item| ready(!matches!(item, Ok(text) if text.is_empty())))
            .map(move |item| {
                item.map(|text| {
                    sequence += 1;
                    ResponseChunk { sequence, text }
                })
            })
            // Nothing is delivered after an error
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use futures_util::stream;
    use std::sync::Mutex;

    struct ScriptedModel {
        script: Vec<Result<String, GenerationError>>,
        seen_history: Mutex<Vec<Turn>>,
    }

    impl LanguageModel for ScriptedModel {
        fn stream_reply(&self, history: Vec<Turn>) -> TokenStream {
            *self.seen_history.lock().unwrap() = history;
            stream::iter(self.script.clone()).boxed()
        }
    }

    fn generator(script: Vec<Result<String, GenerationError>>) -> (ResponseGenerator, Arc<ScriptedModel>) {
        let model = Arc::new(ScriptedModel {
            script,
            seen_history: Mutex::new(Vec::new()),
        });
        (ResponseGenerator::new(model.clone()), model)
    }

    #[tokio::test]
    async fn test_chunks_are_numbered_in_order() {
        let (generator, model) = generator(vec![
            Ok("Hi".into()),
            Ok(String::new()),
            Ok(" there".into()),
        ]);
        let history = vec![Turn::new(Role::User, "hello").unwrap()];

        let chunks: Vec<_> = generator.generate(history.clone()).collect().await;

        assert_eq!(
            chunks,
            vec![
                Ok(ResponseChunk { sequence: 1, text: "Hi".into() }),
                Ok(ResponseChunk { sequence: 2, text: " there".into() }),
            ]
        );
        assert_eq!(*model.seen_history.lock().unwrap(), history);
    }

    #[tokio::test]
    async fn test_stream_ends_after_first_error() {
        let (generator, _) = generator(vec![
            Ok("Par".into()),
            Err(GenerationError::Stream("reset".into())),
            Ok("never".into()),
        ]);

        let chunks: Vec<_> = generator.generate(Vec::new()).collect().await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert_eq!(chunks[1], Err(GenerationError::Stream("reset".into())));
    }
}
