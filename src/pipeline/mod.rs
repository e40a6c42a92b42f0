pub mod error;
pub mod generator;
pub mod synthesizer;
pub mod transcriber;

pub use generator::{LanguageModel, ResponseGenerator};
pub use synthesizer::{SpeechSynthesizer, SynthesisPlanner, TextToSpeech};
pub use transcriber::{SpeechToText, Transcriber};

use std::sync::Arc;

/// The three capability adapters every session uses.
///
/// Built once at startup and cloned into each session; the engines behind
/// them are shared, the sessions never are.
#[derive(Clone)]
pub struct PipelineServices {
    pub transcriber: Transcriber,
    pub generator: ResponseGenerator,
    pub synthesizer: SpeechSynthesizer,
}

impl PipelineServices {
    pub fn new(
        speech_to_text: Arc<dyn SpeechToText>,
        model: Arc<dyn LanguageModel>,
        text_to_speech: Arc<dyn TextToSpeech>,
    ) -> Self {
        Self {
            transcriber: Transcriber::new(speech_to_text),
            generator: ResponseGenerator::new(model),
            synthesizer: SpeechSynthesizer::new(text_to_speech),
        }
    }
}
