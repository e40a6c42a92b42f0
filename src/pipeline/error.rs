//! Error taxonomy for the streaming pipeline.
//!
//! Transcription, generation and synthesis failures are recoverable: the
//! session reports them to the client and keeps listening. Transport failures
//! end the session (and only that session).

use thiserror::Error;

/// Speech-to-text failures. The window is dropped; buffering continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscriptionError {
    #[error("transcription engine unavailable: {0}")]
    Unavailable(String),

    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("unexpected transcription response: {0}")]
    BadResponse(String),
}

/// Text generation failures. Text already streamed is kept as the reply.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("language model unavailable: {0}")]
    Unavailable(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("prompt rejected: {0}")]
    InvalidPrompt(String),

    #[error("reply stream interrupted: {0}")]
    Stream(String),
}

/// Speech synthesis failures. Only the audio of one unit is lost.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SynthesisError {
    #[error("speech engine unavailable: {0}")]
    Unavailable(String),

    #[error("speech request rejected: {0}")]
    Rejected(String),

    #[error("audio stream interrupted: {0}")]
    Stream(String),
}

/// Failures of the client connection itself. Fatal for the session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("client disconnected")]
    Disconnected,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Pipeline stage names used in logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Transcribe,
    Generate,
    Synthesize,
    Transport,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Transcribe => "transcribe",
            Stage::Generate => "generate",
            Stage::Synthesize => "synthesize",
            Stage::Transport => "transport",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any pipeline failure, tagged with the stage it came from.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Transcription(_) => Stage::Transcribe,
            PipelineError::Generation(_) => Stage::Generate,
            PipelineError::Synthesis(_) => Stage::Synthesize,
            PipelineError::Transport(_) => Stage::Transport,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PipelineError::Transport(_))
    }

    /// Text for the client's `error` frame.
    pub fn client_message(&self) -> String {
        match self {
            PipelineError::Transcription(err) => format!("transcription failed: {}", err),
            PipelineError::Generation(err) => format!("generation failed: {}", err),
            PipelineError::Synthesis(err) => format!("speech synthesis failed: {}", err),
            PipelineError::Transport(err) => format!("connection error: {}", err),
        }
    }
}
