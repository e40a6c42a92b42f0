//! One pass of a window through transcribe → generate → synthesize.
//!
//! The runner owns everything it needs, so the controller can keep it as a
//! `'static` future next to the inbound stream and simply drop it when the
//! client disconnects.

use crate::audio::AudioWindow;
use crate::conversation::{Role, Turn};
use crate::pipeline::error::{PipelineError, TransportError};
use crate::pipeline::{PipelineServices, SynthesisPlanner};
use crate::session::protocol::{FrameSink, ServerMessage};
use futures_util::StreamExt;
use tracing::{debug, warn};

/// Outcome of one turn, applied to the session by the controller.
#[derive(Debug, Default)]
pub struct TurnReport {
    pub window: u64,
    /// Transcript segments joined with a space; `None` when nothing was heard
    pub user_text: Option<String>,
    /// Concatenation of every reply chunk delivered, partial if generation failed
    pub reply: String,
    pub audio_chunks: usize,
    pub errors: Vec<PipelineError>,
    pub transport: Option<TransportError>,
}

pub struct TurnRunner {
    pub session_id: String,
    pub services: PipelineServices,
    pub sink: FrameSink,
    pub voice: String,
    pub trigger_words: usize,
    pub min_sentence_words: usize,
}

impl TurnRunner {
    pub async fn run(self, window: AudioWindow, history: Vec<Turn>) -> TurnReport {
        let mut report = TurnReport {
            window: window.sequence,
            ..TurnReport::default()
        };

        if let Err(err) = self.drive(&window, history, &mut report).await {
            report.transport = Some(err);
        }
        report
    }

    async fn drive(
        &self,
        window: &AudioWindow,
        mut history: Vec<Turn>,
        report: &mut TurnReport,
    ) -> Result<(), TransportError> {
        debug!(
            session_id = %self.session_id,
            window = window.sequence,
            bytes = window.len(),
            duration_ms = window.duration_ms(),
            "Transcribing window"
        );

        let segments = match self.services.transcriber.transcribe(window).await {
            Ok(segments) => segments,
            Err(err) => return self.fail(report, err.into()).await,
        };

        if segments.is_empty() {
            debug!(session_id = %self.session_id, window = window.sequence, "Window was silent");
            return Ok(());
        }

        for segment in &segments {
            self.sink.text(ServerMessage::transcript(segment.text.as_str())).await?;
        }

        let user_text = segments
            .iter()
            .map(|segment| segment.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        history.extend(Turn::new(Role::User, user_text.as_str()));
        report.user_text = Some(user_text);

        let mut planner = SynthesisPlanner::new(self.trigger_words, self.min_sentence_words);
        let mut replies = self.services.generator.generate(history);
        let mut generation_failed = false;

        while let Some(item) = replies.next().await {
            match item {
                Ok(chunk) => {
                    report.reply.push_str(&chunk.text);
                    self.sink.text(ServerMessage::gpt(chunk.text.as_str())).await?;

                    if let Some(unit) = planner.push(&chunk.text) {
                        self.speak(&unit, report).await?;
                    }
                }
                Err(err) => {
                    generation_failed = true;
                    self.fail(report, err.into()).await?;
                }
            }
        }

        // A failed reply keeps its text but the unspoken tail stays silent
        if !generation_failed {
            if let Some(rest) = planner.finish() {
                self.speak(&rest, report).await?;
            }
        }

        Ok(())
    }

    async fn speak(&self, text: &str, report: &mut TurnReport) -> Result<(), TransportError> {
        debug!(session_id = %self.session_id, words = text.split_whitespace().count(), "Synthesizing unit");

        let mut audio = self.services.synthesizer.synthesize(text, &self.voice);
        while let Some(item) = audio.next().await {
            match item {
                Ok(chunk) => {
                    report.audio_chunks += 1;
                    self.sink.binary(chunk.audio).await?;
                }
                Err(err) => self.fail(report, err.into()).await?,
            }
        }
        Ok(())
    }

    /// Log a recoverable failure and tell the client about it.
    async fn fail(&self, report: &mut TurnReport, err: PipelineError) -> Result<(), TransportError> {
        warn!(
            session_id = %self.session_id,
            stage = %err.stage(),
            window = report.window,
            recoverable = err.is_recoverable(),
            error = %err,
            "Pipeline stage failed"
        );
        let message = ServerMessage::error(err.client_message());
        report.errors.push(err);
        self.sink.text(message).await
    }
}
