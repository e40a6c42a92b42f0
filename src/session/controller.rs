//! # Session Controller
//!
//! Owns one connection from `init` to close. The controller runs as a single
//! task that waits on two things at once:
//! - the next inbound event (control message, audio, close)
//! - the turn currently in flight, if any
//!
//! ## Concurrency Rules:
//! - At most one turn runs per session; audio that arrives meanwhile is
//!   buffered (up to the backlog bound) and windowed once the turn completes.
//! - Control messages stay responsive during a turn: `ping` is answered
//!   immediately and `flush` is deferred until the turn ends.
//! - Dropping the in-flight future is how a disconnect cancels a turn, so no
//!   frame is sent after the session closes.
//!
//! ## History:
//! The user turn and the (possibly partial) assistant reply are committed when
//! a turn completes. History lives only as long as the session and is cleared
//! on close.

use crate::audio::{AudioWindow, AudioWindower};
use crate::config::PipelineConfig;
use crate::conversation::{ConversationStore, Role, Turn};
use crate::pipeline::error::{Stage, TransportError};
use crate::pipeline::PipelineServices;
use crate::session::protocol::{ClientMessage, FrameSink, InboundEvent, ServerMessage};
use crate::session::state::{SessionState, SessionStatus};
use crate::session::turn::{TurnReport, TurnRunner};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

type InFlight = Option<BoxFuture<'static, TurnReport>>;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// The client sent a close frame
    ClientClosed(Option<String>),
    /// The transport layer went away without a close frame
    ChannelClosed,
    /// Fatal transport failure (malformed frame, broken connection, send failure)
    Transport(TransportError),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::ClientClosed(Some(reason)) => write!(f, "client closed: {}", reason),
            CloseReason::ClientClosed(None) => f.write_str("client closed"),
            CloseReason::ChannelClosed => f.write_str("connection dropped"),
            CloseReason::Transport(err) => write!(f, "{}", err),
        }
    }
}

/// Logged and returned when a session ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub windows_processed: u64,
    pub turns: usize,
    /// Recoverable failures per stage
    pub errors: HashMap<&'static str, u64>,
    pub close_reason: String,
    pub final_state: SessionState,
    pub dropped_audio_bytes: usize,
    pub transcript: Vec<Turn>,
}

pub struct SessionController {
    session_id: String,
    config: PipelineConfig,
    services: PipelineServices,
    sink: FrameSink,
    status: watch::Sender<SessionStatus>,
    state: SessionState,
    windower: AudioWindower,
    history: ConversationStore,
    voice: String,
    flush_requested: bool,
    backlog_full: bool,
    early_audio_reported: bool,
    windows_completed: u64,
    errors: HashMap<&'static str, u64>,
}

impl SessionController {
    pub fn new(
        session_id: impl Into<String>,
        config: PipelineConfig,
        services: PipelineServices,
        sink: FrameSink,
    ) -> (Self, watch::Receiver<SessionStatus>) {
        let (status, status_rx) = watch::channel(SessionStatus::default());
        let controller = Self {
            session_id: session_id.into(),
            windower: AudioWindower::from_config(&config),
            voice: config.default_voice.clone(),
            config,
            services,
            sink,
            status,
            state: SessionState::Idle,
            history: ConversationStore::new(),
            flush_requested: false,
            backlog_full: false,
            early_audio_reported: false,
            windows_completed: 0,
            errors: HashMap::new(),
        };
        (controller, status_rx)
    }

    /// Drive the session until the client goes away.
    pub async fn run(&mut self, mut inbound: mpsc::UnboundedReceiver<InboundEvent>) -> SessionSummary {
        info!(session_id = %self.session_id, "Interview session opened");
        let mut in_flight: InFlight = None;

        let reason = loop {
            tokio::select! {
                biased;

                report = next_report(&mut in_flight) => {
                    in_flight = None;
                    if let Some(reason) = self.complete_turn(report, &mut in_flight) {
                        break reason;
                    }
                }
                event = inbound.recv() => {
                    let Some(event) = event else {
                        break CloseReason::ChannelClosed;
                    };
                    if let Some(reason) = self.handle_event(event, &mut in_flight).await {
                        break reason;
                    }
                }
            }
        };

        if in_flight.take().is_some() {
            info!(session_id = %self.session_id, "Cancelled turn in flight");
        }
        self.close(reason)
    }

    async fn handle_event(&mut self, event: InboundEvent, in_flight: &mut InFlight) -> Option<CloseReason> {
        let result = match event {
            InboundEvent::Text(text) => match ClientMessage::parse(&text) {
                Ok(message) => self.handle_control(message, in_flight).await,
                Err(err) => {
                    warn!(session_id = %self.session_id, stage = %Stage::Transport, error = %err, "Rejected client frame");
                    Err(err)
                }
            },
            InboundEvent::Binary(bytes) => self.handle_audio(&bytes, in_flight).await,
            InboundEvent::Closed(reason) => return Some(CloseReason::ClientClosed(reason)),
            InboundEvent::Failed(cause) => {
                return Some(CloseReason::Transport(TransportError::Protocol(cause)))
            }
        };

        result.err().map(CloseReason::Transport)
    }

    async fn handle_control(&mut self, message: ClientMessage, in_flight: &mut InFlight) -> Result<(), TransportError> {
        match message {
            ClientMessage::Init { voice } => {
                if self.state != SessionState::Idle {
                    warn!(session_id = %self.session_id, state = %self.state, "Ignoring repeated init");
                    return Ok(());
                }
                if let Some(voice) = voice {
                    self.voice = voice;
                }
                info!(session_id = %self.session_id, voice = %self.voice, "Session initialised");
                self.sink.text(ServerMessage::ready()).await?;
                self.transition(SessionState::Listening);
            }
            ClientMessage::Ping => {
                self.sink.text(ServerMessage::Pong).await?;
            }
            ClientMessage::Flush => match self.state {
                SessionState::Listening => {
                    if let Some(window) = self.windower.flush() {
                        *in_flight = Some(self.start_turn(window));
                    }
                }
                SessionState::Processing => {
                    debug!(session_id = %self.session_id, "Flush deferred until the current turn ends");
                    self.flush_requested = true;
                }
                _ => warn!(session_id = %self.session_id, state = %self.state, "Ignoring flush"),
            },
            ClientMessage::Unknown(kind) => {
                warn!(session_id = %self.session_id, message_type = %kind, "Ignoring unknown control message");
            }
        }
        Ok(())
    }

    async fn handle_audio(&mut self, bytes: &[u8], in_flight: &mut InFlight) -> Result<(), TransportError> {
        if !self.state.accepts_audio() {
            warn!(session_id = %self.session_id, bytes = bytes.len(), "Dropping audio received before init");
            if !self.early_audio_reported {
                self.early_audio_reported = true;
                self.sink
                    .text(ServerMessage::error("audio received before init; send {\"type\":\"init\"} first"))
                    .await?;
            }
            return Ok(());
        }

        let (dropped, ready) = if in_flight.is_none() {
            let before = self.windower.dropped_bytes();
            let ready = self.windower.append(bytes);
            (self.windower.dropped_bytes() - before, ready)
        } else {
            (self.windower.push(bytes), None)
        };

        if dropped > 0 {
            warn!(
                session_id = %self.session_id,
                dropped,
                buffered = self.windower.buffered_len(),
                "Audio backlog full"
            );
            if !self.backlog_full {
                self.backlog_full = true;
                self.sink
                    .text(ServerMessage::error(
                        "audio backlog full: dropping audio until the current turn completes",
                    ))
                    .await?;
            }
        }

        if let Some(window) = ready {
            *in_flight = Some(self.start_turn(window));
        }
        Ok(())
    }

    fn start_turn(&mut self, window: AudioWindow) -> BoxFuture<'static, TurnReport> {
        self.backlog_full = false;
        self.transition(SessionState::Processing);

        let runner = TurnRunner {
            session_id: self.session_id.clone(),
            services: self.services.clone(),
            sink: self.sink.clone(),
            voice: self.voice.clone(),
            trigger_words: self.config.synthesis_trigger_word_count,
            min_sentence_words: self.config.synthesis_min_sentence_words,
        };
        runner.run(window, self.history.snapshot()).boxed()
    }

    /// Apply a finished turn, then start the next one if audio is waiting.
    fn complete_turn(&mut self, report: TurnReport, in_flight: &mut InFlight) -> Option<CloseReason> {
        if let Some(user_text) = &report.user_text {
            self.history.append(Role::User, user_text.as_str());
            self.history.append(Role::Assistant, report.reply.as_str());
        }
        for err in &report.errors {
            *self.errors.entry(err.stage().as_str()).or_default() += 1;
        }
        self.windows_completed += 1;

        debug!(
            session_id = %self.session_id,
            window = report.window,
            reply_chars = report.reply.len(),
            audio_chunks = report.audio_chunks,
            errors = report.errors.len(),
            history = self.history.len(),
            "Turn completed"
        );

        if let Some(err) = report.transport {
            return Some(CloseReason::Transport(err));
        }

        self.transition(SessionState::Listening);

        let next = if std::mem::take(&mut self.flush_requested) {
            self.windower.flush()
        } else {
            self.windower.take_ready()
        };
        if let Some(window) = next {
            *in_flight = Some(self.start_turn(window));
        }
        None
    }

    fn transition(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!(session_id = %self.session_id, from = %self.state, to = %next, "Unexpected state transition");
        }
        debug!(session_id = %self.session_id, from = %self.state, to = %next, "Session state changed");
        self.state = next;
        self.status.send_replace(SessionStatus {
            state: next,
            windows_completed: self.windows_completed,
        });
    }

    fn close(&mut self, reason: CloseReason) -> SessionSummary {
        if let CloseReason::Transport(err) = &reason {
            debug!(session_id = %self.session_id, error = %err, "Closing after transport failure");
            *self.errors.entry(Stage::Transport.as_str()).or_default() += 1;
        }
        self.transition(SessionState::Closed);

        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            windows_processed: self.windows_completed,
            turns: self.history.len(),
            errors: self.errors.clone(),
            close_reason: reason.to_string(),
            final_state: self.state,
            dropped_audio_bytes: self.windower.dropped_bytes(),
            transcript: self.history.snapshot(),
        };

        self.history.clear();
        self.windower.clear();

        info!(
            session_id = %summary.session_id,
            reason = %summary.close_reason,
            windows = summary.windows_processed,
            turns = summary.turns,
            "Interview session closed"
        );
        summary
    }
}

async fn next_report(in_flight: &mut InFlight) -> TurnReport {
    match in_flight {
        Some(turn) => turn.await,
        None => std::future::pending().await,
    }
}
