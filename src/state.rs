//! # Application State Management
//!
//! State shared by every HTTP handler and every interview session.
//!
//! ## What is shared, and how:
//! - **Configuration**: `Arc<AppConfig>`, read-only after startup. Sessions
//!   copy the pipeline section they need when they start.
//! - **Pipeline services**: the transcription, generation and synthesis
//!   adapters. Cloning them is cheap (they hold `Arc`s to the engines).
//! - **Metrics**: `Arc<RwLock<AppMetrics>>`, updated by the request middleware
//!   and by sessions as they open and close.
//!
//! Sessions never share anything else: audio buffers and conversation history
//! live inside each session's own task.
//!
//! ## Lock Poisoning:
//! A panic while holding the metrics lock leaves plain counters behind, which
//! are still usable, so poisoned locks are recovered rather than propagated.

use crate::config::AppConfig;
use crate::pipeline::PipelineServices;
use crate::session::SessionSummary;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The state handed to every handler through `web::Data`.
#[derive(Clone)]
pub struct AppState {
    /// Loaded once in `main`, never updated
    pub config: Arc<AppConfig>,

    /// Counters updated by every request and every session
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Capability adapters used by each new session
    pub services: PipelineServices,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected since server start.
///
/// ## Why these metrics matter:
/// - **request_count / error_count**: HTTP load and reliability
/// - **active_sessions**: current interviews, checked against the session cap
/// - **sessions**: what happened inside the interviews that already ended
/// - **endpoint_metrics**: per-route latency and error rates
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_sessions: u32,
    pub sessions: SessionMetrics,
    /// Key: "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Aggregated outcome of finished interview sessions.
#[derive(Debug, Default, Clone)]
pub struct SessionMetrics {
    pub opened: u64,
    /// Upgrade requests refused because the server was at capacity
    pub rejected: u64,
    pub closed: u64,
    pub windows_processed: u64,
    pub turns: u64,
    pub dropped_audio_bytes: u64,
    /// Failures per pipeline stage (`transcribe`, `generate`, ...)
    pub stage_errors: HashMap<String, u64>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, services: PipelineServices) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            services,
            start_time: Instant::now(),
        }
    }

    /// Shared handle to the configuration.
    pub fn get_config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    /// Record latency and outcome for one endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Reserve a slot for a new interview.
    ///
    /// ## Admission Control:
    /// Check and increment happen under one write lock, so two upgrades racing
    /// for the last slot can't both get in. Returns `false` at capacity.
    pub fn try_open_session(&self) -> bool {
        let limit = self.config.performance.max_concurrent_sessions;
        let mut metrics = self.write_metrics();

        if metrics.active_sessions as usize >= limit {
            metrics.sessions.rejected += 1;
            return false;
        }

        metrics.active_sessions += 1;
        metrics.sessions.opened += 1;
        true
    }

    /// Release a slot for a session that never started.
    pub fn abandon_session(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Release the slot taken by `try_open_session` and fold in the outcome.
    pub fn record_session_closed(&self, summary: &SessionSummary) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);

        let sessions = &mut metrics.sessions;
        sessions.closed += 1;
        sessions.windows_processed += summary.windows_processed;
        sessions.turns += summary.turns as u64;
        sessions.dropped_audio_bytes += summary.dropped_audio_bytes as u64;
        for (stage, count) in &summary.errors {
            *sessions.stage_errors.entry(stage.to_string()).or_default() += count;
        }
    }

    /// Consistent copy of the metrics, taken without holding the lock while
    /// a response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::error::{GenerationError, SynthesisError, TranscriptionError};
    use crate::pipeline::generator::{LanguageModel, TokenStream};
    use crate::pipeline::synthesizer::{AudioStream, TextToSpeech};
    use crate::pipeline::transcriber::SpeechToText;
    use crate::session::state::SessionState;
    use async_trait::async_trait;
    use futures_util::stream::{self, StreamExt};

    /// Engines that refuse every request; enough for HTTP-level tests.
    pub(crate) struct Offline;

    #[async_trait]
    impl SpeechToText for Offline {
        async fn transcribe(
            &self,
            _window: &crate::audio::AudioWindow,
        ) -> Result<Vec<String>, TranscriptionError> {
            Err(TranscriptionError::Unavailable("offline".into()))
        }
    }

    impl LanguageModel for Offline {
        fn stream_reply(&self, _history: Vec<crate::conversation::Turn>) -> TokenStream {
            stream::iter(vec![Err(GenerationError::Unavailable("offline".into()))]).boxed()
        }
    }

    impl TextToSpeech for Offline {
        fn stream_speech(&self, _text: String, _voice: String) -> AudioStream {
            stream::iter(vec![Err(SynthesisError::Unavailable("offline".into()))]).boxed()
        }
    }

    pub(crate) fn test_state(config: AppConfig) -> AppState {
        let offline = Arc::new(Offline);
        AppState::new(
            config,
            PipelineServices::new(offline.clone(), offline.clone(), offline),
        )
    }

    #[test]
    fn test_admission_control() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 2;
        let state = test_state(config);

        assert!(state.try_open_session());
        assert!(state.try_open_session());
        assert!(!state.try_open_session());

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 2);
        assert_eq!(metrics.sessions.rejected, 1);
    }

    #[test]
    fn test_closed_session_is_folded_into_metrics() {
        let state = test_state(AppConfig::default());
        assert!(state.try_open_session());

        let summary = SessionSummary {
            session_id: "s1".into(),
            windows_processed: 3,
            turns: 4,
            errors: HashMap::from([("generate", 1)]),
            close_reason: "client closed".into(),
            final_state: SessionState::Closed,
            dropped_audio_bytes: 640,
            transcript: Vec::new(),
        };
        state.record_session_closed(&summary);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 0);
        assert_eq!(metrics.sessions.closed, 1);
        assert_eq!(metrics.sessions.windows_processed, 3);
        assert_eq!(metrics.sessions.turns, 4);
        assert_eq!(metrics.sessions.stage_errors.get("generate"), Some(&1));
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = test_state(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }
}
