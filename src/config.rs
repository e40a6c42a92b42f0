//! # Configuration Management
//!
//! Loads the interview server configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP_` prefix (`__` separates nesting levels)
//! - A few well-known variables used by hosting platforms (`HOST`, `PORT`, `OPENAI_API_KEY`)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT`, `OPENAI_API_KEY`
//! 2. `APP_SERVER__PORT=9000`, `APP_PIPELINE__WINDOW_THRESHOLD_BYTES=48000`, ...
//! 3. `config.toml`
//! 4. Defaults
//!
//! ## Lifetime:
//! The configuration is loaded once at startup, validated, and then shared
//! read-only (`Arc<AppConfig>`) by every session. Nothing mutates it afterwards.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Root configuration object.
///
/// ## Why separate sections:
/// Each section maps to one concern of the server (HTTP listener, the streaming
/// pipeline, the speech/chat providers, capacity limits) so they can be tuned
/// independently from `config.toml` or the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub providers: ProvidersConfig,
    pub performance: PerformanceConfig,
}

/// HTTP listener and websocket keep-alive settings.
///
/// ## Fields:
/// - `host` / `port`: where the server binds
/// - `heartbeat_interval_secs`: how often a protocol-level ping is sent to each client
/// - `client_timeout_secs`: silence after which a client is considered gone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// How a window is cut from the buffered audio once the threshold is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// The entire buffer becomes the window and the buffer is emptied.
    /// Windows may be larger than the threshold when audio arrives in bursts.
    Drain,
    /// Exactly `window_threshold_bytes` per window; surplus bytes stay buffered
    /// and feed the next window.
    CarryOver,
}

/// Settings for the per-connection streaming pipeline.
///
/// ## Defaults:
/// - 32,000 bytes per window = 1 second of 16 kHz mono 16-bit PCM
/// - at most 10 seconds of audio may queue up while a turn is being processed
/// - synthesis is requested every 10 words, or earlier at a sentence end
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub window_threshold_bytes: usize,
    pub window_policy: WindowPolicy,
    pub max_buffered_audio_bytes: usize,
    pub synthesis_trigger_word_count: usize,
    pub synthesis_min_sentence_words: usize,
    pub default_voice: String,
    pub outbound_queue_frames: usize,
}

/// Connection details for the OpenAI-compatible speech and chat provider.
///
/// Any server exposing `/audio/transcriptions`, `/chat/completions` and
/// `/audio/speech` works, e.g. a local gateway in front of Whisper and Ollama.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    pub base_url: String,
    /// Optional: local gateways usually don't need one
    pub api_key: Option<String>,
    pub transcription_model: String,
    pub transcription_language: Option<String>,
    pub chat_model: String,
    pub system_prompt: String,
    pub speech_model: String,
    pub speech_fallback_voice: String,
    /// `pcm` = raw 24 kHz 16-bit mono little-endian; `mp3`, `opus`, ... also accepted
    pub speech_format: String,
    /// Longest silence allowed while waiting on a provider response; streamed
    /// bodies may run longer in total
    pub request_timeout_secs: u64,
}

/// Capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of interviews running at the same time
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                heartbeat_interval_secs: 15,
                client_timeout_secs: 60,
            },
            pipeline: PipelineConfig::default(),
            providers: ProvidersConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                api_key: None,
                transcription_model: "whisper-1".to_string(),
                transcription_language: Some("en".to_string()),
                chat_model: "gpt-4o-mini".to_string(),
                system_prompt: "You are Sam, a senior product manager conducting a mock interview. \
                    Stay in character, ask one thoughtful question at a time, and keep replies short \
                    enough to be spoken aloud."
                    .to_string(),
                speech_model: "tts-1".to_string(),
                speech_fallback_voice: "alloy".to_string(),
                speech_format: "pcm".to_string(),
                request_timeout_secs: 60,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_threshold_bytes: 32_000,
            window_policy: WindowPolicy::Drain,
            max_buffered_audio_bytes: 320_000,
            synthesis_trigger_word_count: 10,
            synthesis_min_sentence_words: 4,
            default_voice: "default-voice".to_string(),
            outbound_queue_frames: 64,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`
    /// - `APP_PIPELINE__WINDOW_POLICY=carry_over`
    /// - `APP_PROVIDERS__CHAT_MODEL=llama3.1:8b`
    /// - `PORT=3001` (deployment platforms)
    /// - `OPENAI_API_KEY=sk-...`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Single underscore after the prefix, double underscore between levels,
            // so field names like `window_threshold_bytes` survive intact
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                settings = settings.set_override("providers.api_key", key)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run with.
    ///
    /// ## What this checks:
    /// - the listener has a real port
    /// - windows have a size, and the backlog bound can hold at least one window
    /// - the synthesis trigger and outbound queue are non-zero
    /// - the provider has an endpoint and model names
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.heartbeat_interval_secs == 0
            || self.server.client_timeout_secs <= self.server.heartbeat_interval_secs
        {
            return Err(anyhow::anyhow!(
                "Client timeout must be longer than a non-zero heartbeat interval"
            ));
        }

        if self.pipeline.window_threshold_bytes == 0 {
            return Err(anyhow::anyhow!("Window threshold must be greater than 0"));
        }

        if self.pipeline.max_buffered_audio_bytes < self.pipeline.window_threshold_bytes {
            return Err(anyhow::anyhow!(
                "max_buffered_audio_bytes ({}) must be at least the window threshold ({})",
                self.pipeline.max_buffered_audio_bytes,
                self.pipeline.window_threshold_bytes
            ));
        }

        if self.pipeline.synthesis_trigger_word_count == 0 {
            return Err(anyhow::anyhow!("Synthesis trigger word count must be greater than 0"));
        }

        if self.pipeline.outbound_queue_frames == 0 {
            return Err(anyhow::anyhow!("Outbound queue must hold at least one frame"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        let providers = &self.providers;
        if providers.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Provider base_url cannot be empty"));
        }
        for (name, value) in [
            ("transcription_model", &providers.transcription_model),
            ("chat_model", &providers.chat_model),
            ("speech_model", &providers.speech_model),
            ("speech_fallback_voice", &providers.speech_fallback_voice),
        ] {
            if value.trim().is_empty() {
                return Err(anyhow::anyhow!("Provider {} cannot be empty", name));
            }
        }

        Ok(())
    }
}
