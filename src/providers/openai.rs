//! # OpenAI-compatible Provider
//!
//! One HTTP client backing all three pipeline capabilities:
//! - `POST {base_url}/audio/transcriptions`: each window is uploaded as a
//!   16 kHz mono 16-bit WAV file (multipart)
//! - `POST {base_url}/chat/completions` with `stream: true`: tokens are read
//!   from the server-sent event stream as they arrive
//! - `POST {base_url}/audio/speech`: audio is forwarded chunk by chunk in the
//!   configured `speech_format`. The default `pcm` is raw 24 kHz 16-bit mono
//!   little-endian, which is what clients receive in binary frames.
//!
//! Every request is issued lazily, on first poll of the returned stream.

use crate::audio::{pcm, AudioWindow, SAMPLE_RATE};
use crate::config::ProvidersConfig;
use crate::conversation::Turn;
use crate::pipeline::error::{GenerationError, SynthesisError, TranscriptionError};
use crate::pipeline::generator::{LanguageModel, TokenStream};
use crate::pipeline::synthesizer::{AudioStream, TextToSpeech};
use crate::pipeline::transcriber::SpeechToText;
use crate::providers::sse::{SseDecoder, SseEvent};
use anyhow::Context;
use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Voices the speech endpoint accepts; anything else maps to the fallback.
const KNOWN_VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "fable", "nova", "onyx", "sage", "shimmer", "verse",
];

#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: Arc<ProvidersConfig>,
}

impl OpenAiProvider {
    pub fn new(config: &ProvidersConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            // Idle limit between reads; a long streamed reply may take longer overall
            .read_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client for the speech/chat provider")?;

        Ok(Self {
            client,
            config: Arc::new(config.clone()),
        })
    }

    fn endpoint(config: &ProvidersConfig, path: &str) -> String {
        format!("{}/{}", config.base_url.trim_end_matches('/'), path)
    }

    fn post(client: &reqwest::Client, config: &ProvidersConfig, path: &str) -> reqwest::RequestBuilder {
        let request = client.post(Self::endpoint(config, path));
        match &config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Map a session voice profile to one the provider knows.
    pub fn resolve_voice<'a>(&'a self, voice: &'a str) -> &'a str {
        if KNOWN_VOICES.contains(&voice) {
            voice
        } else {
            &self.config.speech_fallback_voice
        }
    }
}

/// Read an error body for the log without failing on it.
async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("{}: {}", status, body.trim())
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl SpeechToText for OpenAiProvider {
    async fn transcribe(&self, window: &AudioWindow) -> Result<Vec<String>, TranscriptionError> {
        let level = pcm::SignalLevel::measure(&pcm::decode_samples(&window.bytes));
        if level.is_quiet() {
            debug!(window = window.sequence, rms = level.rms, "Skipping upload of a quiet window");
            return Ok(Vec::new());
        }

        let wav = pcm::encode_wav(&window.bytes, SAMPLE_RATE)
            .map_err(|e| TranscriptionError::InvalidAudio(e.to_string()))?;

        let file = reqwest::multipart::Part::bytes(wav)
            .file_name(format!("window-{}.wav", window.sequence))
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::InvalidAudio(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.config.transcription_model.clone())
            .text("response_format", "json");
        if let Some(language) = &self.config.transcription_language {
            form = form.text("language", language.clone());
        }

        let response = Self::post(&self.client, &self.config, "audio/transcriptions")
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_body(response).await;
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => TranscriptionError::InvalidAudio(detail),
                _ => TranscriptionError::Unavailable(detail),
            });
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::BadResponse(e.to_string()))?;

        Ok(vec![body.text])
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

/// System prompt first, then the history oldest turn first.
fn chat_messages<'a>(system_prompt: &'a str, history: &'a [Turn]) -> Vec<ChatMessage<'a>> {
    let system = (!system_prompt.trim().is_empty()).then(|| ChatMessage {
        role: "system",
        content: system_prompt,
    });

    system
        .into_iter()
        .chain(history.iter().map(|turn| ChatMessage {
            role: turn.role().as_str(),
            content: turn.text(),
        }))
        .collect()
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Text carried by one streamed completion chunk, if any.
fn parse_chat_delta(payload: &str) -> Result<Option<String>, GenerationError> {
    let chunk: ChatChunk = serde_json::from_str(payload)
        .map_err(|e| GenerationError::Stream(format!("unreadable chunk: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(GenerationError::Stream(error.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty()))
}

struct ChatStreamState<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, GenerationError>>,
    finished: bool,
}

/// Turn an SSE response body into reply tokens.
fn decode_chat_stream<S, B, E>(body: S) -> TokenStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = ChatStreamState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    for event in state.decoder.feed(bytes.as_ref()) {
                        match event {
                            SseEvent::Done => {
                                state.finished = true;
                                break;
                            }
                            SseEvent::Data(payload) => match parse_chat_delta(&payload) {
                                Ok(Some(text)) => state.pending.push_back(Ok(text)),
                                Ok(None) => {}
                                Err(err) => {
                                    state.pending.push_back(Err(err));
                                    state.finished = true;
                                    break;
                                }
                            },
                        }
                    }
                }
                Some(Err(err)) => {
                    state.pending.push_back(Err(GenerationError::Stream(err.to_string())));
                    state.finished = true;
                }
                None => {
                    if state.decoder.has_partial_line() {
                        debug!("Chat stream ended with an unterminated line");
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

impl LanguageModel for OpenAiProvider {
    fn stream_reply(&self, history: Vec<Turn>) -> TokenStream {
        let client = self.client.clone();
        let config = self.config.clone();

        let request = async move {
            let body = ChatRequest {
                model: &config.chat_model,
                messages: chat_messages(&config.system_prompt, &history),
                stream: true,
            };

            let response = Self::post(&client, &config, "chat/completions")
                .json(&body)
                .send()
                .await
                .map_err(|e| GenerationError::Unavailable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let detail = error_body(response).await;
                return Err(match status {
                    StatusCode::TOO_MANY_REQUESTS => GenerationError::Quota(detail),
                    StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                        GenerationError::InvalidPrompt(detail)
                    }
                    _ => GenerationError::Unavailable(detail),
                });
            }

            Ok(decode_chat_stream(response.bytes_stream()))
        };

        stream::once(request).try_flatten().boxed()
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

impl TextToSpeech for OpenAiProvider {
    fn stream_speech(&self, text: String, voice: String) -> AudioStream {
        let voice = self.resolve_voice(&voice).to_string();
        let client = self.client.clone();
        let config = self.config.clone();

        let request = async move {
            let body = SpeechRequest {
                model: &config.speech_model,
                input: &text,
                voice: &voice,
                response_format: &config.speech_format,
            };

            let response = Self::post(&client, &config, "audio/speech")
                .json(&body)
                .send()
                .await
                .map_err(|e| SynthesisError::Unavailable(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let detail = error_body(response).await;
                return Err(if status.is_client_error() {
                    SynthesisError::Rejected(detail)
                } else {
                    SynthesisError::Unavailable(detail)
                });
            }

            let audio: AudioStream = response
                .bytes_stream()
                .map(|chunk| {
                    chunk
                        .map(|bytes| bytes.to_vec())
                        .map_err(|e| SynthesisError::Stream(e.to_string()))
                })
                .boxed();
            Ok(audio)
        };

        stream::once(request).try_flatten().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::conversation::Role;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(&AppConfig::default().providers).unwrap()
    }

    #[tokio::test]
    async fn test_slow_stream_outlasting_timeout_is_not_cut() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            // Four gaps of 400 ms: 1.6 s in total, each gap well under a second
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_millis(400)).await;
                socket.write_all(b"2\r\nok\r\n").await.unwrap();
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
        });

        let mut config = AppConfig::default().providers;
        config.request_timeout_secs = 1;
        let provider = OpenAiProvider::new(&config).unwrap();

        let body = provider
            .client
            .get(format!("http://{}/stream", addr))
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(&body[..], b"okokokok");
        server.await.unwrap();
    }

    #[test]
    fn test_chat_messages_start_with_system_prompt() {
        let history = vec![
            Turn::new(Role::User, "hello").unwrap(),
            Turn::new(Role::Assistant, "Hi there").unwrap(),
        ];
        let messages = chat_messages("Be brief.", &history);

        assert_eq!(
            messages,
            vec![
                ChatMessage { role: "system", content: "Be brief." },
                ChatMessage { role: "user", content: "hello" },
                ChatMessage { role: "assistant", content: "Hi there" },
            ]
        );
        assert_eq!(chat_messages(" ", &history).len(), 2);
    }

    #[test]
    fn test_parse_chat_delta() {
        assert_eq!(
            parse_chat_delta(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            Some("Hi".to_string())
        );
        assert_eq!(parse_chat_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(), None);
        assert_eq!(parse_chat_delta(r#"{"choices":[]}"#).unwrap(), None);
        assert_eq!(
            parse_chat_delta(r#"{"error":{"message":"overloaded"}}"#),
            Err(GenerationError::Stream("overloaded".into()))
        );
        assert!(parse_chat_delta("{").is_err());
    }

    #[tokio::test]
    async fn test_decode_chat_stream_across_chunks() {
        let body = stream::iter(vec![
            Ok::<_, std::io::Error>(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: {\"choi".to_vec()),
            Ok(b"ces\":[{\"delta\":{\"content\":\" there\"}}]}\n\ndata: [DONE]\n\n".to_vec()),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n".to_vec()),
        ]);

        let tokens: Vec<_> = decode_chat_stream(body).collect().await;
        assert_eq!(tokens, vec![Ok("Hi".to_string()), Ok(" there".to_string())]);
    }

    #[tokio::test]
    async fn test_decode_chat_stream_surfaces_transport_error() {
        let body = stream::iter(vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Par\"}}]}\n\n".to_vec()),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer")),
        ]);

        let tokens: Vec<_> = decode_chat_stream(body).collect().await;
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0], Ok("Par".to_string()));
        assert!(matches!(&tokens[1], Err(GenerationError::Stream(msg)) if msg.contains("reset")));
    }

    #[test]
    fn test_unknown_voice_uses_fallback() {
        let provider = provider();
        assert_eq!(provider.resolve_voice("nova"), "nova");
        assert_eq!(provider.resolve_voice("default-voice"), "alloy");
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let mut config = AppConfig::default().providers;
        config.base_url = "http://localhost:11434/v1/".to_string();
        assert_eq!(
            OpenAiProvider::endpoint(&config, "chat/completions"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_quiet_window_skips_request() {
        // base_url points nowhere; a request would fail with Unavailable
        let mut config = AppConfig::default().providers;
        config.base_url = "http://127.0.0.1:9".to_string();
        let provider = OpenAiProvider::new(&config).unwrap();

        let window = AudioWindow { sequence: 1, bytes: vec![0u8; 32_000] };
        assert_eq!(provider.transcribe(&window).await.unwrap(), Vec::<String>::new());
    }
}
