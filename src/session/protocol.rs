//! # Session Wire Protocol
//!
//! ## Client → Server:
//! - **Text frames**: JSON control messages, `{"type":"init","voice":"v1"}`,
//!   `{"type":"ping"}`, `{"type":"flush"}`
//! - **Binary frames**: raw PCM audio (16-bit signed, 16 kHz, mono, little-endian)
//!
//! ## Server → Client:
//! - **Text frames**: `ack`, `pong`, `transcript`, `gpt` and `error` events
//! - **Binary frames**: synthesized speech in the speech provider's format
//!
//! A text frame that is not a JSON object with a string `type` is a protocol
//! violation. Unknown types are tolerated so that newer clients keep working.

use crate::pipeline::error::TransportError;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Control messages understood by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Init { voice: Option<String> },
    Ping,
    Flush,
    Unknown(String),
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| TransportError::MalformedFrame(format!("invalid JSON: {}", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| TransportError::MalformedFrame("expected a JSON object".to_string()))?;

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::MalformedFrame("missing string field `type`".to_string()))?;

        let message = match kind {
            "init" => {
                let voice = match object.get("voice") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(voice)) => {
                        let voice = voice.trim();
                        (!voice.is_empty()).then(|| voice.to_string())
                    }
                    Some(_) => {
                        return Err(TransportError::MalformedFrame(
                            "`voice` must be a string".to_string(),
                        ))
                    }
                };
                ClientMessage::Init { voice }
            }
            "ping" => ClientMessage::Ping,
            "flush" => ClientMessage::Flush,
            other => ClientMessage::Unknown(other.to_string()),
        };

        Ok(message)
    }
}

/// JSON events sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Ack { data: String },
    Pong,
    Transcript { data: String },
    Gpt { data: String },
    Error { data: String },
}

impl ServerMessage {
    pub fn ready() -> Self {
        ServerMessage::Ack {
            data: "ready".to_string(),
        }
    }

    pub fn transcript(text: impl Into<String>) -> Self {
        ServerMessage::Transcript { data: text.into() }
    }

    pub fn gpt(text: impl Into<String>) -> Self {
        ServerMessage::Gpt { data: text.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            data: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A frame queued for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(ServerMessage),
    Binary(Vec<u8>),
}

/// What the transport layer hands to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Text(String),
    Binary(Vec<u8>),
    /// Orderly close initiated by the client
    Closed(Option<String>),
    /// The connection broke (protocol error, heartbeat timeout)
    Failed(String),
}

/// Sending half of a session's outbound queue.
///
/// The queue is bounded, so a slow client suspends the session at each send
/// instead of letting frames pile up. Once the receiving side is gone every
/// send fails with [`TransportError::Disconnected`].
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<OutboundFrame>,
}

impl FrameSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    pub async fn text(&self, message: ServerMessage) -> Result<(), TransportError> {
        self.send(OutboundFrame::Text(message)).await
    }

    pub async fn binary(&self, audio: Vec<u8>) -> Result<(), TransportError> {
        self.send(OutboundFrame::Binary(audio)).await
    }
}
