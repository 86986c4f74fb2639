//! Client Events
//!
//! Messages sent from a client to the relay. Each WebSocket frame carries one
//! JSON object:
//!
//! ```json
//! { "text": "prompt text", "chatId": "optional opaque id" }
//! ```
//!
//! `text == "STOP"` (exact match) is the stop sentinel; any other non-empty
//! text is a generation request.

use serde::Deserialize;
use thiserror::Error;

use crate::backend::GenerationRequest;

/// The stop sentinel
pub const STOP_SENTINEL: &str = "STOP";

/// A raw frame received from the client transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// A text frame
    Text(String),
    /// A binary frame, interpreted as UTF-8 text
    Binary(Vec<u8>),
}

impl InboundFrame {
    /// Frame payload as text
    fn as_text(&self) -> Result<&str, InboundError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Binary(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| InboundError::Malformed(format!("binary frame is not UTF-8: {e}"))),
        }
    }
}

impl From<&str> for InboundFrame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for InboundFrame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Wire shape of a client message
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientMessage {
    #[serde(default)]
    text: Option<serde_json::Value>,
    #[serde(default, alias = "chatId")]
    conversation_id: Option<String>,
}

/// A client message the router can act on
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    /// Start a generation, preempting any running one
    Generate(GenerationRequest),
    /// Stop the running generation
    Stop,
}

/// Why a client message was rejected
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum InboundError {
    /// The prompt text is missing or blank
    #[error("no prompt text provided")]
    Empty,
    /// The frame is not a JSON object of the expected shape
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl InboundError {
    /// Message reported to the client
    #[must_use]
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::Empty => "no prompt text provided",
            Self::Malformed(_) => "malformed message",
        }
    }
}

impl ClientCommand {
    /// Interpret a raw frame
    ///
    /// # Errors
    ///
    /// Returns [`InboundError`] if the frame is not a JSON object with a
    /// non-blank string `text` field.
    pub fn parse(frame: &InboundFrame) -> Result<Self, InboundError> {
        let raw = frame.as_text()?;
        if raw.trim().is_empty() {
            return Err(InboundError::Empty);
        }

        let message: ClientMessage =
            serde_json::from_str(raw).map_err(|e| InboundError::Malformed(e.to_string()))?;

        let text = match message.text {
            None | Some(serde_json::Value::Null) => return Err(InboundError::Empty),
            Some(serde_json::Value::String(text)) => text,
            Some(other) => {
                return Err(InboundError::Malformed(format!(
                    "text must be a string, got {other}"
                )))
            }
        };

        if text == STOP_SENTINEL {
            return Ok(Self::Stop);
        }
        if text.trim().is_empty() {
            return Err(InboundError::Empty);
        }

        let request = GenerationRequest {
            prompt: text,
            conversation_id: message.conversation_id,
        };
        Ok(Self::Generate(request))
    }
}
