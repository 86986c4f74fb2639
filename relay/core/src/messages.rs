//! Relay Messages
//!
//! Messages sent from the relay to a client. Unlike inbound messages these are
//! not uniformly JSON:
//!
//! - Fragments are sent as raw text, exactly as the backend produced them.
//! - Stop acknowledgements are `{"message":"stopped"}` or
//!   `{"message":"nothing-to-stop"}`.
//! - Errors are `{"error":"<text>"}`.
//!
//! There is no explicit end-of-response marker. A client infers completion
//! from the absence of further fragments.

use serde::{Deserialize, Serialize};

/// Error text sent when a backend call fails
pub const API_REQUEST_ERROR: &str = "API request error";

/// Acknowledgement of a stop request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopAck {
    /// A generation was running and has been cancelled
    Stopped,
    /// No generation was running
    NothingToStop,
}

impl StopAck {
    /// Wire value of the acknowledgement
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::NothingToStop => "nothing-to-stop",
        }
    }
}

/// A message from the relay to a client
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundMessage {
    /// A text fragment of the running response
    Fragment(String),
    /// Reply to a stop request
    Ack(StopAck),
    /// Something went wrong
    Error(String),
}

/// JSON control messages, as they appear on the wire
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ControlFrame {
    Ack { message: StopAck },
    Error { error: String },
}

impl OutboundMessage {
    /// Build an error message
    pub fn error(text: impl Into<String>) -> Self {
        Self::Error(text.into())
    }

    /// Encode for the wire
    #[must_use]
    pub fn to_frame(&self) -> String {
        match self {
            Self::Fragment(text) => text.clone(),
            Self::Ack(ack) => serde_json::json!({ "message": ack }).to_string(),
            Self::Error(text) => serde_json::json!({ "error": text }).to_string(),
        }
    }

    /// Decode a frame received from the relay
    ///
    /// Anything that is not a recognised control object is a fragment. A
    /// fragment whose text happens to be a control object is indistinguishable
    /// from that control message.
    #[must_use]
    pub fn parse_frame(frame: &str) -> Self {
        match serde_json::from_str::<ControlFrame>(frame) {
            Ok(ControlFrame::Ack { message }) => Self::Ack(message),
            Ok(ControlFrame::Error { error }) => Self::Error(error),
            Err(_) => Self::Fragment(frame.to_string()),
        }
    }

    /// Whether this is a text fragment
    #[must_use]
    pub fn is_fragment(&self) -> bool {
        matches!(self, Self::Fragment(_))
    }
}
