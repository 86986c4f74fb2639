//! Backend Errors
//!
//! Failures of a generation call. None of these are fatal to a client
//! connection; the relay converts them into client-visible notifications or
//! silent cleanup.

use thiserror::Error;

/// Error produced by a generation backend
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The call could not be established (connection refused, DNS, timeout)
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with a non-success status
    #[error("backend rejected request with status {status}: {body}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// The transfer broke after it was established
    #[error("backend stream failed: {0}")]
    Stream(String),

    /// The backend reported an error inside the response stream
    #[error("backend reported error: {0}")]
    Backend(String),

    /// A complete (non-streaming) response could not be decoded
    #[error("failed to decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Whether the call failed as a whole, before the backend produced output
    #[must_use]
    pub fn is_call_failure(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Rejected { .. })
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_connect() || err.is_timeout() || err.is_request() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Stream(err.to_string())
        }
    }
}
