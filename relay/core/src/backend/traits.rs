//! Generation Backend Traits
//!
//! Trait definitions for text-generation backends. The router only talks to a
//! [`GenerationBackend`], so the Ollama client can be swapped for a scripted
//! backend in tests.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::BackendError;
use super::generation::Generation;

/// One generation request built from a client message
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    /// The prompt text
    pub prompt: String,
    /// Opaque conversation identifier supplied by the client
    ///
    /// The backend keeps no server-side history; this is passed through for
    /// bookkeeping and logging only.
    pub conversation_id: Option<String>,
}

impl GenerationRequest {
    /// Create a request for a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            conversation_id: None,
        }
    }

    /// Attach a conversation identifier
    #[must_use]
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// Connection and sampling settings for the backend
///
/// Sampling is fixed per process: every request uses the same model and
/// temperature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    /// Backend host name or address
    pub host: String,
    /// Backend port
    pub port: u16,
    /// Model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Timeout for establishing the TCP connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Total timeout for non-streaming requests
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            model: "phi4-mini:latest".to_string(),
            temperature: 0.7,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl BackendSettings {
    /// Settings pointing at a specific host and port, defaults otherwise
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Base URL of the backend
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Text-generation backend
///
/// Implement this trait to relay to a different provider.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Start a streaming generation
    ///
    /// Returns immediately; the call is established in the background. If it
    /// cannot be established, the stream yields a single failure event.
    fn start(&self, request: GenerationRequest) -> Generation;

    /// Run a generation to completion and return the full text
    async fn generate(&self, request: GenerationRequest) -> Result<String, BackendError>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> bool;
}
