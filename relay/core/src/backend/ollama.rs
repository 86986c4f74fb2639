//! Ollama Backend Implementation
//!
//! Generation backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/generate` - Generate completions (streaming or batch)
//! - `/api/tags` - List available models (used as a health check)
//!
//! Streaming responses are newline-delimited JSON. Each line may carry a
//! `response` fragment, a `done` marker, or an `error`.

use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, trace, warn};

use super::error::BackendError;
use super::generation::{Generation, GenerationEvent, GenerationSink, DEFAULT_EVENT_CAPACITY};
use super::ndjson::{GenerateChunk, MalformedLine, NdjsonDecoder};
use super::traits::{BackendSettings, GenerationBackend, GenerationRequest};

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Connection and sampling settings
    settings: BackendSettings,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(settings: BackendSettings) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            settings,
            http_client,
        })
    }

    /// The settings this backend was built with
    #[must_use]
    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }

    /// Get generate endpoint URL
    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.settings.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.settings.base_url())
    }

    /// Build the JSON body for a generate call
    fn request_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.settings.model,
            "prompt": request.prompt,
            "stream": stream,
            "options": {
                "temperature": self.settings.temperature,
            },
        })
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    fn start(&self, request: GenerationRequest) -> Generation {
        let (generation, sink) = Generation::channel(DEFAULT_EVENT_CAPACITY);

        let http_request = self
            .http_client
            .post(self.generate_url())
            .json(&self.request_body(&request, true));

        debug!(
            generation_id = %sink.id(),
            model = %self.settings.model,
            conversation_id = ?request.conversation_id,
            "Starting streaming generation"
        );

        tokio::spawn(run_transfer(http_request, sink));
        generation
    }

    async fn generate(&self, request: GenerationRequest) -> Result<String, BackendError> {
        let response = self
            .http_client
            .post(self.generate_url())
            .timeout(self.settings.request_timeout)
            .json(&self.request_body(&request, false))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let data: GenerateChunk = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        if let Some(error) = data.error {
            return Err(BackendError::Backend(error));
        }
        Ok(data.response.unwrap_or_default())
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|response| response.status().is_success())
    }
}

/// Drive one streaming call until it ends or is cancelled
///
/// Returning drops the response body, which releases the connection.
async fn run_transfer(http_request: reqwest::RequestBuilder, sink: GenerationSink) {
    let generation_id = sink.id();

    let sent = tokio::select! {
        biased;
        () = sink.cancelled() => {
            debug!(%generation_id, "Cancelled before the backend answered");
            return;
        }
        sent = http_request.send() => sent,
    };

    let response = match sent {
        Ok(response) => response,
        Err(e) => {
            warn!(%generation_id, error = %e, "Backend call failed");
            sink.send(GenerationEvent::Failed(BackendError::Unavailable(e.to_string())))
                .await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(%generation_id, %status, "Backend rejected generation");
        sink.send(GenerationEvent::Failed(BackendError::Rejected {
            status: status.as_u16(),
            body,
        }))
        .await;
        return;
    }

    let mut body = response.bytes_stream();
    let mut decoder = NdjsonDecoder::new();
    let mut skipped = 0_u32;

    loop {
        let next = tokio::select! {
            biased;
            () = sink.cancelled() => {
                debug!(%generation_id, "Transfer cancelled mid-stream");
                return;
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                decoder.push(&bytes);
                while let Some(line) = decoder.next_line() {
                    if forward_line(&sink, line, &mut skipped).await.is_break() {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                warn!(%generation_id, error = %e, "Backend stream broke");
                sink.send(GenerationEvent::Failed(BackendError::Stream(e.to_string())))
                    .await;
                return;
            }
            None => break,
        }
    }

    if let Some(line) = decoder.finish() {
        if forward_line(&sink, line, &mut skipped).await.is_break() {
            return;
        }
    }

    // Closed without a done marker
    debug!(%generation_id, skipped, "Backend stream closed");
    sink.send(GenerationEvent::Completed).await;
}

/// Forward one decoded line; `Break` means the transfer is over
async fn forward_line(
    sink: &GenerationSink,
    line: Result<GenerateChunk, MalformedLine>,
    skipped: &mut u32,
) -> ControlFlow<()> {
    let chunk = match line {
        Ok(chunk) => chunk,
        Err(malformed) => {
            *skipped += 1;
            warn!(
                generation_id = %sink.id(),
                line = %malformed.line,
                error = %malformed.error,
                "Skipping malformed backend chunk"
            );
            return ControlFlow::Continue(());
        }
    };

    if let Some(error) = chunk.error {
        warn!(generation_id = %sink.id(), %error, "Backend reported an error");
        sink.send(GenerationEvent::Failed(BackendError::Backend(error)))
            .await;
        return ControlFlow::Break(());
    }

    if let Some(text) = chunk.fragment() {
        trace!(generation_id = %sink.id(), len = text.len(), "Fragment");
        if !sink.send(GenerationEvent::Chunk(text.to_string())).await {
            return ControlFlow::Break(());
        }
    }

    if chunk.done {
        debug!(generation_id = %sink.id(), skipped = *skipped, "Backend stream done");
        sink.send(GenerationEvent::Completed).await;
        return ControlFlow::Break(());
    }

    ControlFlow::Continue(())
}
