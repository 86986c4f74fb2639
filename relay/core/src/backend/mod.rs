//! Generation Backend Integration
//!
//! This module provides cancellable streaming access to a text-generation
//! backend through a common trait interface.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//! - **Scripted**: Plays back canned responses, for tests
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{BackendSettings, GenerationBackend, GenerationRequest, OllamaBackend};
//!
//! let backend = OllamaBackend::new(BackendSettings::default())?;
//! let mut generation = backend.start(GenerationRequest::new("Hello!"));
//! while let Some(event) = generation.stream.next().await {
//!     // Chunk, then Completed / Cancelled / Failed
//! }
//! ```

mod error;
mod generation;
pub mod ndjson;
mod ollama;
pub mod test_utils;
mod traits;

pub use error::BackendError;
pub use generation::{
    CancelReason, Generation, GenerationEvent, GenerationHandle, GenerationId, GenerationSink,
    GenerationStream, DEFAULT_EVENT_CAPACITY,
};
pub use ollama::OllamaBackend;
pub use traits::{BackendSettings, GenerationBackend, GenerationRequest};
