//! Relay Core - Cancellable Streaming Between Chat Clients and Ollama
//!
//! This crate holds everything the relay does per connection, independent of
//! the transport that carries client frames. The daemon crate plugs a
//! WebSocket into it; tests plug in plain channels.
//!
//! # Architecture
//!
//! ```text
//!   client frames                                     relay messages
//!  ──────────────▶┌─────────────────────────────────┐──────────────▶
//!                 │        Connection (one task)    │
//!                 │                                 │
//!                 │   Router ──▶ Session ◀── Relay  │
//!                 │     │        (≤ 1 active)  ▲    │
//!                 └─────┼──────────────────────┼────┘
//!                       │ start / cancel       │ events
//!                 ┌─────▼──────────────────────┴────┐
//!                 │   GenerationBackend (Ollama)    │
//!                 └─────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`Connection`]: Runs one client connection from open to close
//! - [`Router`]: Applies generation and stop requests to a session
//! - [`Relay`]: Forwards generation events to the client
//! - [`Session`]: Per-connection state holding the active generation
//! - [`OllamaBackend`]: Streaming client for Ollama `/api/generate`
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{BackendSettings, Connection, ConnectionId, OllamaBackend, Router};
//! use tokio_util::sync::CancellationToken;
//!
//! let backend = Arc::new(OllamaBackend::new(BackendSettings::default())?);
//! let router = Router::new(backend);
//! let (out_tx, mut out_rx) = relay_core::outbound::channel(64);
//!
//! let connection = Connection::new(ConnectionId::new(), router);
//! tokio::spawn(connection.run(inbound_frames, out_tx, CancellationToken::new()));
//!
//! while let Some(message) = out_rx.recv().await {
//!     send_to_client(message.to_frame()).await;
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Generation backend abstraction, Ollama client, scripted test backend
//! - [`config`]: TOML / environment / CLI configuration
//! - [`connection`]: Connection lifecycle loop
//! - [`events`]: Messages from clients to the relay
//! - [`messages`]: Messages from the relay to clients
//! - [`outbound`]: Per-connection outbound queue with stale-fragment discard
//! - [`relay`]: Event forwarding and error notification
//! - [`router`]: Generation / stop request handling and preemption
//! - [`session`]: Per-connection session state

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod connection;
pub mod events;
pub mod messages;
pub mod outbound;
pub mod relay;
pub mod router;
pub mod session;

// Re-exports for convenience
pub use backend::{
    BackendError, BackendSettings, CancelReason, Generation, GenerationBackend, GenerationEvent,
    GenerationId, GenerationRequest, OllamaBackend,
};
pub use connection::{CloseReason, Connection, ConnectionSummary};
pub use events::{ClientCommand, InboundError, InboundFrame, STOP_SENTINEL};
pub use messages::{OutboundMessage, StopAck, API_REQUEST_ERROR};
pub use outbound::{DeliveryFence, OutboundClosed, OutboundReceiver, OutboundSender};
pub use relay::{Relay, RelayStats};
pub use router::Router;
pub use session::{ActiveGeneration, ConnectionId, Session, SessionPhase};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, RelayConfig, ServerSettings,
};
