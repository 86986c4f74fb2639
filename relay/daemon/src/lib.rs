//! Relay Daemon
//!
//! Hosts the relay core behind an axum server:
//!
//! - `/` upgrades to a WebSocket; each socket becomes one relay connection
//! - `GET /generate?text=...` runs a single non-streaming generation
//! - `GET /health` reports whether the backend is reachable

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod server;

pub use server::{RelayServer, ServerHandle};
