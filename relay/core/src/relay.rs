//! Relay
//!
//! Turns events of the active generation into messages for the client.
//! Fragments are forwarded one at a time in backend order, never batched.
//!
//! When a generation fails the client is told only if the call failed as a
//! whole: the backend could not be reached or rejected the request, or nothing
//! had been relayed yet. A transfer that breaks after fragments were delivered
//! is logged and ends in silence.

use tracing::{info, trace, warn};

use crate::backend::GenerationEvent;
use crate::messages::{OutboundMessage, API_REQUEST_ERROR};
use crate::session::Session;

/// Counters for one connection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Fragments forwarded to the client
    pub fragments_forwarded: u64,
    /// Generations that ran to completion
    pub completed: u64,
    /// Generations that ended with a backend error
    pub failed: u64,
    /// Error notifications sent to the client
    pub errors_reported: u64,
}

/// Forwards generation events to the client
#[derive(Debug, Default)]
pub struct Relay {
    stats: RelayStats,
}

impl Relay {
    /// Create a relay
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Apply one event of the session's active generation
    ///
    /// Returns the message to send to the client, if any. Terminal events
    /// clear the session.
    pub fn on_event(&mut self, session: &mut Session, event: GenerationEvent) -> Option<OutboundMessage> {
        let conn_id = session.connection_id();

        match event {
            GenerationEvent::Chunk(text) => {
                session.record_fragment();
                self.stats.fragments_forwarded += 1;
                trace!(%conn_id, len = text.len(), "Relaying fragment");
                Some(OutboundMessage::Fragment(text))
            }

            GenerationEvent::Completed => {
                if let Some(finished) = session.clear_active() {
                    self.stats.completed += 1;
                    info!(
                        %conn_id,
                        generation_id = %finished.id(),
                        fragments = finished.fragments_relayed(),
                        elapsed_ms = u64::try_from(finished.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "Generation completed"
                    );
                }
                None
            }

            GenerationEvent::Cancelled(reason) => {
                // Only reachable if the handle was cancelled outside the session
                if let Some(cancelled) = session.clear_active() {
                    info!(%conn_id, generation_id = %cancelled.id(), %reason, "Generation cancelled");
                }
                None
            }

            GenerationEvent::Failed(error) => {
                let failed = session.clear_active()?;
                self.stats.failed += 1;

                let notify = error.is_call_failure() || failed.fragments_relayed() == 0;
                warn!(
                    %conn_id,
                    generation_id = %failed.id(),
                    %error,
                    fragments = failed.fragments_relayed(),
                    notify,
                    "Generation failed"
                );

                if notify {
                    self.stats.errors_reported += 1;
                    Some(OutboundMessage::error(API_REQUEST_ERROR))
                } else {
                    None
                }
            }
        }
    }
}
