//! Request Router
//!
//! Interprets each inbound frame as a generation request or a stop request and
//! applies it to the connection's [`Session`].
//!
//! # State Machine
//!
//! ```text
//!              generation request
//!   ┌──────┐ ───────────────────▶ ┌────────────┐ ──┐ generation request
//!   │ Idle │                      │ Generating │   │ (cancel as superseded,
//!   └──────┘ ◀─────────────────── └────────────┘ ◀─┘  start the new one)
//!       ▲     STOP / completed /
//!       │     failed
//!       └── STOP while idle: "nothing-to-stop"
//! ```
//!
//! Preemption is silent: the client only sees the new stream's output. A
//! stop is always acknowledged.

use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{CancelReason, GenerationBackend, GenerationRequest};
use crate::events::{ClientCommand, InboundFrame};
use crate::messages::{OutboundMessage, StopAck};
use crate::session::Session;

/// Applies client messages to a session
#[derive(Clone)]
pub struct Router {
    backend: Arc<dyn GenerationBackend>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Router {
    /// Create a router driving the given backend
    #[must_use]
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }

    /// The backend this router drives
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn GenerationBackend> {
        &self.backend
    }

    /// Handle one inbound frame
    ///
    /// Returns the immediate reply, if the frame calls for one. Fragments of a
    /// started generation arrive later through [`Session::next_event`].
    pub fn handle_frame(&self, session: &mut Session, frame: &InboundFrame) -> Option<OutboundMessage> {
        match ClientCommand::parse(frame) {
            Ok(ClientCommand::Stop) => Some(OutboundMessage::Ack(self.stop(session))),
            Ok(ClientCommand::Generate(request)) => {
                self.generate(session, request);
                None
            }
            Err(e) => {
                debug!(conn_id = %session.connection_id(), error = %e, "Rejected client message");
                Some(OutboundMessage::error(e.client_message()))
            }
        }
    }

    /// Stop the running generation, if any
    pub fn stop(&self, session: &mut Session) -> StopAck {
        match session.cancel_active(CancelReason::UserStop) {
            Some(_) => StopAck::Stopped,
            None => {
                debug!(conn_id = %session.connection_id(), "Stop requested while idle");
                StopAck::NothingToStop
            }
        }
    }

    /// Start a generation, preempting the running one
    pub fn generate(&self, session: &mut Session, request: GenerationRequest) {
        // Cancel before start so the backend never sees two live calls
        session.cancel_active(CancelReason::Superseded);

        let conversation_id = request.conversation_id.clone();
        let prompt_len = request.prompt.len();
        let generation = self.backend.start(request);

        info!(
            conn_id = %session.connection_id(),
            generation_id = %generation.id(),
            backend = self.backend.name(),
            conversation_id = ?conversation_id,
            prompt_len,
            "Generation started"
        );
        session.activate(generation, conversation_id);
    }
}
