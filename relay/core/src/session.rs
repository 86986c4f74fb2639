//! Session State
//!
//! Per-connection record of the generation currently running for that client.
//!
//! A [`Session`] is owned by exactly one connection task and is only mutated
//! by the router and the lifecycle loop running on that task, so it needs no
//! locking. It holds at most one [`ActiveGeneration`] at any time.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::info;

use crate::backend::{CancelReason, Generation, GenerationEvent, GenerationId};
use crate::outbound::DeliveryFence;

/// Unique identifier for a client connection
///
/// Assigned when the connection opens and stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a new unique connection ID
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Derived session phase
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// No generation running
    Idle,
    /// A generation is running
    Generating,
}

/// The generation currently owned by a session
#[derive(Debug)]
pub struct ActiveGeneration {
    generation: Generation,
    conversation_id: Option<String>,
    fragments_relayed: u64,
    started_at: Instant,
    fence: DeliveryFence,
}

impl ActiveGeneration {
    /// The generation ID
    #[must_use]
    pub fn id(&self) -> GenerationId {
        self.generation.id()
    }

    /// Conversation ID of the request that started it
    #[must_use]
    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Fragments forwarded to the client so far
    #[must_use]
    pub fn fragments_relayed(&self) -> u64 {
        self.fragments_relayed
    }

    /// Time since the generation started
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Fence guarding this generation's queued fragments
    #[must_use]
    pub fn fence(&self) -> &DeliveryFence {
        &self.fence
    }
}

/// Per-connection session state
#[derive(Debug)]
pub struct Session {
    connection_id: ConnectionId,
    active: Option<ActiveGeneration>,
    generations_started: u64,
    last_conversation_id: Option<String>,
}

impl Session {
    /// Create an idle session
    #[must_use]
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            active: None,
            generations_started: 0,
            last_conversation_id: None,
        }
    }

    /// The owning connection
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if self.active.is_some() {
            SessionPhase::Generating
        } else {
            SessionPhase::Idle
        }
    }

    /// Whether a generation is running
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.active.is_some()
    }

    /// The running generation, if any
    #[must_use]
    pub fn active(&self) -> Option<&ActiveGeneration> {
        self.active.as_ref()
    }

    /// ID of the running generation, if any
    #[must_use]
    pub fn active_generation_id(&self) -> Option<GenerationId> {
        self.active.as_ref().map(ActiveGeneration::id)
    }

    /// Generations started over the session's lifetime
    #[must_use]
    pub fn generations_started(&self) -> u64 {
        self.generations_started
    }

    /// Most recent conversation ID a client supplied
    #[must_use]
    pub fn last_conversation_id(&self) -> Option<&str> {
        self.last_conversation_id.as_deref()
    }

    /// Store a freshly started generation
    ///
    /// Any generation still stored is cancelled as superseded first, so the
    /// one-active-generation invariant holds even if a caller forgets to
    /// cancel.
    pub fn activate(&mut self, generation: Generation, conversation_id: Option<String>) {
        self.cancel_active(CancelReason::Superseded);

        if conversation_id.is_some() {
            self.last_conversation_id.clone_from(&conversation_id);
        }
        self.generations_started += 1;
        self.active = Some(ActiveGeneration {
            generation,
            conversation_id,
            fragments_relayed: 0,
            started_at: Instant::now(),
            fence: DeliveryFence::new(),
        });
    }

    /// Cancel and clear the running generation
    ///
    /// Returns the ID of the cancelled generation, or `None` if the session
    /// was idle. Once this returns, no event of that generation is observed
    /// again, and its fragments still queued for the client are discarded.
    pub fn cancel_active(&mut self, reason: CancelReason) -> Option<GenerationId> {
        let active = self.active.take()?;
        let id = active.id();
        active.fence.revoke();
        active.generation.handle.cancel(reason);
        info!(
            conn_id = %self.connection_id,
            generation_id = %id,
            %reason,
            fragments = active.fragments_relayed,
            "Active generation cancelled"
        );
        Some(id)
    }

    /// Fence for fragments of the running generation, if any
    #[must_use]
    pub fn delivery_fence(&self) -> Option<DeliveryFence> {
        self.active.as_ref().map(|active| active.fence.clone())
    }

    /// Clear the running generation after its stream ended
    ///
    /// Its queued fragments are still delivered.
    pub fn clear_active(&mut self) -> Option<ActiveGeneration> {
        self.active.take()
    }

    /// Count one fragment forwarded for the running generation
    pub fn record_fragment(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.fragments_relayed += 1;
        }
    }

    /// Wait for the next event of the running generation
    ///
    /// Never resolves while the session is idle, so it can sit in a
    /// `select!` next to the inbound stream.
    pub async fn next_event(&mut self) -> Option<GenerationEvent> {
        match self.active.as_mut() {
            Some(active) => active.generation.stream.next().await,
            None => std::future::pending().await,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_active(CancelReason::ConnectionClosed);
    }
}
