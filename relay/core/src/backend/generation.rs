//! Generation Handles
//!
//! A [`Generation`] is one in-flight streaming call to the backend. It is split
//! into two halves:
//!
//! - [`GenerationHandle`]: the control half, owned by the session. Cancels the call.
//! - [`GenerationStream`]: the data half, drained by the relay one event at a time.
//!
//! Backends drive the call through a [`GenerationSink`], which shares the
//! cancellation signal with both halves.
//!
//! ```text
//!   backend transfer task                 connection task
//!  ┌────────────────────┐   events   ┌──────────────────────┐
//!  │   GenerationSink   │──────────▶│   GenerationStream    │
//!  └─────────┬──────────┘            └──────────▲───────────┘
//!            │          CancellationToken       │
//!            └───────────────┬──────────────────┘
//!                  ┌─────────┴─────────┐
//!                  │  GenerationHandle │  cancel(reason)
//!                  └───────────────────┘
//! ```
//!
//! Once the handle is cancelled the stream reports [`GenerationEvent::Cancelled`]
//! before any chunk still sitting in the channel, so nothing produced by a
//! cancelled call is ever relayed.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::BackendError;

/// Default capacity of the channel between a transfer task and its stream
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Unique identifier for one generation call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GenerationId(Uuid);

impl GenerationId {
    /// Create a new random generation ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Why a generation was cancelled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The client sent the stop sentinel
    UserStop,
    /// The client sent a new request while this one was running
    Superseded,
    /// The client connection closed
    ConnectionClosed,
    /// The server is shutting down
    Shutdown,
    /// The handle was dropped without an explicit cancel
    Dropped,
}

impl CancelReason {
    /// Human-readable reason, used in logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserStop => "user-requested stop",
            Self::Superseded => "superseded by new request",
            Self::ConnectionClosed => "connection closed",
            Self::Shutdown => "server shutdown",
            Self::Dropped => "handle dropped",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event of a generation stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenerationEvent {
    /// An incremental text fragment
    Chunk(String),
    /// The backend finished the response
    Completed,
    /// The call was cancelled
    Cancelled(CancelReason),
    /// The call failed
    Failed(BackendError),
}

impl GenerationEvent {
    /// Whether this event ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk(_))
    }
}

/// Cancellation state shared by the handle, the stream and the sink
#[derive(Clone, Debug)]
pub(crate) struct CancelSignal {
    token: CancellationToken,
    reason: Arc<Mutex<Option<CancelReason>>>,
}

impl CancelSignal {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Cancel with a reason. Returns `false` if already cancelled.
    fn cancel(&self, reason: CancelReason) -> bool {
        let mut slot = self.reason.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        drop(slot);
        self.token.cancel();
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn reason(&self) -> Option<CancelReason> {
        *self.reason.lock()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// A started generation: control half plus data half
#[derive(Debug)]
pub struct Generation {
    /// Cancels the call
    pub handle: GenerationHandle,
    /// Yields the call's events in order
    pub stream: GenerationStream,
}

impl Generation {
    /// Create a generation and the sink a backend uses to feed it
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, GenerationSink) {
        let id = GenerationId::new();
        let signal = CancelSignal::new();
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let generation = Self {
            handle: GenerationHandle {
                id,
                signal: signal.clone(),
            },
            stream: GenerationStream {
                id,
                rx,
                signal: signal.clone(),
                finished: false,
            },
        };
        let sink = GenerationSink { id, tx, signal };

        (generation, sink)
    }

    /// The generation ID
    #[must_use]
    pub fn id(&self) -> GenerationId {
        self.handle.id
    }
}

/// Control half of a generation
///
/// Dropping the handle cancels the call, so a forgotten handle can never leave
/// a backend transfer running.
#[derive(Debug)]
pub struct GenerationHandle {
    id: GenerationId,
    signal: CancelSignal,
}

impl GenerationHandle {
    /// The generation ID
    #[must_use]
    pub fn id(&self) -> GenerationId {
        self.id
    }

    /// Cancel the call
    ///
    /// Idempotent: returns `true` only for the call that actually cancelled.
    /// Calling it after the stream ended is a no-op for the backend.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let cancelled = self.signal.cancel(reason);
        if cancelled {
            tracing::debug!(generation_id = %self.id, %reason, "Generation cancelled");
        }
        cancelled
    }

    /// Whether the call has been cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// The reason of the first cancel, if any
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.signal.reason()
    }
}

impl Drop for GenerationHandle {
    fn drop(&mut self) {
        self.signal.cancel(CancelReason::Dropped);
    }
}

/// Data half of a generation
#[derive(Debug)]
pub struct GenerationStream {
    id: GenerationId,
    rx: mpsc::Receiver<GenerationEvent>,
    signal: CancelSignal,
    finished: bool,
}

impl GenerationStream {
    /// The generation ID
    #[must_use]
    pub fn id(&self) -> GenerationId {
        self.id
    }

    /// Whether a terminal event has been yielded
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait for the next event
    ///
    /// Returns `None` after a terminal event has been yielded. Cancellation
    /// takes priority over buffered chunks.
    pub async fn next(&mut self) -> Option<GenerationEvent> {
        if self.finished {
            return None;
        }

        let event = tokio::select! {
            biased;
            () = self.signal.token.cancelled() => {
                GenerationEvent::Cancelled(self.signal.reason().unwrap_or(CancelReason::Dropped))
            }
            received = self.rx.recv() => received.unwrap_or_else(|| {
                GenerationEvent::Failed(BackendError::Stream(
                    "transfer ended without a terminal event".to_string(),
                ))
            }),
        };

        if event.is_terminal() {
            self.finished = true;
            self.rx.close();
        }
        Some(event)
    }
}

/// Producer side of a generation, held by the backend transfer task
#[derive(Debug)]
pub struct GenerationSink {
    id: GenerationId,
    tx: mpsc::Sender<GenerationEvent>,
    signal: CancelSignal,
}

impl GenerationSink {
    /// The generation ID
    #[must_use]
    pub fn id(&self) -> GenerationId {
        self.id
    }

    /// Whether the consumer cancelled the call
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Resolves once the call is cancelled
    pub async fn cancelled(&self) {
        self.signal.token.cancelled().await;
    }

    /// Deliver an event
    ///
    /// Returns `false` if the call was cancelled or the stream was dropped;
    /// the transfer should stop and release its resources.
    pub async fn send(&self, event: GenerationEvent) -> bool {
        tokio::select! {
            biased;
            () = self.signal.token.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    pub(crate) fn signal(&self) -> &CancelSignal {
        &self.signal
    }
}
