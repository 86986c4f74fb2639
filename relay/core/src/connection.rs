//! Connection Lifecycle
//!
//! Drives one client connection from open to close. A single task owns the
//! connection's [`Session`] and multiplexes three sources with a biased
//! `select!`:
//!
//! 1. the server-wide shutdown signal,
//! 2. inbound client frames (handed to the [`Router`]),
//! 3. events of the active generation (handed to the [`Relay`]).
//!
//! Because everything that touches the session runs on this task, a stop or a
//! preemption always lands between two relayed fragments, never in the middle
//! of one, and a cancelled generation's stream is dropped before the next
//! loop iteration can poll it.
//!
//! Fragments are queued behind their generation's delivery fence, so a stop or
//! a preemption also discards fragments the client has not read yet.
//!
//! On close, for whatever reason, the active generation is cancelled.

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::CancelReason;
use crate::events::InboundFrame;
use crate::messages::OutboundMessage;
use crate::outbound::{DeliveryFence, OutboundSender};
use crate::relay::{Relay, RelayStats};
use crate::router::Router;
use crate::session::{ConnectionId, Session};

/// Why a connection loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the connection or the transport failed
    ClientClosed,
    /// The outbound side went away while a message was being sent
    OutboundClosed,
    /// The server is shutting down
    Shutdown,
}

impl CloseReason {
    /// Cancel reason for a generation still running at close
    #[must_use]
    pub fn cancel_reason(self) -> CancelReason {
        match self {
            Self::ClientClosed | Self::OutboundClosed => CancelReason::ConnectionClosed,
            Self::Shutdown => CancelReason::Shutdown,
        }
    }
}

/// What happened over a connection's lifetime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// The connection
    pub connection_id: ConnectionId,
    /// Why it ended
    pub close_reason: CloseReason,
    /// Frames received from the client
    pub frames_received: u64,
    /// Generations started
    pub generations_started: u64,
    /// Whether a generation was still running at close
    pub cancelled_on_close: bool,
    /// Relay counters
    pub relay: RelayStats,
}

/// One client connection
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    router: Router,
}

impl Connection {
    /// Create a connection that routes through `router`
    #[must_use]
    pub fn new(id: ConnectionId, router: Router) -> Self {
        Self { id, router }
    }

    /// The connection ID
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Run until the client closes, the outbound side fails, or `shutdown`
    /// fires
    ///
    /// `inbound` yields client frames and ends when the transport closes.
    /// Replies and fragments are sent on `outbound`; a full queue applies
    /// backpressure to this loop.
    pub async fn run<S>(
        self,
        inbound: S,
        outbound: OutboundSender,
        shutdown: CancellationToken,
    ) -> ConnectionSummary
    where
        S: Stream<Item = InboundFrame>,
    {
        let conn_id = self.id;
        let mut session = Session::new(conn_id);
        let mut relay = Relay::new();
        let mut frames_received = 0_u64;

        tokio::pin!(inbound);
        info!(%conn_id, backend = self.router.backend().name(), "Connection opened");

        let close_reason = loop {
            let reply: Option<(OutboundMessage, Option<DeliveryFence>)> = tokio::select! {
                biased;

                () = shutdown.cancelled() => break CloseReason::Shutdown,

                frame = inbound.next() => match frame {
                    Some(frame) => {
                        frames_received += 1;
                        self.router
                            .handle_frame(&mut session, &frame)
                            .map(|message| (message, None))
                    }
                    None => break CloseReason::ClientClosed,
                },

                Some(event) = session.next_event() => {
                    let fence = session.delivery_fence();
                    relay.on_event(&mut session, event).map(|message| {
                        let fence = fence.filter(|_| message.is_fragment());
                        (message, fence)
                    })
                }
            };

            if let Some((message, fence)) = reply {
                let sent = match fence {
                    Some(fence) => outbound.send_fenced(message, fence).await,
                    None => outbound.send(message).await,
                };
                if sent.is_err() {
                    debug!(%conn_id, "Outbound channel closed");
                    break CloseReason::OutboundClosed;
                }
            }
        };

        let cancelled_on_close = session
            .cancel_active(close_reason.cancel_reason())
            .is_some();

        let summary = ConnectionSummary {
            connection_id: conn_id,
            close_reason,
            frames_received,
            generations_started: session.generations_started(),
            cancelled_on_close,
            relay: relay.stats(),
        };

        info!(
            %conn_id,
            reason = ?close_reason,
            frames = frames_received,
            generations = summary.generations_started,
            fragments = summary.relay.fragments_forwarded,
            cancelled_on_close,
            "Connection closed"
        );
        summary
    }
}
