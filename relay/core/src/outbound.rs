//! Outbound Queue
//!
//! Bounded queue between a connection task and the writer that puts messages
//! on the client's transport.
//!
//! Fragments are queued together with the [`DeliveryFence`] of the generation
//! that produced them. When that generation is stopped or superseded the
//! session revokes the fence, and the receiver discards every fragment of it
//! still sitting in the queue. A slow client therefore never sees output of a
//! generation after the cancel was processed.
//!
//! ```text
//!   Connection ──send_fenced(fragment, fence)──▶ [ queue ] ──recv()──▶ writer
//!       │                                                    │
//!       └── Session::cancel_active ── fence.revoke() ────────┘ (skip)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::messages::OutboundMessage;

/// Revocation flag shared by one generation's queued fragments
#[derive(Clone, Debug, Default)]
pub struct DeliveryFence(Arc<AtomicBool>);

impl DeliveryFence {
    /// Create an open fence
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discard everything queued behind this fence from now on
    pub fn revoke(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the fence was revoked
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The receiving side of the queue is gone
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("outbound queue closed")]
pub struct OutboundClosed;

#[derive(Debug)]
struct Queued {
    message: OutboundMessage,
    fence: Option<DeliveryFence>,
}

/// Create a bounded outbound queue
#[must_use]
pub fn channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutboundSender { tx },
        OutboundReceiver {
            rx,
            discarded: 0,
        },
    )
}

/// Producer half, held by the connection task
#[derive(Clone, Debug)]
pub struct OutboundSender {
    tx: mpsc::Sender<Queued>,
}

impl OutboundSender {
    /// Queue a message that is always delivered
    ///
    /// Waits for capacity when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`OutboundClosed`] if the receiver was dropped.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), OutboundClosed> {
        self.push(Queued {
            message,
            fence: None,
        })
        .await
    }

    /// Queue a message that is discarded if `fence` is revoked before it is
    /// received
    ///
    /// # Errors
    ///
    /// Returns [`OutboundClosed`] if the receiver was dropped.
    pub async fn send_fenced(
        &self,
        message: OutboundMessage,
        fence: DeliveryFence,
    ) -> Result<(), OutboundClosed> {
        self.push(Queued {
            message,
            fence: Some(fence),
        })
        .await
    }

    async fn push(&self, queued: Queued) -> Result<(), OutboundClosed> {
        self.tx.send(queued).await.map_err(|_| OutboundClosed)
    }
}

/// Consumer half, drained by the transport writer
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<Queued>,
    discarded: u64,
}

impl OutboundReceiver {
    /// Next message to deliver, skipping revoked fragments
    ///
    /// Returns `None` once every sender is gone and the queue is empty.
    pub async fn recv(&mut self) -> Option<OutboundMessage> {
        loop {
            let queued = self.rx.recv().await?;
            if queued.fence.as_ref().is_some_and(DeliveryFence::is_revoked) {
                self.discarded += 1;
                trace!(discarded = self.discarded, "Discarding fragment of a cancelled generation");
                continue;
            }
            return Some(queued.message);
        }
    }

    /// Messages waiting in the queue, including ones that will be discarded
    #[must_use]
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Fragments discarded so far
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::StopAck;
    use pretty_assertions::assert_eq;

    fn fragment(text: &str) -> OutboundMessage {
        OutboundMessage::Fragment(text.to_string())
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let (tx, mut rx) = channel(8);
        let fence = DeliveryFence::new();

        tx.send_fenced(fragment("a"), fence.clone()).await.unwrap();
        tx.send_fenced(fragment("b"), fence).await.unwrap();
        tx.send(OutboundMessage::Ack(StopAck::NothingToStop))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(fragment("a")));
        assert_eq!(rx.recv().await, Some(fragment("b")));
        assert_eq!(
            rx.recv().await,
            Some(OutboundMessage::Ack(StopAck::NothingToStop))
        );
        assert_eq!(rx.recv().await, None);
        assert_eq!(rx.discarded(), 0);
    }

    #[tokio::test]
    async fn test_revoked_fragments_are_discarded() {
        let (tx, mut rx) = channel(8);
        let stale = DeliveryFence::new();
        let current = DeliveryFence::new();

        tx.send_fenced(fragment("a0"), stale.clone()).await.unwrap();
        tx.send_fenced(fragment("a1"), stale.clone()).await.unwrap();
        stale.revoke();
        tx.send_fenced(fragment("b0"), current).await.unwrap();
        assert_eq!(rx.queued(), 3);

        assert_eq!(rx.recv().await, Some(fragment("b0")));
        assert_eq!(rx.discarded(), 2);
    }

    #[tokio::test]
    async fn test_unfenced_messages_survive_revocation() {
        let (tx, mut rx) = channel(8);
        let fence = DeliveryFence::new();

        tx.send_fenced(fragment("a0"), fence.clone()).await.unwrap();
        tx.send(OutboundMessage::Ack(StopAck::Stopped)).await.unwrap();
        fence.revoke();

        assert_eq!(rx.recv().await, Some(OutboundMessage::Ack(StopAck::Stopped)));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (tx, rx) = channel(1);
        drop(rx);

        assert_eq!(tx.send(fragment("x")).await, Err(OutboundClosed));
    }
}
