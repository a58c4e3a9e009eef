//! Outbound Message Queue
//!
//! Bounded FIFO between callers of `send` and the session writing to the
//! transport. Pushing never blocks: when the queue is full the new message
//! is handed back to the caller to be counted as dropped.
//!
//! The receiving half is parked in the outbox while no session runs and
//! borrowed by the supervisor while one does, so messages sent offline are
//! drained in order on the next open.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::application::ports::OutboundMessage;

/// Default queue capacity.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 100;

/// A queued outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    /// The message.
    pub message: OutboundMessage,
    /// When it was queued.
    pub enqueued_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Wrap a message.
    #[must_use]
    pub const fn new(message: OutboundMessage, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            message,
            enqueued_at,
        }
    }

    /// Action label of the message.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        self.message.action()
    }
}

/// Receiving half handed to the session.
pub type OutboxReceiver = mpsc::Receiver<OutboxMessage>;

/// Bounded outbound queue.
#[derive(Debug)]
pub struct Outbox {
    capacity: usize,
    tx: RwLock<mpsc::Sender<OutboxMessage>>,
    rx: Mutex<Option<OutboxReceiver>>,
}

impl Outbox {
    /// Create an empty outbox holding at most `capacity` messages.
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Arc::new(Self {
            capacity,
            tx: RwLock::new(tx),
            rx: Mutex::new(Some(rx)),
        })
    }

    /// Queue a message. A full queue returns the message.
    ///
    /// # Errors
    ///
    /// Returns the rejected message when the queue is full.
    pub fn push(&self, message: OutboxMessage) -> Result<(), OutboxMessage> {
        match self.tx.read().try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message) | TrySendError::Closed(message)) => Err(message),
        }
    }

    /// Borrow the receiving half for a session.
    ///
    /// If a previous holder never returned it, the queue is replaced with a
    /// fresh one; anything still in flight is lost.
    pub fn take_receiver(&self) -> OutboxReceiver {
        if let Some(rx) = self.rx.lock().take() {
            return rx;
        }
        tracing::warn!("Outbox receiver was not returned, starting a new queue");
        let (tx, rx) = mpsc::channel(self.capacity);
        *self.tx.write() = tx;
        rx
    }

    /// Return the receiving half after a session.
    pub fn restore_receiver(&self, rx: OutboxReceiver) {
        *self.rx.lock() = Some(rx);
    }

    /// Discard queued messages. Only effective while no session holds the
    /// receiver. Returns how many were discarded.
    pub fn clear(&self) -> usize {
        let mut slot = self.rx.lock();
        let Some(rx) = slot.as_mut() else {
            return 0;
        };
        let mut cleared = 0;
        while rx.try_recv().is_ok() {
            cleared += 1;
        }
        cleared
    }

    /// Messages currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        let tx = self.tx.read();
        tx.max_capacity() - tx.capacity()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued messages.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(n: i64) -> OutboxMessage {
        OutboxMessage::new(OutboundMessage::Ping { timestamp: n }, Utc::now())
    }

    #[test]
    fn push_until_full_then_reject_newest() {
        let outbox = Outbox::new(3);

        for n in 0..3 {
            assert!(outbox.push(ping(n)).is_ok());
        }
        let rejected = outbox.push(ping(99)).unwrap_err();

        assert_eq!(rejected.message, OutboundMessage::Ping { timestamp: 99 });
        assert_eq!(outbox.len(), 3);
    }

    #[test]
    fn drains_in_fifo_order() {
        let outbox = Outbox::new(10);
        for n in 0..5 {
            outbox.push(ping(n)).unwrap();
        }

        let mut rx = outbox.take_receiver();
        let drained: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|m| m.message)
            .collect();

        assert_eq!(
            drained,
            (0..5)
                .map(|n| OutboundMessage::Ping { timestamp: n })
                .collect::<Vec<_>>()
        );
        outbox.restore_receiver(rx);
        assert!(outbox.is_empty());
    }

    #[test]
    fn clear_discards_everything() {
        let outbox = Outbox::new(10);
        outbox.push(ping(1)).unwrap();
        outbox.push(ping(2)).unwrap();

        assert_eq!(outbox.clear(), 2);
        assert!(outbox.is_empty());
    }

    #[test]
    fn clear_is_noop_while_receiver_is_borrowed() {
        let outbox = Outbox::new(10);
        outbox.push(ping(1)).unwrap();
        let _rx = outbox.take_receiver();
        assert_eq!(outbox.clear(), 0);
    }

    #[test]
    fn lost_receiver_is_replaced() {
        let outbox = Outbox::new(2);
        drop(outbox.take_receiver());

        let mut rx = outbox.take_receiver();
        outbox.push(ping(7)).unwrap();
        assert_eq!(rx.try_recv().unwrap().message, OutboundMessage::Ping { timestamp: 7 });
    }

    #[test]
    fn zero_capacity_is_bumped_to_one() {
        let outbox = Outbox::new(0);
        assert_eq!(outbox.capacity(), 1);
        assert!(outbox.push(ping(1)).is_ok());
        assert!(outbox.push(ping(2)).is_err());
    }
}
