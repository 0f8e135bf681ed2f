//! Bounded FIFO of queued events.
//!
//! # Design
//! - flume bounded channel: multi-producer, FIFO, blocking with deadlines
//! - a second, message-less channel acts as the close signal; dropping its
//!   only sender disconnects it, which wakes every blocked `send`/`recv`
//!   through a `Selector`
//! - cheap to clone; the dedicated dispatch thread holds its own clone
//!
//! Timeouts follow one convention across the crate: `Duration::ZERO` is a
//! single non-blocking attempt and [`WAIT_FOREVER`] blocks without limit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::{Receiver, Selector, Sender};
use parking_lot::Mutex;
use thiserror::Error;

use crate::event::QueuedEvent;

/// Timeout value meaning "block until the operation can complete".
pub const WAIT_FOREVER: Duration = Duration::MAX;

/// Absolute point in time a blocking operation gives up at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Deadline {
    Never,
    At(Instant),
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        if timeout == WAIT_FOREVER {
            return Deadline::Never;
        }
        Instant::now()
            .checked_add(timeout)
            .map_or(Deadline::Never, Deadline::At)
    }

    pub fn is_expired(&self) -> bool {
        match self {
            Deadline::Never => false,
            Deadline::At(at) => Instant::now() >= *at,
        }
    }
}

/// Queue failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum QueueError {
    #[error("queue full")]
    Full,
    #[error("queue closed")]
    Closed,
}

/// Fixed-capacity event queue shared by publishers and the dispatcher.
#[derive(Clone)]
pub(crate) struct EventQueue {
    sender: Sender<QueuedEvent>,
    receiver: Receiver<QueuedEvent>,
    close_tx: Arc<Mutex<Option<Sender<()>>>>,
    close_rx: Receiver<()>,
    capacity: usize,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events (clamped to 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = flume::bounded(capacity);
        let (close_tx, close_rx) = flume::bounded(1);
        Self {
            sender,
            receiver,
            close_tx: Arc::new(Mutex::new(Some(close_tx))),
            close_rx,
            capacity,
        }
    }

    /// Enqueue `event`, waiting for free capacity until `deadline`.
    pub fn send(&self, event: QueuedEvent, deadline: Deadline) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let event = match self.sender.try_send(event) {
            Ok(()) => return Ok(()),
            Err(flume::TrySendError::Disconnected(_)) => return Err(QueueError::Closed),
            Err(flume::TrySendError::Full(event)) => event,
        };
        if deadline.is_expired() {
            return Err(QueueError::Full);
        }

        let selector: Selector<'_, Result<(), QueueError>> = Selector::new()
            .send(&self.sender, event, |res| res.map_err(|_| QueueError::Closed))
            .recv(&self.close_rx, |_| Err(QueueError::Closed));

        match deadline {
            Deadline::Never => selector.wait(),
            Deadline::At(at) => selector.wait_deadline(at).unwrap_or(Err(QueueError::Full)),
        }
    }

    /// Wait until `deadline` for the next event. `Ok(None)` means the wait timed out.
    pub fn recv(&self, deadline: Deadline) -> Result<Option<QueuedEvent>, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        match self.receiver.try_recv() {
            Ok(event) => return Ok(Some(event)),
            Err(flume::TryRecvError::Disconnected) => return Err(QueueError::Closed),
            Err(flume::TryRecvError::Empty) => {}
        }
        if deadline.is_expired() {
            return Ok(None);
        }

        let selector: Selector<'_, Result<Option<QueuedEvent>, QueueError>> = Selector::new()
            .recv(&self.receiver, |res| res.map(Some).map_err(|_| QueueError::Closed))
            .recv(&self.close_rx, |_| Err(QueueError::Closed));

        match deadline {
            Deadline::Never => selector.wait(),
            Deadline::At(at) => selector.wait_deadline(at).unwrap_or(Ok(None)),
        }
    }

    /// Take the next event without blocking.
    pub fn try_recv(&self) -> Option<QueuedEvent> {
        self.receiver.try_recv().ok()
    }

    /// Wake all waiters and refuse further traffic.
    pub fn close(&self) {
        self.close_tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.close_rx.is_disconnected()
    }

    /// Discard everything still queued; returns how many events were dropped.
    pub fn clear(&self) -> usize {
        self.receiver.drain().count()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
