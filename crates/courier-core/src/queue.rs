//! Per-channel outbound message queue.
//!
//! Producers push from any thread; a single transport drain loop pops from
//! the head. Closing the queue discards whatever is still pending and wakes
//! every waiter so the drain loop can detach.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Notify;
use tracing::trace;

/// Queue capacity policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueCapacity {
    /// Grow without limit.
    #[default]
    Unbounded,
    /// Hold at most this many items; the oldest is dropped on overflow.
    Bounded(usize),
}

impl QueueCapacity {
    /// Map a numeric limit to a policy, treating `0` as unbounded.
    #[must_use]
    pub fn from_limit(limit: usize) -> Self {
        if limit == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(limit)
        }
    }

    /// Get the limit, if bounded.
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        match self {
            Self::Unbounded => None,
            Self::Bounded(n) => Some(*n),
        }
    }
}

/// Result of pushing onto a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Value was appended.
    Queued,
    /// Value was appended after dropping the oldest pending value.
    Overflowed,
    /// Queue is closed; value was dropped.
    Closed,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A FIFO buffer of pending outbound values.
pub struct MessageQueue<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
    capacity: QueueCapacity,
}

impl<T> MessageQueue<T> {
    /// Create a new queue.
    #[must_use]
    pub fn new(capacity: QueueCapacity) -> Self {
        let capacity = match capacity {
            QueueCapacity::Bounded(0) => QueueCapacity::Bounded(1),
            other => other,
        };
        let items = match capacity {
            QueueCapacity::Unbounded => VecDeque::new(),
            // Cap the eager allocation; large bounds grow on demand.
            QueueCapacity::Bounded(n) => VecDeque::with_capacity(n.min(1024)),
        };
        Self {
            inner: Mutex::new(QueueInner {
                items,
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Create an unbounded queue.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(QueueCapacity::Unbounded)
    }

    /// Append a value to the tail of the queue.
    pub fn push(&self, value: T) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Closed;
        }

        let mut outcome = PushOutcome::Queued;
        if let QueueCapacity::Bounded(limit) = self.capacity {
            if inner.items.len() >= limit {
                inner.items.pop_front();
                outcome = PushOutcome::Overflowed;
            }
        }
        inner.items.push_back(value);
        drop(inner);

        self.notify.notify_one();
        outcome
    }

    /// Remove the head of the queue without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.items.pop_front()
    }

    /// Wait for the next value.
    ///
    /// Returns `None` once the queue is closed. Cancel-safe: a value is only
    /// removed in the poll that returns it.
    pub async fn pop(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if inner.closed {
                    return None;
                }
                if let Some(value) = inner.items.pop_front() {
                    return Some(value);
                }
            }
            notified.await;
        }
    }

    /// Close the queue, discarding pending values.
    ///
    /// Returns the number of values discarded. Closing twice is a no-op.
    pub fn close(&self) -> usize {
        let discarded = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return 0;
            }
            inner.closed = true;
            std::mem::take(&mut inner.items)
        };

        self.notify.notify_waiters();
        // Covers a drain loop that checked the queue but has not yet awaited.
        self.notify.notify_one();

        let count = discarded.len();
        if count > 0 {
            trace!(discarded = count, "Queue closed with pending values");
        }
        count
    }

    /// Get the number of pending values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Check if no values are pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    /// Check if the queue has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Get the capacity policy.
    #[must_use]
    pub fn capacity(&self) -> QueueCapacity {
        self.capacity
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl<T> std::fmt::Debug for MessageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MessageQueue")
            .field("len", &inner.items.len())
            .field("closed", &inner.closed)
            .field("capacity", &self.capacity)
            .finish()
    }
}
