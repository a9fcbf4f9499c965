//! New-channel listeners.
//!
//! Upper layers (session managers, routing, metrics) register listeners to
//! react when a channel starts and when it is disposed. Dispatch runs every
//! listener in registration order and contains each listener's failure.

use crate::channel::{Channel, DisposeReason};
use crate::error::ChannelError;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

/// Result returned by listener callbacks.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Identifier handed out on listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Observer of channel lifecycle events.
pub trait ChannelListener<T>: Send + Sync {
    /// Called synchronously while a channel starts.
    ///
    /// # Errors
    ///
    /// Errors are logged and reported; they never abort the start.
    fn on_channel_started(&self, channel: &Arc<Channel<T>>) -> ListenerResult;

    /// Called after a started channel has been disposed.
    fn on_channel_disposed(&self, channel: &Arc<Channel<T>>, reason: DisposeReason) {
        let _ = (channel, reason);
    }
}

impl<T, F> ChannelListener<T> for F
where
    F: Fn(&Arc<Channel<T>>) -> ListenerResult + Send + Sync,
{
    fn on_channel_started(&self, channel: &Arc<Channel<T>>) -> ListenerResult {
        self(channel)
    }
}

/// Outcome of dispatching a start event.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Number of listeners invoked.
    pub invoked: usize,
    /// Failures, in listener order.
    pub errors: Vec<ChannelError>,
}

impl DispatchReport {
    /// Check if every listener succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

type Entry<T> = (ListenerId, Arc<dyn ChannelListener<T>>);

/// An ordered set of channel listeners.
pub struct ListenerSet<T> {
    listeners: RwLock<Vec<Entry<T>>>,
    next_id: AtomicU64,
}

impl<T: Send + 'static> ListenerSet<T> {
    /// Create an empty listener set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener, returning its identifier.
    pub fn register(&self, listener: Arc<dyn ChannelListener<T>>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        trace!(listener = %id, "Listener registered");
        id
    }

    /// Remove a listener.
    ///
    /// Returns `true` if the listener was registered.
    pub fn deregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        before != listeners.len()
    }

    /// Get the number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Check if no listeners are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Entry<T>> {
        self.listeners.read().clone()
    }

    /// Notify every listener that `channel` started.
    ///
    /// Listeners registered while dispatch is running are not invoked.
    pub fn dispatch_started(&self, channel: &Arc<Channel<T>>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for (id, listener) in self.snapshot() {
            report.invoked += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_channel_started(channel)));
            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            warn!(
                listener = %id,
                channel = %channel.key(),
                error = %message,
                "Channel listener failed"
            );
            report.errors.push(ChannelError::Listener {
                listener: id,
                key: channel.key().clone(),
                message,
            });
        }

        report
    }

    /// Notify every listener that `channel` was disposed.
    pub fn dispatch_disposed(&self, channel: &Arc<Channel<T>>, reason: DisposeReason) {
        for (id, listener) in self.snapshot() {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                listener.on_channel_disposed(channel, reason);
            }));
            if let Err(panic) = outcome {
                warn!(
                    listener = %id,
                    channel = %channel.key(),
                    error = %panic_message(panic.as_ref()),
                    "Channel listener panicked on dispose"
                );
            }
        }
    }
}

impl<T: Send + 'static> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.listeners.read().len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}
