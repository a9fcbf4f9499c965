//! Push channel abstraction for Courier.
//!
//! A channel is a long-lived link from the server to one authenticated client
//! endpoint, addressed by `(auth_id, path)`. It owns an outbound queue that a
//! transport drains onto the wire, and tracks client liveness through
//! heartbeats.

use crate::error::ChannelError;
use crate::listener::{DispatchReport, ListenerSet};
use crate::queue::{MessageQueue, PushOutcome, QueueCapacity};
use crate::registry::RegistryShared;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Registry key of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelKey {
    /// Authenticated principal owning the channel.
    pub auth_id: String,
    /// Logical endpoint the channel serves.
    pub path: String,
}

impl ChannelKey {
    /// Create a new key.
    #[must_use]
    pub fn new(auth_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            auth_id: auth_id.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.auth_id, self.path)
    }
}

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ChannelState {
    /// Constructed, not yet started.
    Created = 0,
    /// Started and registered.
    Started = 1,
    /// Terminal.
    Disposed = 2,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Created,
            1 => ChannelState::Started,
            _ => ChannelState::Disposed,
        }
    }

    /// Get the state name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Created => "created",
            ChannelState::Started => "started",
            ChannelState::Disposed => "disposed",
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a channel was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisposeReason {
    /// Explicit dispose by application code.
    Requested,
    /// No heartbeat within the liveness timeout.
    HeartbeatTimeout,
    /// The transport failed to deliver a message.
    TransportFailure,
    /// The client closed its side of the transport.
    ClientClosed,
    /// Superseded by a newer channel for the same key.
    Replaced,
    /// Process shutdown.
    Shutdown,
}

impl DisposeReason {
    /// Get the reason as a metric-friendly label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DisposeReason::Requested => "requested",
            DisposeReason::HeartbeatTimeout => "heartbeat_timeout",
            DisposeReason::TransportFailure => "transport_failure",
            DisposeReason::ClientClosed => "client_closed",
            DisposeReason::Replaced => "replaced",
            DisposeReason::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for DisposeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-channel construction options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelOptions {
    /// Outbound queue capacity.
    pub queue_capacity: QueueCapacity,
    /// Liveness timeout overriding the monitor's default.
    pub heartbeat_timeout: Option<Duration>,
}

/// Serializable point-in-time description of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Authenticated principal.
    pub auth_id: String,
    /// Logical endpoint.
    pub path: String,
    /// Lifecycle state.
    pub state: ChannelState,
    /// Creation time (ms since the Unix epoch).
    pub created_at_ms: u64,
    /// Last heartbeat time (ms since the Unix epoch).
    pub last_heartbeat_ms: u64,
    /// Number of values awaiting delivery.
    pub queued: usize,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A server-to-client push channel.
pub struct Channel<T> {
    key: ChannelKey,
    /// Monotonic creation instant.
    created: Instant,
    /// Wall-clock creation time, for reporting.
    created_at_ms: u64,
    /// Nanoseconds from `created` to the last heartbeat. Only ever grows.
    heartbeat_offset_ns: AtomicU64,
    state: AtomicU8,
    disposal_reason: OnceLock<DisposeReason>,
    heartbeat_timeout: Option<Duration>,
    queue: MessageQueue<T>,
    registry: OnceLock<Weak<RegistryShared<T>>>,
}

impl<T: Send + 'static> Channel<T> {
    /// Create a new channel with an unbounded queue.
    #[must_use]
    pub fn new(auth_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self::with_options(auth_id, path, ChannelOptions::default())
    }

    /// Create a new channel with specific options.
    #[must_use]
    pub fn with_options(
        auth_id: impl Into<String>,
        path: impl Into<String>,
        options: ChannelOptions,
    ) -> Self {
        Self::from_key(ChannelKey::new(auth_id, path), options)
    }

    /// Create a new channel for a key.
    #[must_use]
    pub fn from_key(key: ChannelKey, options: ChannelOptions) -> Self {
        Self {
            key,
            created: Instant::now(),
            created_at_ms: unix_millis(),
            heartbeat_offset_ns: AtomicU64::new(0),
            state: AtomicU8::new(ChannelState::Created as u8),
            disposal_reason: OnceLock::new(),
            heartbeat_timeout: options.heartbeat_timeout,
            queue: MessageQueue::new(options.queue_capacity),
            registry: OnceLock::new(),
        }
    }

    /// Get the registry key.
    #[must_use]
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Get the owning principal.
    #[must_use]
    pub fn auth_id(&self) -> &str {
        &self.key.auth_id
    }

    /// Get the logical endpoint.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.key.path
    }

    /// Get the creation instant.
    #[must_use]
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Get the instant of the last heartbeat (creation if none yet).
    #[must_use]
    pub fn last_heartbeat(&self) -> Instant {
        self.created + Duration::from_nanos(self.heartbeat_offset_ns.load(Ordering::Acquire))
    }

    /// Get the creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Get the last heartbeat time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn last_heartbeat_ms(&self) -> u64 {
        self.created_at_ms + self.heartbeat_offset_ns.load(Ordering::Acquire) / 1_000_000
    }

    /// Get the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check if the channel has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.state() == ChannelState::Disposed
    }

    /// Get the reason the channel was disposed, if it has been.
    #[must_use]
    pub fn disposal_reason(&self) -> Option<DisposeReason> {
        self.disposal_reason.get().copied()
    }

    /// Get the per-channel liveness timeout override.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout
    }

    /// Get the number of values awaiting delivery.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Get a serializable snapshot of this channel.
    #[must_use]
    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            auth_id: self.key.auth_id.clone(),
            path: self.key.path.clone(),
            state: self.state(),
            created_at_ms: self.created_at_ms,
            last_heartbeat_ms: self.last_heartbeat_ms(),
            queued: self.queue.len(),
        }
    }

    /// Start the channel, notifying every listener in `listeners`.
    ///
    /// Listeners run synchronously in registration order. Their failures are
    /// contained and reported in the returned [`DispatchReport`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidState`] if the channel is not `Created`.
    pub fn start(self: &Arc<Self>, listeners: &ListenerSet<T>) -> Result<DispatchReport, ChannelError> {
        self.state
            .compare_exchange(
                ChannelState::Created as u8,
                ChannelState::Started as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|actual| ChannelError::InvalidState {
                key: self.key.clone(),
                actual: ChannelState::from_u8(actual),
                expected: ChannelState::Created,
            })?;

        debug!(auth_id = %self.key.auth_id, path = %self.key.path, "Channel started");

        Ok(listeners.dispatch_started(self))
    }

    /// Queue a value for delivery.
    ///
    /// Callable from any thread. Values queued after disposal are dropped.
    pub fn queue(&self, value: T) {
        if self.is_disposed() {
            trace!(channel = %self.key, "Dropped value for disposed channel");
            return;
        }
        match self.queue.push(value) {
            PushOutcome::Queued => {
                trace!(channel = %self.key, "Queued value");
            }
            PushOutcome::Overflowed => {
                warn!(
                    channel = %self.key,
                    capacity = ?self.queue.capacity().limit(),
                    "Queue full, dropped oldest value"
                );
            }
            PushOutcome::Closed => {
                trace!(channel = %self.key, "Dropped value for disposed channel");
            }
        }
    }

    /// Record a liveness signal from the client.
    pub fn heartbeat(&self) {
        if self.is_disposed() {
            return;
        }
        let offset = Instant::now().saturating_duration_since(self.created).as_nanos();
        let offset = u64::try_from(offset).unwrap_or(u64::MAX);
        self.heartbeat_offset_ns.fetch_max(offset, Ordering::AcqRel);
        trace!(channel = %self.key, "Heartbeat");
    }

    /// Check if the last heartbeat is older than the liveness timeout at `now`.
    ///
    /// Uses the per-channel override when set, otherwise `default_timeout`.
    #[must_use]
    pub fn is_stale(&self, now: Instant, default_timeout: Duration) -> bool {
        let timeout = self.heartbeat_timeout.unwrap_or(default_timeout);
        now.saturating_duration_since(self.last_heartbeat()) > timeout
    }

    /// Wait for the next queued value.
    ///
    /// Returns `None` once the channel is disposed. Intended for the single
    /// transport drain loop of this channel; cancel-safe.
    pub async fn next(&self) -> Option<T> {
        self.queue.pop().await
    }

    /// Take the next queued value without waiting.
    pub fn try_next(&self) -> Option<T> {
        self.queue.try_pop()
    }

    /// Dispose the channel on behalf of application code.
    ///
    /// See [`Channel::dispose_with`].
    pub fn dispose(self: &Arc<Self>) -> bool {
        self.dispose_with(DisposeReason::Requested)
    }

    /// Dispose the channel.
    ///
    /// Discards undelivered values, wakes the drain loop so the transport
    /// detaches, removes the channel from its registry and notifies the
    /// registry's listeners. Idempotent: returns `true` only for the call that
    /// performed the transition.
    pub fn dispose_with(self: &Arc<Self>, reason: DisposeReason) -> bool {
        let previous = ChannelState::from_u8(
            self.state
                .swap(ChannelState::Disposed as u8, Ordering::AcqRel),
        );
        if previous == ChannelState::Disposed {
            return false;
        }
        let _ = self.disposal_reason.set(reason);

        let discarded = self.queue.close();
        debug!(
            auth_id = %self.key.auth_id,
            path = %self.key.path,
            reason = %reason,
            discarded,
            "Channel disposed"
        );

        if let Some(shared) = self.registry.get().and_then(Weak::upgrade) {
            shared.detach(self, reason, previous == ChannelState::Started);
        }
        true
    }

    /// Bind this channel to the registry that owns its key.
    pub(crate) fn attach(&self, shared: &Arc<RegistryShared<T>>) -> bool {
        self.registry.set(Arc::downgrade(shared)).is_ok()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("key", &self.key)
            .field("state", &ChannelState::from_u8(self.state.load(Ordering::Acquire)))
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}
