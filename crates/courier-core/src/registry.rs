//! Process-wide channel registry.
//!
//! The registry maps `(auth_id, path)` to the single live channel for that
//! key, starts new channels with the registered listener set, and forgets
//! channels as they are disposed.

use crate::channel::{Channel, ChannelKey, ChannelOptions, ChannelState, DisposeReason};
use crate::error::ChannelError;
use crate::listener::{ChannelListener, ListenerId, ListenerSet};
use crate::queue::QueueCapacity;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of channels.
    pub max_channels: usize,
    /// Queue capacity for channels built by the default factory.
    pub queue_capacity: QueueCapacity,
    /// Per-channel liveness timeout for channels built by the default factory.
    pub heartbeat_timeout: Option<Duration>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_channels: 100_000,
            queue_capacity: QueueCapacity::Unbounded,
            heartbeat_timeout: None,
        }
    }
}

impl RegistryConfig {
    fn channel_options(&self) -> ChannelOptions {
        ChannelOptions {
            queue_capacity: self.queue_capacity,
            heartbeat_timeout: self.heartbeat_timeout,
        }
    }
}

/// State shared between the registry handle and its channels.
pub(crate) struct RegistryShared<T> {
    channels: DashMap<ChannelKey, Arc<Channel<T>>>,
    listeners: ListenerSet<T>,
    config: RegistryConfig,
}

impl<T: Send + 'static> RegistryShared<T> {
    /// Forget a disposed channel and notify listeners.
    pub(crate) fn detach(&self, channel: &Arc<Channel<T>>, reason: DisposeReason, was_started: bool) {
        // A newer channel may already hold the key.
        let removed = self
            .channels
            .remove_if(channel.key(), |_, existing| Arc::ptr_eq(existing, channel))
            .is_some();
        if removed {
            debug!(channel = %channel.key(), remaining = self.channels.len(), "Channel deregistered");
        }
        if was_started {
            self.listeners.dispatch_disposed(channel, reason);
        }
    }
}

/// The channel registry.
///
/// Cloning yields another handle to the same registry.
pub struct ChannelRegistry<T> {
    shared: Arc<RegistryShared<T>>,
}

impl<T> Clone for ChannelRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> ChannelRegistry<T> {
    /// Create a new registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating channel registry with config: {:?}", config);
        Self {
            shared: Arc::new(RegistryShared {
                channels: DashMap::new(),
                listeners: ListenerSet::new(),
                config,
            }),
        }
    }

    /// Get the registry configuration.
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Get the live channel for a key, creating and starting one if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel limit is reached.
    pub fn get_or_create(&self, auth_id: &str, path: &str) -> Result<Arc<Channel<T>>, ChannelError> {
        let options = self.shared.config.channel_options();
        self.get_or_create_with(auth_id, path, |key| Channel::from_key(key, options))
    }

    /// Get the live channel for a key, building one with `factory` if needed.
    ///
    /// Lookup and insertion are atomic per key: concurrent callers for one key
    /// all receive the same channel. The new channel is started with the
    /// current listener set after insertion. `factory` runs while the key's
    /// shard is locked and must not call back into the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the channel limit is reached, or if `factory`
    /// returns a channel that is not in the `Created` state.
    pub fn get_or_create_with<F>(
        &self,
        auth_id: &str,
        path: &str,
        factory: F,
    ) -> Result<Arc<Channel<T>>, ChannelError>
    where
        F: FnOnce(ChannelKey) -> Channel<T>,
    {
        let key = ChannelKey::new(auth_id, path);

        if let Some(existing) = self.get_live(&key) {
            return Ok(existing);
        }
        // Checked outside the entry lock; concurrent creators may overshoot
        // by at most one channel each.
        if self.shared.channels.len() >= self.shared.config.max_channels {
            warn!(channel = %key, max = self.shared.config.max_channels, "Channel limit reached");
            return Err(ChannelError::MaxChannelsReached(self.shared.config.max_channels));
        }

        let channel = match self.shared.channels.entry(key.clone()) {
            Entry::Occupied(entry) if !entry.get().is_disposed() => {
                return Ok(Arc::clone(entry.get()));
            }
            Entry::Occupied(mut entry) => {
                let channel = self.build(factory, key)?;
                entry.insert(Arc::clone(&channel));
                channel
            }
            Entry::Vacant(entry) => {
                let channel = self.build(factory, key)?;
                entry.insert(Arc::clone(&channel));
                channel
            }
        };

        self.start(&channel)?;
        Ok(channel)
    }

    /// Register and start a caller-built channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::DuplicateChannel`] if a live channel already
    /// holds the key, or [`ChannelError::InvalidState`] if the channel is not
    /// in the `Created` state.
    pub fn insert(&self, channel: Channel<T>) -> Result<Arc<Channel<T>>, ChannelError> {
        let key = channel.key().clone();
        let channel = match self.shared.channels.entry(key.clone()) {
            Entry::Occupied(entry) if !entry.get().is_disposed() => {
                return Err(ChannelError::DuplicateChannel(key));
            }
            Entry::Occupied(mut entry) => {
                let channel = self.adopt(channel)?;
                entry.insert(Arc::clone(&channel));
                channel
            }
            Entry::Vacant(entry) => {
                let channel = self.adopt(channel)?;
                entry.insert(Arc::clone(&channel));
                channel
            }
        };

        self.start(&channel)?;
        Ok(channel)
    }

    /// Dispose whatever live channel holds a key and start a fresh one in its
    /// place.
    ///
    /// The swap happens under the key's entry lock, so concurrent callers for
    /// one key each displace the previous winner and exactly one returned
    /// channel stays live. The displaced channel is disposed with `reason`
    /// once the lock is released.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is vacant and the channel limit is reached.
    pub fn replace(
        &self,
        auth_id: &str,
        path: &str,
        reason: DisposeReason,
    ) -> Result<Arc<Channel<T>>, ChannelError> {
        let key = ChannelKey::new(auth_id, path);

        let max = self.shared.config.max_channels;
        if self.get_live(&key).is_none() && self.shared.channels.len() >= max {
            warn!(channel = %key, max, "Channel limit reached");
            return Err(ChannelError::MaxChannelsReached(max));
        }

        let options = self.shared.config.channel_options();
        let channel = self.adopt(Channel::from_key(key.clone(), options))?;
        let displaced = match self.shared.channels.entry(key) {
            Entry::Occupied(mut entry) => Some(entry.insert(Arc::clone(&channel))),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&channel));
                None
            }
        };

        if let Some(old) = displaced {
            if old.dispose_with(reason) {
                debug!(channel = %old.key(), reason = %reason, "Channel displaced");
            }
        }

        self.start(&channel)?;
        Ok(channel)
    }

    fn build<F>(&self, factory: F, key: ChannelKey) -> Result<Arc<Channel<T>>, ChannelError>
    where
        F: FnOnce(ChannelKey) -> Channel<T>,
    {
        let channel = factory(key.clone());
        if channel.key() != &key {
            warn!(expected = %key, built = %channel.key(), "Factory built channel for another key");
            return Err(ChannelError::InvalidConfig(format!(
                "factory built {} for key {}",
                channel.key(),
                key
            )));
        }
        self.adopt(channel)
    }

    fn adopt(&self, channel: Channel<T>) -> Result<Arc<Channel<T>>, ChannelError> {
        let state = channel.state();
        if state != ChannelState::Created {
            return Err(ChannelError::InvalidState {
                key: channel.key().clone(),
                actual: state,
                expected: ChannelState::Created,
            });
        }
        let channel = Arc::new(channel);
        channel.attach(&self.shared);
        Ok(channel)
    }

    fn start(&self, channel: &Arc<Channel<T>>) -> Result<(), ChannelError> {
        match channel.start(&self.shared.listeners) {
            Ok(report) => {
                debug!(
                    channel = %channel.key(),
                    listeners = report.invoked,
                    listener_errors = report.errors.len(),
                    channels = self.shared.channels.len(),
                    "Channel registered"
                );
                Ok(())
            }
            // Another caller reached the channel through the map and disposed
            // it between insertion and start.
            Err(ChannelError::InvalidState {
                actual: ChannelState::Disposed,
                ..
            }) => {
                debug!(channel = %channel.key(), "Channel disposed before start");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn get_live(&self, key: &ChannelKey) -> Option<Arc<Channel<T>>> {
        self.shared
            .channels
            .get(key)
            .filter(|entry| !entry.is_disposed())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Get the live channel for a key.
    #[must_use]
    pub fn get(&self, auth_id: &str, path: &str) -> Option<Arc<Channel<T>>> {
        self.get_live(&ChannelKey::new(auth_id, path))
    }

    /// Check if a live channel exists for a key.
    #[must_use]
    pub fn contains(&self, auth_id: &str, path: &str) -> bool {
        self.get(auth_id, path).is_some()
    }

    /// Remove the entry for a key without disposing its channel.
    ///
    /// Disposal calls this internally; the returned channel is whatever held
    /// the key.
    pub fn remove(&self, auth_id: &str, path: &str) -> Option<Arc<Channel<T>>> {
        self.shared
            .channels
            .remove(&ChannelKey::new(auth_id, path))
            .map(|(_, channel)| channel)
    }

    /// Snapshot of every live channel.
    ///
    /// The snapshot is taken when this is called; channels created or
    /// disposed while iterating do not affect it.
    #[must_use]
    pub fn list_all(&self) -> std::vec::IntoIter<Arc<Channel<T>>> {
        self.snapshot(|_| true)
    }

    /// Snapshot of the live channels owned by one principal.
    #[must_use]
    pub fn channels_for(&self, auth_id: &str) -> std::vec::IntoIter<Arc<Channel<T>>> {
        self.snapshot(|channel| channel.auth_id() == auth_id)
    }

    fn snapshot<P>(&self, predicate: P) -> std::vec::IntoIter<Arc<Channel<T>>>
    where
        P: Fn(&Channel<T>) -> bool,
    {
        let channels: Vec<_> = self
            .shared
            .channels
            .iter()
            .filter(|entry| !entry.is_disposed() && predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        channels.into_iter()
    }

    /// Dispose every channel owned by a principal.
    ///
    /// Returns the number of channels disposed by this call.
    pub fn dispose_auth(&self, auth_id: &str, reason: DisposeReason) -> usize {
        let disposed = self
            .channels_for(auth_id)
            .filter(|channel| channel.dispose_with(reason))
            .count();
        debug!(auth_id = %auth_id, disposed, reason = %reason, "Disposed principal channels");
        disposed
    }

    /// Dispose every channel.
    ///
    /// Returns the number of channels disposed by this call.
    pub fn dispose_all(&self, reason: DisposeReason) -> usize {
        let disposed = self
            .list_all()
            .filter(|channel| channel.dispose_with(reason))
            .count();
        info!(disposed, reason = %reason, "Disposed all channels");
        disposed
    }

    /// Register a listener for channel lifecycle events.
    pub fn register_listener(&self, listener: Arc<dyn ChannelListener<T>>) -> ListenerId {
        self.shared.listeners.register(listener)
    }

    /// Deregister a listener.
    ///
    /// Returns `true` if the listener was registered.
    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.deregister(id)
    }

    /// Get the number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.channels.len()
    }

    /// Check if the registry holds no channels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.channels.is_empty()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            channel_count: self.shared.channels.len(),
            queued_messages: self
                .shared
                .channels
                .iter()
                .map(|entry| entry.queued_len())
                .sum(),
            listener_count: self.shared.listeners.len(),
        }
    }
}

impl<T: Send + 'static> Default for ChannelRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone)]
pub struct RegistryStats {
    /// Number of registered channels.
    pub channel_count: usize,
    /// Values awaiting delivery across all channels.
    pub queued_messages: usize,
    /// Number of registered listeners.
    pub listener_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerResult;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn test_get_or_create_returns_same_channel() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();

        let first = registry.get_or_create("user1", "/chat").unwrap();
        let second = registry.get_or_create("user1", "/chat").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.state(), ChannelState::Started);
        assert_eq!(registry.len(), 1);

        let other = registry.get_or_create("user1", "/feed").unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_get_or_create_yields_one_channel() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        {
            let starts = Arc::clone(&starts);
            registry.register_listener(Arc::new(move |_: &Arc<Channel<u32>>| -> ListenerResult {
                starts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }

        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = registry.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_create("user1", "/chat").unwrap()
                })
            })
            .collect();

        let channels: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for channel in &channels[1..] {
            assert!(Arc::ptr_eq(&channels[0], channel));
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispose_removes_from_registry() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let channel = registry.get_or_create("user1", "/chat").unwrap();

        assert!(channel.dispose());
        assert!(!registry.contains("user1", "/chat"));
        assert!(registry.is_empty());
        assert_eq!(registry.list_all().count(), 0);

        // A fresh channel can take the key afterwards
        let replacement = registry.get_or_create("user1", "/chat").unwrap();
        assert!(!Arc::ptr_eq(&channel, &replacement));
        assert!(!replacement.is_disposed());
    }

    #[test]
    fn test_disposing_old_channel_keeps_replacement() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let old = registry.get_or_create("user1", "/chat").unwrap();

        // Simulate a leftover entry: forget it, build a replacement, then
        // dispose the old channel.
        registry.remove("user1", "/chat");
        let replacement = registry.get_or_create("user1", "/chat").unwrap();
        old.dispose();

        let current = registry.get("user1", "/chat").unwrap();
        assert!(Arc::ptr_eq(&current, &replacement));
    }

    #[test]
    fn test_insert_rejects_duplicate() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        registry.insert(Channel::new("user1", "/chat")).unwrap();

        match registry.insert(Channel::new("user1", "/chat")) {
            Err(ChannelError::DuplicateChannel(key)) => {
                assert_eq!(key, ChannelKey::new("user1", "/chat"));
            }
            other => panic!("Expected DuplicateChannel, got {:?}", other),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_factory_options_are_used() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let channel = registry
            .get_or_create_with("user1", "/chat", |key| {
                Channel::from_key(
                    key,
                    ChannelOptions {
                        queue_capacity: QueueCapacity::Bounded(1),
                        heartbeat_timeout: Some(Duration::from_secs(3)),
                    },
                )
            })
            .unwrap();

        channel.queue(1);
        channel.queue(2);
        assert_eq!(channel.queued_len(), 1);
        assert_eq!(channel.heartbeat_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_factory_for_wrong_key_is_rejected() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let result =
            registry.get_or_create_with("user1", "/chat", |_| Channel::new("user2", "/chat"));
        assert!(matches!(result, Err(ChannelError::InvalidConfig(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_max_channels() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::with_config(RegistryConfig {
            max_channels: 2,
            ..Default::default()
        });

        registry.get_or_create("user1", "/a").unwrap();
        registry.get_or_create("user1", "/b").unwrap();
        assert!(matches!(
            registry.get_or_create("user1", "/c"),
            Err(ChannelError::MaxChannelsReached(2))
        ));

        // Existing keys still resolve at the limit
        assert!(registry.get_or_create("user1", "/a").is_ok());
    }

    #[test]
    fn test_list_all_is_a_snapshot() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        registry.get_or_create("user1", "/a").unwrap();
        registry.get_or_create("user2", "/a").unwrap();

        let snapshot = registry.list_all();
        registry.get_or_create("user3", "/a").unwrap();
        registry.get("user1", "/a").unwrap().dispose();

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.list_all().count(), 2);
        // Restartable per call
        assert_eq!(registry.list_all().count(), 2);
    }

    #[test]
    fn test_disposed_listener_event() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        struct Recorder(Arc<Mutex<Vec<String>>>);

        impl ChannelListener<u32> for Recorder {
            fn on_channel_started(&self, channel: &Arc<Channel<u32>>) -> ListenerResult {
                self.0.lock().push(format!("started {}", channel.key()));
                Ok(())
            }

            fn on_channel_disposed(&self, channel: &Arc<Channel<u32>>, reason: DisposeReason) {
                self.0.lock().push(format!("disposed {} {}", channel.key(), reason));
            }
        }

        let id = registry.register_listener(Arc::new(Recorder(Arc::clone(&events))));
        let channel = registry.get_or_create("user1", "/chat").unwrap();
        channel.dispose_with(DisposeReason::ClientClosed);
        channel.dispose();

        assert_eq!(
            *events.lock(),
            vec![
                "started user1@/chat".to_string(),
                "disposed user1@/chat client_closed".to_string(),
            ]
        );

        assert!(registry.deregister_listener(id));
        assert_eq!(registry.stats().listener_count, 0);
    }

    #[test]
    fn test_dispose_auth_and_all() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        registry.get_or_create("user1", "/a").unwrap();
        registry.get_or_create("user1", "/b").unwrap();
        registry.get_or_create("user2", "/a").unwrap();

        assert_eq!(registry.channels_for("user1").count(), 2);
        assert_eq!(registry.dispose_auth("user1", DisposeReason::Requested), 2);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.dispose_all(DisposeReason::Shutdown), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_stats() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let a = registry.get_or_create("user1", "/a").unwrap();
        let b = registry.get_or_create("user2", "/a").unwrap();
        a.queue(1);
        a.queue(2);
        b.queue(3);

        let stats = registry.stats();
        assert_eq!(stats.channel_count, 2);
        assert_eq!(stats.queued_messages, 3);
        assert_eq!(stats.listener_count, 0);
    }

    #[test]
    fn test_start_after_racing_dispose_returns_channel() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();

        // Inserted but not yet started, as inside get_or_create_with
        let channel = registry.adopt(Channel::new("user1", "/chat")).unwrap();
        registry
            .shared
            .channels
            .insert(channel.key().clone(), Arc::clone(&channel));

        // A racing caller finds it and disposes it first
        registry
            .get("user1", "/chat")
            .unwrap()
            .dispose_with(DisposeReason::Replaced);

        assert!(registry.start(&channel).is_ok());
        assert!(channel.is_disposed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_or_create_survives_concurrent_disposal() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let registry = registry.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..500 {
                        if i % 2 == 0 {
                            registry.get_or_create("user1", "/chat").unwrap();
                        } else if let Some(channel) = registry.get("user1", "/chat") {
                            channel.dispose_with(DisposeReason::Replaced);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.len() <= 1);
    }

    #[test]
    fn test_replace_disposes_previous_channel() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            registry.register_listener(Arc::new(move |channel: &Arc<Channel<u32>>| -> ListenerResult {
                events.lock().push(Arc::as_ptr(channel) as usize);
                Ok(())
            }));
        }

        let first = registry.replace("user1", "/chat", DisposeReason::Replaced).unwrap();
        first.queue(1);
        let second = registry.replace("user1", "/chat", DisposeReason::Replaced).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.disposal_reason(), Some(DisposeReason::Replaced));
        assert_eq!(second.state(), ChannelState::Started);
        assert_eq!(second.queued_len(), 0);
        assert!(Arc::ptr_eq(&registry.get("user1", "/chat").unwrap(), &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(events.lock().len(), 2);
    }

    #[test]
    fn test_concurrent_replace_leaves_one_live_channel() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = registry.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    registry
                        .replace("user1", "/chat", DisposeReason::Replaced)
                        .unwrap()
                })
            })
            .collect();

        let channels: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let live: Vec<_> = channels.iter().filter(|c| !c.is_disposed()).collect();

        assert_eq!(live.len(), 1);
        assert!(Arc::ptr_eq(live[0], &registry.get("user1", "/chat").unwrap()));
        assert!(channels
            .iter()
            .filter(|c| c.is_disposed())
            .all(|c| c.disposal_reason() == Some(DisposeReason::Replaced)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_replace_respects_max_channels() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::with_config(RegistryConfig {
            max_channels: 1,
            ..Default::default()
        });

        registry.replace("user1", "/a", DisposeReason::Replaced).unwrap();
        assert!(matches!(
            registry.replace("user1", "/b", DisposeReason::Replaced),
            Err(ChannelError::MaxChannelsReached(1))
        ));
        // Replacing an existing key stays within the limit
        assert!(registry.replace("user1", "/a", DisposeReason::Replaced).is_ok());
    }
}
