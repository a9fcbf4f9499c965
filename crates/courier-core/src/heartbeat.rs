//! Heartbeat-based liveness monitoring.
//!
//! A single background task periodically snapshots the registry and disposes
//! every channel whose last heartbeat is older than the liveness timeout.

use crate::channel::DisposeReason;
use crate::error::ChannelError;
use crate::registry::ChannelRegistry;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Monitor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Time between registry scans.
    pub scan_interval: Duration,
    /// Silence after which a channel is evicted.
    pub timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30),
        }
    }
}

impl MonitorConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error unless `0 < scan_interval < timeout`.
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.scan_interval.is_zero() {
            return Err(ChannelError::InvalidConfig(
                "heartbeat scan interval must be non-zero".into(),
            ));
        }
        if self.scan_interval >= self.timeout {
            return Err(ChannelError::InvalidConfig(format!(
                "heartbeat scan interval ({:?}) must be shorter than the timeout ({:?})",
                self.scan_interval, self.timeout
            )));
        }
        Ok(())
    }
}

/// Monitor task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MonitorState {
    /// Waiting for the next tick.
    Idle = 0,
    /// Scanning the registry.
    Scanning = 1,
    /// Task has exited.
    Stopped = 2,
}

impl MonitorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => MonitorState::Idle,
            1 => MonitorState::Scanning,
            _ => MonitorState::Stopped,
        }
    }
}

/// Result of one registry scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Channels examined.
    pub scanned: usize,
    /// Channels disposed for missing the heartbeat window.
    pub evicted: usize,
}

/// Evicts channels that stopped heartbeating.
pub struct HeartbeatMonitor<T> {
    registry: ChannelRegistry<T>,
    config: MonitorConfig,
    state: Arc<AtomicU8>,
}

impl<T: Send + 'static> HeartbeatMonitor<T> {
    /// Create a monitor over `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(registry: ChannelRegistry<T>, config: MonitorConfig) -> Result<Self, ChannelError> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            state: Arc::new(AtomicU8::new(MonitorState::Idle as u8)),
        })
    }

    /// Get the monitor configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Get the current task state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run one scan against the current time.
    pub fn scan(&self) -> ScanReport {
        self.scan_at(Instant::now())
    }

    /// Run one scan as of `now`.
    ///
    /// Every stale channel is disposed independently; a channel disposed
    /// concurrently by someone else is simply skipped.
    pub fn scan_at(&self, now: Instant) -> ScanReport {
        self.state.store(MonitorState::Scanning as u8, Ordering::Release);

        let mut report = ScanReport::default();
        for channel in self.registry.list_all() {
            report.scanned += 1;
            if !channel.is_stale(now, self.config.timeout) {
                continue;
            }
            if channel.dispose_with(DisposeReason::HeartbeatTimeout) {
                report.evicted += 1;
                debug!(
                    auth_id = %channel.auth_id(),
                    path = %channel.path(),
                    silent_ms = now.saturating_duration_since(channel.last_heartbeat()).as_millis() as u64,
                    "Evicted silent channel"
                );
            }
        }

        self.state.store(MonitorState::Idle as u8, Ordering::Release);
        report
    }

    /// Spawn the background scan task.
    ///
    /// Dropping the returned handle also stops the task.
    #[must_use]
    pub fn spawn(self) -> MonitorHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let state = Arc::clone(&self.state);

        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Starting heartbeat monitor"
        );

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.scan_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = self.scan();
                        if report.evicted > 0 {
                            info!(
                                scanned = report.scanned,
                                evicted = report.evicted,
                                "Heartbeat scan evicted channels"
                            );
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            self.state.store(MonitorState::Stopped as u8, Ordering::Release);
            debug!("Heartbeat monitor stopped");
        });

        MonitorHandle {
            shutdown: Some(shutdown_tx),
            task,
            state,
        }
    }
}

/// Handle to a running heartbeat monitor.
pub struct MonitorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    state: Arc<AtomicU8>,
}

impl MonitorHandle {
    /// Get the current task state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Stop the monitor and wait for the task to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let task = &mut self.task;
        if let Err(e) = task.await {
            if e.is_panic() {
                warn!(error = %e, "Heartbeat monitor task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    fn config(scan_secs: u64, timeout_secs: u64) -> MonitorConfig {
        MonitorConfig {
            scan_interval: Duration::from_secs(scan_secs),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(MonitorConfig::default().validate().is_ok());
        assert!(config(30, 30).validate().is_err());
        assert!(config(40, 30).validate().is_err());
        assert!(config(0, 30).validate().is_err());

        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        assert!(HeartbeatMonitor::new(registry, config(60, 30)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_evicts_only_stale_channels() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let monitor = HeartbeatMonitor::new(registry.clone(), config(5, 30)).unwrap();

        let silent = registry.get_or_create("user1", "/chat").unwrap();
        let chatty = registry.get_or_create("user2", "/chat").unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        chatty.heartbeat();

        let report = monitor.scan();
        assert_eq!(report, ScanReport { scanned: 2, evicted: 1 });
        assert!(silent.is_disposed());
        assert_eq!(silent.disposal_reason(), Some(DisposeReason::HeartbeatTimeout));
        assert!(!chatty.is_disposed());
        assert_eq!(monitor.state(), MonitorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_tolerates_concurrent_disposal() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let monitor = HeartbeatMonitor::new(registry.clone(), config(5, 30)).unwrap();
        let channel = registry.get_or_create("user1", "/chat").unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        let now = Instant::now();
        channel.dispose();

        assert_eq!(monitor.scan_at(now).evicted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_channel_timeout_override() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let monitor = HeartbeatMonitor::new(registry.clone(), config(5, 30)).unwrap();

        let short = registry
            .get_or_create_with("user1", "/chat", |key| {
                Channel::from_key(
                    key,
                    crate::channel::ChannelOptions {
                        heartbeat_timeout: Some(Duration::from_secs(10)),
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        let default = registry.get_or_create("user2", "/chat").unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(monitor.scan().evicted, 1);
        assert!(short.is_disposed());
        assert!(!default.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_channel_gone_by_next_tick_after_timeout() {
        // timeout 30s, scan every 5s, channel created at t=0 and never heartbeats
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let handle = HeartbeatMonitor::new(registry.clone(), config(5, 30))
            .unwrap()
            .spawn();

        let channel = registry.get_or_create("user1", "/chat").unwrap();

        // The t=30 scan sees exactly 30s of silence, which is not past the timeout
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(registry.contains("user1", "/chat"));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(registry.list_all().count(), 0);
        assert!(channel.is_disposed());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshed_channel_survives_tick() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let handle = HeartbeatMonitor::new(registry.clone(), config(5, 30))
            .unwrap()
            .spawn();

        let channel = registry.get_or_create("user1", "/chat").unwrap();

        for _ in 0..12 {
            tokio::time::sleep(Duration::from_secs(4)).await;
            channel.heartbeat();
        }

        assert!(!channel.is_disposed());
        assert!(registry.contains("user1", "/chat"));

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_task() {
        let registry: ChannelRegistry<u32> = ChannelRegistry::new();
        let handle = HeartbeatMonitor::new(registry.clone(), config(5, 30))
            .unwrap()
            .spawn();
        let state = Arc::clone(&handle.state);

        handle.shutdown().await;
        assert_eq!(MonitorState::from_u8(state.load(Ordering::Acquire)), MonitorState::Stopped);

        // No further evictions once stopped
        let channel = registry.get_or_create("user1", "/chat").unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(!channel.is_disposed());
    }
}
