//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - TOML configuration file
//! - Environment variables (COURIER_*, nested keys joined with `__`)

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use courier_core::{MonitorConfig, QueueCapacity, RegistryConfig};
use courier_transport::LongPollConfig;
use serde::{Deserialize, Serialize};

/// Files searched when no explicit path is given.
const CONFIG_PATHS: [&str; 3] = [
    "courier.toml",
    "/etc/courier/courier.toml",
    "~/.config/courier/courier.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Enable WebSocket transport.
    #[serde(default = "default_true")]
    pub websocket: bool,

    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,

    /// Enable long-poll transport.
    #[serde(default = "default_true")]
    pub long_poll: bool,

    /// Path for long-poll endpoint.
    #[serde(default = "default_long_poll_path")]
    pub long_poll_path: String,

    /// How long a poll request may wait, in milliseconds.
    #[serde(default = "default_long_poll_wait")]
    pub long_poll_wait_ms: u64,

    /// Maximum values returned per poll.
    #[serde(default = "default_long_poll_batch")]
    pub long_poll_max_batch: usize,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of live channels.
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Per-channel queue capacity; 0 means unbounded.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval clients are told to heartbeat at, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// How often the monitor scans for stale channels, in milliseconds.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,

    /// Silence after which a channel is evicted, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_long_poll_path() -> String {
    "/poll".to_string()
}

fn default_long_poll_wait() -> u64 {
    20_000 // 20 seconds
}

fn default_long_poll_batch() -> usize {
    100
}

fn default_max_channels() -> usize {
    100_000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_heartbeat_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_scan_interval() -> u64 {
    5_000 // 5 seconds
}

fn default_heartbeat_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket: true,
            websocket_path: default_ws_path(),
            long_poll: true,
            long_poll_path: default_long_poll_path(),
            long_poll_wait_ms: default_long_poll_wait(),
            long_poll_max_batch: default_long_poll_batch(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_channels: default_max_channels(),
            queue_capacity: default_queue_capacity(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            scan_interval_ms: default_scan_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first file found on the search path,
    /// or `explicit` if given, with environment overrides on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or the
    /// result fails validation.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(),
        };

        let mut builder = config::Config::builder();
        if let Some(path) = &file {
            tracing::info!(path = %path.display(), "Loading config file");
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix("COURIER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let hb = &self.heartbeat;
        if hb.scan_interval_ms == 0 || hb.timeout_ms == 0 {
            bail!("heartbeat.scan_interval_ms and heartbeat.timeout_ms must be non-zero");
        }
        if hb.scan_interval_ms >= hb.timeout_ms {
            bail!(
                "heartbeat.scan_interval_ms ({}) must be less than heartbeat.timeout_ms ({})",
                hb.scan_interval_ms,
                hb.timeout_ms
            );
        }
        if self.transport.long_poll && self.transport.long_poll_wait_ms >= hb.timeout_ms {
            bail!(
                "transport.long_poll_wait_ms ({}) must be less than heartbeat.timeout_ms ({})",
                self.transport.long_poll_wait_ms,
                hb.timeout_ms
            );
        }
        if self.limits.max_message_size == 0 {
            bail!("limits.max_message_size must be non-zero");
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Heartbeat timeout as a duration.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms)
    }

    /// Registry settings derived from the limits.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_channels: self.limits.max_channels,
            queue_capacity: QueueCapacity::from_limit(self.limits.queue_capacity),
            heartbeat_timeout: None,
        }
    }

    /// Heartbeat monitor settings.
    #[must_use]
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            scan_interval: Duration::from_millis(self.heartbeat.scan_interval_ms),
            timeout: self.heartbeat_timeout(),
        }
    }

    /// Long-poll settings.
    #[must_use]
    pub fn long_poll_config(&self) -> LongPollConfig {
        LongPollConfig {
            wait: Duration::from_millis(self.transport.long_poll_wait_ms),
            max_batch: self.transport.long_poll_max_batch,
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_PATHS
        .iter()
        .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
        .find(|path| path.exists())
}
