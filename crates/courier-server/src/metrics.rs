//! Metrics collection and export for Courier.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use courier_core::{Channel, ChannelListener, DisposeReason, ListenerResult};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CHANNELS_STARTED: &str = "courier_channels_started_total";
    pub const CHANNELS_DISPOSED: &str = "courier_channels_disposed_total";
    pub const CHANNELS_ACTIVE: &str = "courier_channels_active";
    pub const SESSIONS_ACTIVE: &str = "courier_sessions_active";
    pub const MESSAGES_QUEUED: &str = "courier_messages_queued_total";
    pub const MESSAGES_DELIVERED: &str = "courier_messages_delivered_total";
    pub const MESSAGES_BYTES: &str = "courier_messages_bytes_total";
    pub const HEARTBEATS: &str = "courier_heartbeats_total";
    pub const EVICTIONS: &str = "courier_evictions_total";
    pub const ERRORS_TOTAL: &str = "courier_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::CHANNELS_STARTED, "Channels started since server start");
    metrics::describe_counter!(
        names::CHANNELS_DISPOSED,
        "Channels disposed since server start, by reason"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of started channels");
    metrics::describe_gauge!(
        names::SESSIONS_ACTIVE,
        "Transport sessions currently attached, by transport"
    );
    metrics::describe_counter!(names::MESSAGES_QUEUED, "Values pushed onto channel queues");
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Values written to clients, by transport"
    );
    metrics::describe_counter!(names::MESSAGES_BYTES, "Payload bytes written to clients");
    metrics::describe_counter!(names::HEARTBEATS, "Client heartbeats received");
    metrics::describe_counter!(names::EVICTIONS, "Channels evicted for missing heartbeats");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a value pushed onto a channel.
pub fn record_queued() {
    counter!(names::MESSAGES_QUEUED).increment(1);
}

/// Record values written to a client.
pub fn record_delivered(transport: &'static str, messages: usize, bytes: usize) {
    counter!(names::MESSAGES_DELIVERED, "transport" => transport).increment(messages as u64);
    counter!(names::MESSAGES_BYTES, "transport" => transport).increment(bytes as u64);
}

/// Record a client heartbeat.
pub fn record_heartbeat(transport: &'static str) {
    counter!(names::HEARTBEATS, "transport" => transport).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Channel lifecycle metrics, fed by registry events.
#[derive(Debug, Default)]
pub struct MetricsListener;

impl ChannelListener<Bytes> for MetricsListener {
    fn on_channel_started(&self, _channel: &Arc<Channel<Bytes>>) -> ListenerResult {
        counter!(names::CHANNELS_STARTED).increment(1);
        gauge!(names::CHANNELS_ACTIVE).increment(1.0);
        Ok(())
    }

    fn on_channel_disposed(&self, _channel: &Arc<Channel<Bytes>>, reason: DisposeReason) {
        counter!(names::CHANNELS_DISPOSED, "reason" => reason.as_str()).increment(1);
        gauge!(names::CHANNELS_ACTIVE).decrement(1.0);
        if reason == DisposeReason::HeartbeatTimeout {
            counter!(names::EVICTIONS).increment(1);
        }
    }
}

/// Metrics guard that tracks an attached transport session.
pub struct SessionMetricsGuard {
    transport: &'static str,
}

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session.
    #[must_use]
    pub fn new(transport: &'static str) -> Self {
        gauge!(names::SESSIONS_ACTIVE, "transport" => transport).increment(1.0);
        Self { transport }
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::SESSIONS_ACTIVE, "transport" => self.transport).decrement(1.0);
    }
}
