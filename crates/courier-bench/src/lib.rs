//! Shared fixtures for the Courier benchmarks.

use bytes::Bytes;
use courier_core::{ChannelRegistry, QueueCapacity, RegistryConfig};

/// Payload of `size` zero bytes.
#[must_use]
pub fn payload(size: usize) -> Bytes {
    Bytes::from(vec![0u8; size])
}

/// Registry holding `count` started channels, one principal each.
///
/// # Panics
///
/// Panics if a channel cannot be created, which the limit of `count` rules out.
#[must_use]
pub fn populated_registry(count: usize, capacity: QueueCapacity) -> ChannelRegistry<Bytes> {
    let registry = ChannelRegistry::with_config(RegistryConfig {
        max_channels: count.max(1),
        queue_capacity: capacity,
        heartbeat_timeout: None,
    });
    for i in 0..count {
        registry
            .get_or_create(&format!("user-{}", i), "/bench")
            .expect("within max_channels");
    }
    registry
}

/// Single-threaded runtime for async benchmarks.
///
/// # Errors
///
/// Returns an error if the runtime cannot be built.
pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
}
