//! Long-poll transport.
//!
//! The client repeatedly asks for whatever is queued. Each request counts as a
//! heartbeat, waits up to [`LongPollConfig::wait`] for the first value, then
//! drains whatever else is immediately available.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use courier_core::Channel;
use courier_protocol::{Frame, FrameCodec};
use tracing::trace;

use crate::traits::TransportError;

/// Long-poll configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongPollConfig {
    /// How long a request may wait for the first value.
    pub wait: Duration,
    /// Maximum values returned by one request.
    pub max_batch: usize,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(20),
            max_batch: 100,
        }
    }
}

/// Serve one poll request against a channel.
///
/// Returns an empty batch when nothing arrived within the wait.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionClosed`] if the channel is disposed
/// before or while waiting.
pub async fn poll<T: Send + 'static>(
    channel: &Arc<Channel<T>>,
    config: &LongPollConfig,
) -> Result<Vec<T>, TransportError> {
    if channel.is_disposed() {
        return Err(TransportError::ConnectionClosed);
    }
    channel.heartbeat();

    let first = match tokio::time::timeout(config.wait, channel.next()).await {
        Ok(Some(value)) => value,
        Ok(None) => return Err(TransportError::ConnectionClosed),
        Err(_) => {
            channel.heartbeat();
            trace!(channel = %channel.key(), "Poll timed out empty");
            return Ok(Vec::new());
        }
    };

    let limit = config.max_batch.max(1);
    let mut batch = Vec::with_capacity(limit.min(channel.queued_len() + 1));
    batch.push(first);
    while batch.len() < limit {
        match channel.try_next() {
            Some(value) => batch.push(value),
            None => break,
        }
    }

    channel.heartbeat();
    trace!(channel = %channel.key(), count = batch.len(), "Poll returned batch");
    Ok(batch)
}

/// Encode a poll batch as concatenated deliver frames numbered from 1.
///
/// # Errors
///
/// Returns an error if a value does not fit in a frame.
pub fn encode_batch<T>(values: Vec<T>, codec: &FrameCodec) -> Result<Bytes, TransportError>
where
    T: Into<Vec<u8>>,
{
    let mut buf = BytesMut::new();
    for (seq, value) in (1u64..).zip(values) {
        codec.encode_into(&Frame::deliver(seq, value.into()), &mut buf)?;
    }
    Ok(buf.freeze())
}
