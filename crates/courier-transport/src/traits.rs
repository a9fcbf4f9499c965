//! Transport contract for Courier channels.
//!
//! A transport implements [`ChannelSink`] for the outbound direction and maps
//! whatever arrives from the client to [`Inbound`] events.

use async_trait::async_trait;
use courier_core::DisposeReason;
use courier_protocol::{close_codes, Frame, FrameCodec, ProtocolError};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to deliver a value to the client.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// Failed to receive from the client.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Something the client sent, as seen by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Liveness signal.
    Heartbeat {
        /// Client timestamp to echo back, if any.
        timestamp: Option<u64>,
    },
    /// Client closed its side.
    Close,
    /// Anything the channel does not act on.
    Ignored,
}

/// Outbound half of a transport attached to one channel.
#[async_trait]
pub trait ChannelSink<T: Send + 'static>: Send {
    /// Get the transport name (e.g., "websocket").
    fn name(&self) -> &'static str;

    /// Put one dequeued value on the wire.
    ///
    /// A failure is final for the channel: the caller disposes it and does
    /// not retry.
    async fn deliver(&mut self, value: T) -> Result<(), TransportError>;

    /// Answer a client heartbeat.
    async fn acknowledge_heartbeat(&mut self, timestamp: Option<u64>) -> Result<(), TransportError> {
        let _ = timestamp;
        Ok(())
    }

    /// Tell the client the channel is gone and release the connection.
    async fn close(&mut self, reason: DisposeReason) -> Result<(), TransportError> {
        let _ = reason;
        Ok(())
    }
}

/// Close code announcing a disposal.
#[must_use]
pub fn close_code(reason: DisposeReason) -> u16 {
    match reason {
        DisposeReason::Requested | DisposeReason::ClientClosed => close_codes::NORMAL,
        DisposeReason::Shutdown => close_codes::GOING_AWAY,
        DisposeReason::HeartbeatTimeout => close_codes::HEARTBEAT_TIMEOUT,
        DisposeReason::Replaced => close_codes::REPLACED,
        DisposeReason::TransportFailure => close_codes::DELIVERY_FAILED,
    }
}

/// Build the close frame announcing a disposal.
#[must_use]
pub fn close_frame(reason: DisposeReason) -> Frame {
    Frame::close(close_code(reason), reason.as_str())
}

/// Decode one client frame into an inbound event.
///
/// # Errors
///
/// Returns an error if the data is not a valid frame.
pub fn decode_inbound(codec: &FrameCodec, data: &[u8]) -> Result<Inbound, TransportError> {
    Ok(match codec.decode(data)? {
        Frame::Heartbeat { timestamp } => Inbound::Heartbeat { timestamp },
        Frame::Close { .. } => Inbound::Close,
        _ => Inbound::Ignored,
    })
}
