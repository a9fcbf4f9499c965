//! Frame types for the Courier wire protocol.
//!
//! Frames are serialized with MessagePack using named fields and an internal
//! `type` tag.

use crate::version::Version;
use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connected = 0x01,
    Deliver = 0x02,
    Heartbeat = 0x03,
    HeartbeatAck = 0x04,
    Close = 0x05,
    Error = 0x06,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        Ok(match value {
            0x01 => FrameType::Connected,
            0x02 => FrameType::Deliver,
            0x03 => FrameType::Heartbeat,
            0x04 => FrameType::HeartbeatAck,
            0x05 => FrameType::Close,
            0x06 => FrameType::Error,
            _ => return Err("Invalid frame type"),
        })
    }
}

/// Close codes carried by [`Frame::Close`].
pub mod close_codes {
    /// Channel disposed by the application.
    pub const NORMAL: u16 = 1000;
    /// Server shutting down.
    pub const GOING_AWAY: u16 = 1001;
    /// No heartbeat within the liveness timeout.
    pub const HEARTBEAT_TIMEOUT: u16 = 4000;
    /// Channel superseded by a newer one for the same key.
    pub const REPLACED: u16 = 4001;
    /// Delivery to the client failed.
    pub const DELIVERY_FAILED: u16 = 4002;
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Transport attached to a channel.
    #[serde(rename = "connected")]
    Connected {
        /// Principal owning the channel.
        auth_id: String,
        /// Logical endpoint of the channel.
        path: String,
        /// Server protocol version.
        version: Version,
        /// How often the client should heartbeat, in milliseconds.
        heartbeat_interval_ms: u32,
        /// Silence after which the server evicts the channel, in milliseconds.
        heartbeat_timeout_ms: u32,
    },

    /// A queued value.
    #[serde(rename = "deliver")]
    Deliver {
        /// Per-session sequence number, starting at 1.
        seq: u64,
        /// Opaque application payload.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Client liveness signal.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        /// Optional client timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Server echo of a heartbeat.
    #[serde(rename = "heartbeat_ack")]
    HeartbeatAck {
        /// Echoed client timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Channel is being torn down.
    #[serde(rename = "close")]
    Close {
        /// Close code, see [`close_codes`].
        code: u16,
        /// Human-readable reason.
        reason: String,
    },

    /// Error notice.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Deliver { .. } => FrameType::Deliver,
            Frame::Heartbeat { .. } => FrameType::Heartbeat,
            Frame::HeartbeatAck { .. } => FrameType::HeartbeatAck,
            Frame::Close { .. } => FrameType::Close,
            Frame::Error { .. } => FrameType::Error,
        }
    }

    /// Create a Connected frame.
    #[must_use]
    pub fn connected(
        auth_id: impl Into<String>,
        path: impl Into<String>,
        heartbeat_interval_ms: u32,
        heartbeat_timeout_ms: u32,
    ) -> Self {
        Frame::Connected {
            auth_id: auth_id.into(),
            path: path.into(),
            version: Version::default(),
            heartbeat_interval_ms,
            heartbeat_timeout_ms,
        }
    }

    /// Create a Deliver frame.
    #[must_use]
    pub fn deliver(seq: u64, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Deliver {
            seq,
            payload: payload.into(),
        }
    }

    /// Create a Heartbeat frame.
    #[must_use]
    pub fn heartbeat(timestamp: Option<u64>) -> Self {
        Frame::Heartbeat { timestamp }
    }

    /// Create a HeartbeatAck frame.
    #[must_use]
    pub fn heartbeat_ack(timestamp: Option<u64>) -> Self {
        Frame::HeartbeatAck { timestamp }
    }

    /// Create a Close frame.
    #[must_use]
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Frame::Close {
            code,
            reason: reason.into(),
        }
    }

    /// Create an Error frame.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            code,
            message: message.into(),
        }
    }
}
