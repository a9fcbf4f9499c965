//! # courier-protocol
//!
//! Wire protocol used by the bundled Courier transports.
//!
//! The channel core itself is transport-agnostic; this crate defines the
//! frames the WebSocket and long-poll transports put on the wire.
//!
//! ## Frame Types
//!
//! - `Connected` - Sent once when a transport attaches to a channel
//! - `Deliver` - One queued value, with a per-session sequence number
//! - `Heartbeat` / `HeartbeatAck` - Client liveness signal and its echo
//! - `Close` / `Error` - Teardown and failure notices
//!
//! ## Example
//!
//! ```rust
//! use courier_protocol::{codec, Frame};
//!
//! let frame = Frame::deliver(1, b"hello".to_vec());
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use frames::{close_codes, Frame, FrameType};
pub use version::{Version, VersionError, PROTOCOL_VERSION};
