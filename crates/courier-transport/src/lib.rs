//! # courier-transport
//!
//! Transport layer for Courier channels.
//!
//! Every transport plugs into the channel core through the same contract:
//!
//! - **ChannelSink** - Puts dequeued values on the wire
//! - **Inbound** - Liveness and close signals coming back from the client
//! - **drive** - The per-channel loop tying the two to a [`Channel`]
//!
//! Bundled transports:
//!
//! - **WebSocket** - Persistent bidirectional connection (tokio-tungstenite)
//! - **Long-poll** - Request/response cycling over plain HTTP
//!
//! ```rust,ignore
//! use courier_transport::{drive, SessionEnd};
//!
//! async fn attach(channel: Arc<Channel<Bytes>>, mut sink: MySink, inbound: MyInbound) {
//!     match drive(&channel, &mut sink, inbound).await {
//!         SessionEnd::Disposed(reason) => { /* evicted or disposed elsewhere */ }
//!         end => { /* the transport ended the session */ }
//!     }
//! }
//! ```
//!
//! [`Channel`]: courier_core::Channel

pub mod longpoll;
pub mod session;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use longpoll::{encode_batch, poll, LongPollConfig};
pub use session::{drive, SessionEnd};
pub use traits::{close_code, close_frame, decode_inbound, ChannelSink, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{handshake_config, inbound_frames, serve_channel, WebSocketSink};
