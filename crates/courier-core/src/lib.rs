//! # courier-core
//!
//! Channel lifecycle and delivery core for the Courier push engine.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Channel** - Addressable push link to one authenticated client endpoint
//! - **MessageQueue** - Per-channel FIFO buffer drained by a transport
//! - **ChannelRegistry** - Process-wide `(auth_id, path)` keyed channel map
//! - **ListenerSet** - New-channel observers notified on start and disposal
//! - **HeartbeatMonitor** - Background sweep that evicts silent channels
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ get_or_create ┌─────────────┐  start   ┌─────────────┐
//! │ Application │──────────────▶│  Registry   │─────────▶│  Listeners  │
//! └─────────────┘               └─────────────┘          └─────────────┘
//!        │ queue                   ▲      │ list_all
//!        ▼                         │      ▼
//! ┌─────────────┐   dispose        │  ┌─────────────┐
//! │   Channel   │──────────────────┘  │  Heartbeat  │
//! │  (+ queue)  │◀────────────────────│   Monitor   │
//! └─────────────┘      evict          └─────────────┘
//!        │ next / heartbeat
//!        ▼
//!   transport drain loop (external)
//! ```

pub mod channel;
pub mod error;
pub mod heartbeat;
pub mod listener;
pub mod queue;
pub mod registry;

pub use channel::{Channel, ChannelInfo, ChannelKey, ChannelOptions, ChannelState, DisposeReason};
pub use error::ChannelError;
pub use heartbeat::{HeartbeatMonitor, MonitorConfig, MonitorHandle, MonitorState, ScanReport};
pub use listener::{
    ChannelListener, DispatchReport, ListenerId, ListenerResult, ListenerSet,
};
pub use queue::{MessageQueue, PushOutcome, QueueCapacity};
pub use registry::{ChannelRegistry, RegistryConfig, RegistryStats};
