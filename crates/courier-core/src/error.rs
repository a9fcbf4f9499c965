//! Error types for the channel core.

use crate::channel::{ChannelKey, ChannelState};
use crate::listener::ListenerId;
use thiserror::Error;

/// Channel core errors.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Operation attempted in an incompatible lifecycle state.
    #[error("Channel {key} is {actual}, expected {expected}")]
    InvalidState {
        /// Channel the operation targeted.
        key: ChannelKey,
        /// State the channel was in.
        actual: ChannelState,
        /// State the operation requires.
        expected: ChannelState,
    },

    /// A live channel already holds this key.
    #[error("Live channel already registered for {0}")]
    DuplicateChannel(ChannelKey),

    /// A new-channel listener failed during dispatch.
    #[error("{listener} failed for channel {key}: {message}")]
    Listener {
        /// Listener that failed.
        listener: ListenerId,
        /// Channel being dispatched.
        key: ChannelKey,
        /// Error or panic message.
        message: String,
    },

    /// Maximum number of channels reached.
    #[error("Maximum channels reached ({0})")]
    MaxChannelsReached(usize),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
