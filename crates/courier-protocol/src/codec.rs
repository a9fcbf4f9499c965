//! Length-prefixed MessagePack codec.
//!
//! Every frame on the wire is a 4-byte big-endian body length followed by the
//! MessagePack-encoded [`Frame`]. Several frames may be concatenated, which is
//! how long-poll responses carry a batch.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Default maximum frame body size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds the codec's size limit.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Body size of the offending frame.
        size: usize,
        /// Limit in force.
        max: usize,
    },

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Frame codec with a configurable size limit.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec that rejects bodies larger than `max_frame_size`.
    ///
    /// The limit is capped at `u32::MAX`, the largest length the prefix can
    /// carry.
    #[must_use]
    pub const fn new(max_frame_size: usize) -> Self {
        let max_frame_size = if max_frame_size > u32::MAX as usize {
            u32::MAX as usize
        } else {
            max_frame_size
        };
        Self { max_frame_size }
    }

    /// Get the size limit.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Append an encoded frame to `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or encoding fails.
    pub fn encode_into(&self, frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        let body = rmp_serde::to_vec_named(frame)?;
        self.check_size(body.len())?;

        buf.reserve(LENGTH_PREFIX_SIZE + body.len());
        // check_size bounds the body by the capped limit
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(&body);
        Ok(())
    }

    /// Encode a frame into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode_into(frame, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Read the body length from a prefix, if enough bytes are present.
    fn body_len(&self, data: &[u8]) -> Result<Option<usize>, ProtocolError> {
        let Some(prefix) = data.get(..LENGTH_PREFIX_SIZE) else {
            return Ok(None);
        };
        let len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        self.check_size(len)?;
        Ok(Some(len))
    }

    /// Decode exactly one frame from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is incomplete, too large, or invalid.
    pub fn decode(&self, data: &[u8]) -> Result<Frame, ProtocolError> {
        let Some(len) = self.body_len(data)? else {
            return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
        };
        let end = LENGTH_PREFIX_SIZE + len;
        if data.len() < end {
            return Err(ProtocolError::Incomplete(end - data.len()));
        }
        Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..end])?)
    }

    /// Decode the next frame from a streaming buffer, consuming its bytes.
    ///
    /// Returns `Ok(None)` and leaves the buffer untouched if a full frame has
    /// not arrived yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large or invalid.
    pub fn decode_from(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let Some(len) = self.body_len(buf)? else {
            return Ok(None);
        };
        if buf.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_SIZE);
        let body = buf.split_to(len);
        Ok(Some(rmp_serde::from_slice(&body)?))
    }
}

/// Encode a frame with the default size limit.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    FrameCodec::default().encode(frame)
}

/// Append an encoded frame to `buf` with the default size limit.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    FrameCodec::default().encode_into(frame, buf)
}

/// Decode one frame with the default size limit.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    FrameCodec::default().decode(data)
}

/// Decode the next frame from a streaming buffer with the default size limit.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    FrameCodec::default().decode_from(buf)
}
