//! WebSocket transport implementation.
//!
//! This module provides a WebSocket-based transport using tokio-tungstenite.
//! Every WebSocket message carries exactly one length-prefixed frame.

use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{Channel, DisposeReason};
use courier_protocol::{Frame, FrameCodec};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    tungstenite::{protocol::WebSocketConfig, Error as WsError, Message},
    WebSocketStream,
};
use tracing::debug;

use crate::session::{drive, SessionEnd};
use crate::traits::{close_frame, decode_inbound, ChannelSink, Inbound, TransportError};

/// Outbound half of a WebSocket attached to a channel.
pub struct WebSocketSink<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    codec: FrameCodec,
    seq: u64,
}

impl<S> WebSocketSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap the write half of a split WebSocket.
    pub fn new(sink: SplitSink<WebSocketStream<S>, Message>, codec: FrameCodec) -> Self {
        Self { sink, codec, seq: 0 }
    }

    /// Sequence number of the last delivered value.
    #[must_use]
    pub fn last_seq(&self) -> u64 {
        self.seq
    }

    /// Send a single frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let data = self.codec.encode(frame)?;
        self.sink
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::DeliveryFailed(e.to_string()))
    }
}

#[async_trait]
impl<S, T> ChannelSink<T> for WebSocketSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: Into<Vec<u8>> + Send + 'static,
{
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn deliver(&mut self, value: T) -> Result<(), TransportError> {
        self.seq += 1;
        let frame = Frame::deliver(self.seq, value.into());
        self.send_frame(&frame).await
    }

    async fn acknowledge_heartbeat(&mut self, timestamp: Option<u64>) -> Result<(), TransportError> {
        self.send_frame(&Frame::heartbeat_ack(timestamp)).await
    }

    async fn close(&mut self, reason: DisposeReason) -> Result<(), TransportError> {
        self.send_frame(&close_frame(reason)).await?;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}

/// Map the read half of a WebSocket to inbound channel events.
pub fn inbound_frames<S>(
    stream: SplitStream<WebSocketStream<S>>,
    codec: FrameCodec,
) -> impl Stream<Item = Result<Inbound, TransportError>> + Unpin
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.map(move |message| classify(message, &codec))
}

fn classify(message: Result<Message, WsError>, codec: &FrameCodec) -> Result<Inbound, TransportError> {
    match message {
        Ok(Message::Binary(data)) => decode_inbound(codec, &data),
        // Some clients only speak text frames
        Ok(Message::Text(text)) => decode_inbound(codec, text.as_bytes()),
        Ok(Message::Ping(_)) => Ok(Inbound::Heartbeat { timestamp: None }),
        Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => Ok(Inbound::Ignored),
        Ok(Message::Close(_)) | Err(WsError::ConnectionClosed) => Ok(Inbound::Close),
        Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
    }
}

/// Handshake configuration limiting inbound message size.
#[must_use]
pub fn handshake_config(max_message_size: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_size);
    config.max_frame_size = Some(max_message_size);
    config
}

/// Run a channel over an established WebSocket.
///
/// Sends `connected` first, then drives the channel until it is disposed or
/// the client goes away.
pub async fn serve_channel<S, T>(
    ws: WebSocketStream<S>,
    channel: Arc<Channel<T>>,
    connected: Frame,
    codec: FrameCodec,
) -> SessionEnd
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    T: Into<Vec<u8>> + Send + 'static,
{
    let (write, read) = ws.split();
    let mut sink = WebSocketSink::new(write, codec);

    if let Err(e) = sink.send_frame(&connected).await {
        debug!(channel = %channel.key(), error = %e, "Handshake frame failed");
        channel.dispose_with(DisposeReason::TransportFailure);
        return SessionEnd::DeliveryFailed(e);
    }

    drive(&channel, &mut sink, inbound_frames(read, codec)).await
}
