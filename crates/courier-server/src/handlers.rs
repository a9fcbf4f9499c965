//! HTTP and WebSocket handlers for the Courier server.
//!
//! Each client connection attaches to exactly one channel, addressed by the
//! `auth_id` and `path` query parameters. Authentication happens upstream.

use crate::config::Config;
use crate::metrics::{self, MetricsListener, SessionMetricsGuard};
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use courier_core::{Channel, ChannelRegistry, DisposeReason, HeartbeatMonitor};
use courier_protocol::{Frame, FrameCodec, Version, VersionError, PROTOCOL_VERSION};
use courier_transport::{
    close_code, close_frame, decode_inbound, drive, encode_batch, poll, ChannelSink, Inbound,
    LongPollConfig, SessionEnd, TransportError,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const MSGPACK: &str = "application/x-msgpack";

/// Shared server state.
pub struct AppState {
    /// Live channels.
    pub registry: ChannelRegistry<Bytes>,
    /// Server configuration.
    pub config: Config,
    /// Frame codec for all transports.
    pub codec: FrameCodec,
    /// Long-poll settings.
    pub long_poll: LongPollConfig,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            registry: ChannelRegistry::with_config(config.registry_config()),
            long_poll: config.long_poll_config(),
            codec: FrameCodec::default(),
            config,
        }
    }

    fn connected_frame(&self, channel: &Channel<Bytes>) -> Frame {
        let hb = &self.config.heartbeat;
        Frame::connected(
            channel.auth_id(),
            channel.path(),
            u32::try_from(hb.interval_ms).unwrap_or(u32::MAX),
            u32::try_from(hb.timeout_ms).unwrap_or(u32::MAX),
        )
    }
}

/// Channel address carried in the query string.
#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    /// Authenticated principal.
    pub auth_id: String,
    /// Logical endpoint.
    pub path: String,
    /// Protocol version the client speaks, `major` or `major.minor`.
    #[serde(default)]
    pub version: Option<String>,
}

impl ChannelQuery {
    /// Refuse clients asking for a protocol this server does not speak.
    fn check_version(&self) -> Result<(), Response> {
        let Some(requested) = self.version.as_deref() else {
            return Ok(());
        };
        match requested
            .parse::<Version>()
            .and_then(|v| PROTOCOL_VERSION.accept(v))
        {
            Ok(_) => Ok(()),
            Err(e @ VersionError::Malformed(_)) => Err(error_response(StatusCode::BAD_REQUEST, e)),
            Err(e @ VersionError::Unsupported { .. }) => {
                debug!(auth_id = %self.auth_id, error = %e, "Refused protocol version");
                Err(error_response(StatusCode::UPGRADE_REQUIRED, e))
            }
        }
    }
}

/// Run the HTTP/WebSocket server until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
        state.registry.register_listener(Arc::new(MetricsListener));
    }

    let monitor = HeartbeatMonitor::new(state.registry.clone(), config.monitor_config())?.spawn();

    let app = build_app(state.clone());

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Courier server listening on {}", addr);
    if config.transport.websocket {
        info!("WebSocket endpoint: ws://{}{}", addr, config.transport.websocket_path);
    }
    if config.transport.long_poll {
        info!("Long-poll endpoint: http://{}{}", addr, config.transport.long_poll_path);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.registry.clone()))
        .await?;

    monitor.shutdown().await;
    let remaining = state.registry.dispose_all(DisposeReason::Shutdown);
    info!(remaining, "Courier server stopped");

    Ok(())
}

/// Wait for Ctrl-C, then release every channel so attached transports detach.
async fn shutdown_signal(registry: ChannelRegistry<Bytes>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
    let disposed = registry.dispose_all(DisposeReason::Shutdown);
    info!(disposed, "Channels disposed for shutdown");
}

/// Build the axum router for the configured endpoints.
pub fn build_app(state: Arc<AppState>) -> Router {
    let transport = &state.config.transport;

    let mut app = Router::new()
        .route("/push", post(push_handler))
        .route("/channels", get(list_handler).delete(delete_handler))
        .route("/health", get(health_handler));

    if transport.websocket {
        app = app.route(&transport.websocket_path, get(ws_handler));
    }
    if transport.long_poll {
        app = app.route(&transport.long_poll_path, get(long_poll_handler));
    }

    app.layer(DefaultBodyLimit::max(state.config.limits.max_message_size))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(serde_json::json!({ "error": message.to_string() }))).into_response()
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let stats = state.registry.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "channels": stats.channel_count,
        "queued": stats.queued_messages,
    }))
    .into_response()
}

/// List live channels.
async fn list_handler(State(state): State<Arc<AppState>>) -> Response {
    let channels: Vec<_> = state.registry.list_all().map(|c| c.info()).collect();
    Json(channels).into_response()
}

/// Dispose a channel on behalf of the application.
async fn delete_handler(
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match state.registry.get(&query.auth_id, &query.path) {
        Some(channel) => {
            channel.dispose_with(DisposeReason::Requested);
            StatusCode::NO_CONTENT.into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, "no such channel"),
    }
}

/// Queue the request body on an existing channel.
async fn push_handler(
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Response {
    let limit = state.config.limits.max_message_size;
    if body.len() > limit {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("message of {} bytes exceeds {}", body.len(), limit),
        );
    }

    let Some(channel) = state.registry.get(&query.auth_id, &query.path) else {
        return error_response(StatusCode::NOT_FOUND, "no such channel");
    };

    channel.queue(body);
    metrics::record_queued();

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": channel.queued_len() })),
    )
        .into_response()
}

/// Long-poll handler.
async fn long_poll_handler(
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Err(response) = query.check_version() {
        return response;
    }

    let channel = match state.registry.get_or_create(&query.auth_id, &query.path) {
        Ok(channel) => channel,
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    };

    let _metrics_guard = SessionMetricsGuard::new("long_poll");
    metrics::record_heartbeat("long_poll");

    let batch = match poll(&channel, &state.long_poll).await {
        Ok(batch) => batch,
        Err(e) => return error_response(StatusCode::GONE, e),
    };
    if batch.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let count = batch.len();
    let bytes: usize = batch.iter().map(Bytes::len).sum();
    match encode_batch(batch, &state.codec) {
        Ok(body) => {
            metrics::record_delivered("long_poll", count, bytes);
            ([(header::CONTENT_TYPE, MSGPACK)], body).into_response()
        }
        Err(e) => {
            // The values are gone from the queue; the client cannot recover them
            warn!(channel = %channel.key(), error = %e, "Failed to encode poll batch");
            metrics::record_error("long_poll");
            channel.dispose_with(DisposeReason::TransportFailure);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ChannelQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if let Err(response) = query.check_version() {
        return response;
    }

    // A new connection supersedes whatever was attached to the key
    let channel = match state
        .registry
        .replace(&query.auth_id, &query.path, DisposeReason::Replaced)
    {
        Ok(channel) => channel,
        Err(e) => return error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    };

    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, channel, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, channel: Arc<Channel<Bytes>>, state: Arc<AppState>) {
    let _metrics_guard = SessionMetricsGuard::new("websocket");

    let (sender, receiver) = socket.split();
    let mut sink = AxumSink::new(sender, state.codec);

    if let Err(e) = sink.send_frame(&state.connected_frame(&channel)).await {
        error!(channel = %channel.key(), error = %e, "Failed to send Connected frame");
        metrics::record_error("websocket");
        channel.dispose_with(DisposeReason::TransportFailure);
        return;
    }

    let end = drive(&channel, &mut sink, inbound_events(receiver, state.codec)).await;
    if matches!(end, SessionEnd::DeliveryFailed(_) | SessionEnd::ReceiveFailed(_)) {
        metrics::record_error("websocket");
    }

    debug!(channel = %channel.key(), delivered = sink.seq, "WebSocket disconnected");
}

/// Outbound half of an axum WebSocket.
struct AxumSink {
    sender: SplitSink<WebSocket, Message>,
    codec: FrameCodec,
    seq: u64,
}

impl AxumSink {
    fn new(sender: SplitSink<WebSocket, Message>, codec: FrameCodec) -> Self {
        Self { sender, codec, seq: 0 }
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let data = self.codec.encode(frame)?;
        self.sender
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(|e| TransportError::DeliveryFailed(e.to_string()))
    }
}

#[async_trait]
impl ChannelSink<Bytes> for AxumSink {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn deliver(&mut self, value: Bytes) -> Result<(), TransportError> {
        self.seq += 1;
        let len = value.len();
        self.send_frame(&Frame::deliver(self.seq, value)).await?;
        metrics::record_delivered("websocket", 1, len);
        Ok(())
    }

    async fn acknowledge_heartbeat(&mut self, timestamp: Option<u64>) -> Result<(), TransportError> {
        metrics::record_heartbeat("websocket");
        self.send_frame(&Frame::heartbeat_ack(timestamp)).await
    }

    async fn close(&mut self, reason: DisposeReason) -> Result<(), TransportError> {
        self.send_frame(&close_frame(reason)).await?;
        let frame = CloseFrame {
            code: close_code(reason),
            reason: reason.as_str().into(),
        };
        self.sender
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}

/// Map incoming axum WebSocket messages to channel events.
fn inbound_events(
    receiver: SplitStream<WebSocket>,
    codec: FrameCodec,
) -> impl Stream<Item = Result<Inbound, TransportError>> + Unpin {
    receiver.map(move |message| match message {
        Ok(Message::Binary(data)) => decode_inbound(&codec, &data),
        // Treat text as binary
        Ok(Message::Text(text)) => decode_inbound(&codec, text.as_bytes()),
        Ok(Message::Ping(_)) => Ok(Inbound::Heartbeat { timestamp: None }),
        Ok(Message::Pong(_)) => Ok(Inbound::Ignored),
        Ok(Message::Close(_)) => Ok(Inbound::Close),
        Err(e) => Err(TransportError::ReceiveFailed(e.to_string())),
    })
}
