//! Manages the lifecycle of one relayed voice-agent connection.
//!
//! A session moves through authentication (before the upgrade), the
//! upstream handshake, forwarding in both directions, and finally closing
//! both sockets. Every failure stays inside its own session.

use super::{frame, upstream};
use crate::{handlers::ApiError, state::AppState};
use axum::{
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header::SEC_WEBSOCKET_PROTOCOL},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use voice_relay_core::{
    CloseReason, RelayError,
    forward::{Direction, PumpExit, Relay, SocketState, close_endpoint, finish_close},
    registry::{ConnectionHandle, ConnectionId},
    shutdown::SHUTDOWN_CLOSE_REASON,
};

/// Bound on each best-effort close while tearing a session down.
const SOCKET_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

const SESSION_END_REASON: &str = "Connection ended";
const UPSTREAM_ERROR_REASON: &str = "Upstream connection error";

/// Axum handler for `GET /api/voice-agent`.
///
/// The upgrade is only accepted when the `Sec-WebSocket-Protocol` header
/// carries a valid `access_token.<token>` entry; that exact entry is echoed
/// back as the selected subprotocol. Only the first header line is read,
/// which is also the only one axum negotiates against.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let connection_id = ConnectionId::generate();

    if state.shutdown.is_shutting_down() {
        info!(%connection_id, "Rejecting upgrade during shutdown");
        return ApiError::ServiceUnavailable("Server shutting down".to_string()).into_response();
    }

    let offered = headers
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok());
    let protocol = match state.tokens.authorize_subprotocols(offered) {
        Ok(protocol) => protocol,
        Err(e) => {
            warn!(%connection_id, error = %e, "Rejecting unauthenticated upgrade");
            return ApiError::Unauthorized.into_response();
        }
    };

    let max_message_bytes = state.config.max_message_bytes;
    ws.protocols([protocol])
        .max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, connection_id))
}

/// Runs one session from the upgraded client socket to teardown.
#[instrument(name = "ws_session", skip_all, fields(connection_id = %connection_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, connection_id: ConnectionId) {
    info!("Client connected to /api/voice-agent");

    let (client_sink, client_stream) = socket.split();
    let mut client_sink = frame::client_sink(client_sink);
    let client_stream = frame::client_stream(client_stream);

    let shutdown = state.shutdown.token();
    let connected = tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Shutdown began during upstream handshake");
            close_endpoint(
                &mut client_sink,
                &SocketState::new(),
                CloseReason::going_away(SHUTDOWN_CLOSE_REASON),
                SOCKET_CLOSE_TIMEOUT,
            )
            .await;
            return;
        }
        connected = upstream::connect(&state.config) => connected,
    };

    let upstream_socket = match connected {
        Ok(socket) => socket,
        Err(e) => {
            error!(error = %e, "Voice agent connection failed");
            close_endpoint(
                &mut client_sink,
                &SocketState::new(),
                CloseReason::internal_error(UPSTREAM_ERROR_REASON),
                SOCKET_CLOSE_TIMEOUT,
            )
            .await;
            return;
        }
    };
    info!("Connected to voice agent");

    let (upstream_sink, upstream_stream) = upstream_socket.split();
    let upstream_sink = frame::upstream_sink(upstream_sink);
    let upstream_stream = frame::upstream_stream(upstream_stream);

    let (handle, mut close_requests) = ConnectionHandle::new(connection_id.clone());
    let registration = state.registry().register(handle);

    let relay = Relay::start(
        (client_stream, client_sink),
        (upstream_stream, upstream_sink),
        CancellationToken::new(),
    );
    let cancel = relay.cancel_token();
    let finished = relay.finish();
    tokio::pin!(finished);

    // A drain that snapshotted the registry before we registered will not
    // send us a request, but its signal is already visible.
    let requested_close = if shutdown.is_cancelled() {
        cancel.cancel();
        Some(CloseReason::going_away(SHUTDOWN_CLOSE_REASON))
    } else {
        None
    };

    let (mut outcome, close_request) = tokio::select! {
        outcome = &mut finished => (outcome, None),
        Some(request) = close_requests.recv() => {
            info!(reason = %request.reason, "Close requested");
            cancel.cancel();
            ((&mut finished).await, Some(request))
        }
    };

    log_exit(Direction::ClientToUpstream, &outcome.outbound);
    log_exit(Direction::UpstreamToClient, &outcome.inbound);

    let client_reason = close_request
        .as_ref()
        .map(|request| request.reason.clone())
        .or(requested_close)
        .unwrap_or_else(|| CloseReason::normal(SESSION_END_REASON));
    if let Some(sink) = outcome.client_sink.as_mut() {
        close_endpoint(sink, &outcome.client_state, client_reason, SOCKET_CLOSE_TIMEOUT).await;
    }
    if let Some(sink) = outcome.upstream_sink.as_mut() {
        close_endpoint(
            sink,
            &outcome.upstream_state,
            CloseReason::normal(SESSION_END_REASON),
            SOCKET_CLOSE_TIMEOUT,
        )
        .await;
    }

    // A peer that sent the first close is still owed the reply.
    if peer_closed(&outcome.outbound)
        && let (Some(stream), Some(sink)) =
            (outcome.client_stream.as_mut(), outcome.client_sink.as_mut())
    {
        finish_close(stream, sink, SOCKET_CLOSE_TIMEOUT).await;
    }
    if peer_closed(&outcome.inbound)
        && let (Some(stream), Some(sink)) =
            (outcome.upstream_stream.as_mut(), outcome.upstream_sink.as_mut())
    {
        finish_close(stream, sink, SOCKET_CLOSE_TIMEOUT).await;
    }

    if let Some(request) = close_request {
        request.acknowledge();
    }
    close_requests.close();
    while let Ok(request) = close_requests.try_recv() {
        request.acknowledge();
    }

    drop(registration);
    info!(active = state.registry().len(), "Connection closed");
}

fn peer_closed(exit: &Option<Result<PumpExit, RelayError>>) -> bool {
    matches!(exit, Some(Ok(PumpExit::Closed(_))))
}

fn log_exit(direction: Direction, exit: &Option<Result<PumpExit, RelayError>>) {
    match exit {
        Some(Ok(PumpExit::Closed(Some(reason)))) => {
            info!(%direction, %reason, "Pump finished after close")
        }
        Some(Ok(PumpExit::Closed(None))) => info!(%direction, "Pump finished after bare close"),
        Some(Ok(PumpExit::Ended)) => info!(%direction, "Pump finished, stream ended"),
        Some(Ok(PumpExit::Cancelled)) => info!(%direction, "Pump cancelled"),
        Some(Err(e)) => warn!(%direction, error = %e, "Pump failed"),
        None => error!(%direction, "Pump task did not complete"),
    }
}
