//! Opens the server-side connection to the remote voice agent.

use crate::config::Config;
use secrecy::ExposeSecret;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
        protocol::WebSocketConfig,
    },
};
use tracing::{debug, info};
use voice_relay_core::RelayError;

/// Upper bound on the upstream TCP + TLS + WebSocket handshake.
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the configured voice-agent URL with the server's own API key.
///
/// No subprotocol is requested, so an upstream that selects one fails the
/// handshake.
pub async fn connect(config: &Config) -> Result<UpstreamSocket, RelayError> {
    let mut request = config
        .upstream_url
        .as_str()
        .into_client_request()
        .map_err(|e| RelayError::UpstreamConnect(format!("invalid upstream URL: {e}")))?;
    let authorization = format!("Token {}", config.deepgram_api_key.expose_secret())
        .parse::<HeaderValue>()
        .map_err(|_| RelayError::UpstreamConnect("API key is not a valid header value".into()))?;
    request.headers_mut().insert(AUTHORIZATION, authorization);

    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(config.max_message_bytes))
        .max_frame_size(Some(config.max_message_bytes));

    info!(url = %config.upstream_url, "Connecting to voice agent");
    let (socket, response) = tokio::time::timeout(
        UPSTREAM_CONNECT_TIMEOUT,
        connect_async_with_config(request, Some(ws_config), true),
    )
    .await
    .map_err(|_| {
        RelayError::UpstreamConnect(format!(
            "handshake timed out after {}s",
            UPSTREAM_CONNECT_TIMEOUT.as_secs()
        ))
    })?
    .map_err(|e| RelayError::UpstreamConnect(e.to_string()))?;

    debug!(status = %response.status(), "Upstream handshake complete");
    Ok(socket)
}
