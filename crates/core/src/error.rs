//! Error taxonomy for the relay engine.

use crate::forward::Direction;

/// Reasons a WebSocket upgrade is refused. Surfaced to clients as HTTP 401.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no access_token subprotocol offered")]
    MissingToken,
    #[error("session token is invalid or expired")]
    InvalidToken,
}

/// Per-session failures. None of these ever leave the session that hit them.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),
    #[error("upstream connection failed: {0}")]
    UpstreamConnect(String),
    #[error("transport failure on {direction}: {message}")]
    Transport {
        direction: Direction,
        message: String,
    },
}

/// A connection that could not be closed during a drain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DrainError {
    #[error("connection {0} did not close within the drain timeout")]
    Timeout(String),
    #[error("connection {0} dropped the close request")]
    Abandoned(String),
}
