//! The opaque message boundary shared by both legs of a relay.
//!
//! The relay never looks inside a payload. Whatever the browser or the
//! upstream agent sends is carried as a [`Frame`] and written out again with
//! the same type and the same bytes.

use bytes::Bytes;
use std::fmt;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// The endpoint is going away (server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// The server hit an unexpected condition.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Reason used when a peer closes without a status of its own.
pub const DEFAULT_CLOSE_REASON: &str = "Connection closed";

/// Status code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_NORMAL, reason)
    }

    /// "Endpoint unavailable", sent to every client while draining.
    pub fn going_away(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_GOING_AWAY, reason)
    }

    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_INTERNAL_ERROR, reason)
    }
}

impl Default for CloseReason {
    fn default() -> Self {
        Self::normal(DEFAULT_CLOSE_REASON)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}

/// A single relayed message.
///
/// Ping and pong are answered by each leg's WebSocket layer and never show
/// up here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Close(Option<CloseReason>),
}

impl Frame {
    pub fn is_binary(&self) -> bool {
        matches!(self, Frame::Binary(_))
    }

    /// Payload size in bytes; zero for close frames.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
            Frame::Close(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
