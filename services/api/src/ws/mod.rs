//! WebSocket Relay
//!
//! This module contains the per-connection side of the relay:
//!
//! - `frame`: Maps axum and tungstenite messages onto the core `Frame`.
//! - `upstream`: Opens the authenticated connection to the voice agent.
//! - `session`: Authenticates the upgrade and runs one relay session end to end.

pub mod frame;
pub mod session;
pub mod upstream;

pub use session::ws_handler;
