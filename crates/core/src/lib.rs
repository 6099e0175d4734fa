//! Transport-agnostic core of the voice-agent relay.
//!
//! Nothing in here knows about HTTP or a particular WebSocket library. The
//! service crate adapts its sockets into streams and sinks of [`Frame`] and
//! hands them to the [`forward`] engine.

pub mod error;
pub mod forward;
pub mod frame;
pub mod registry;
pub mod shutdown;
pub mod token;

pub use error::{AuthError, DrainError, RelayError};
pub use frame::{CloseReason, Frame};
