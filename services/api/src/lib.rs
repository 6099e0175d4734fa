//! Voice Agent Relay API Library Crate
//!
//! This library contains the HTTP and WebSocket surface of the relay: the
//! configuration, the shared application state, the REST handlers, and the
//! per-connection session logic. The relay engine itself lives in
//! `voice-relay-core`; the `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
