//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the process-wide
//! pieces every handler and session needs: configuration, the session token
//! signer, and the shutdown coordinator with its connection registry.

use crate::config::Config;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::warn;
use voice_relay_core::{
    registry::ConnectionRegistry,
    shutdown::{DEFAULT_DRAIN_TIMEOUT, ShutdownCoordinator},
    token::SessionTokenService,
};

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: Arc<SessionTokenService>,
    pub shutdown: ShutdownCoordinator,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let tokens = match &config.session_secret {
            Some(secret) => SessionTokenService::new(secret.expose_secret().as_bytes()),
            None => {
                warn!("SESSION_SECRET not set; using a random secret, tokens will not survive a restart");
                SessionTokenService::random()
            }
        };
        let registry = Arc::new(ConnectionRegistry::new());

        Self {
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            shutdown: ShutdownCoordinator::new(registry, DEFAULT_DRAIN_TIMEOUT),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.shutdown.registry()
    }
}
