//! Shutdown Coordinator
//!
//! On termination the listener stops taking new upgrades and every session
//! still in the registry is asked to close its client with "endpoint
//! unavailable". Each close is bounded on its own, so one stuck connection
//! cannot hold up the rest.

use crate::{
    frame::CloseReason,
    registry::{ConnectionId, ConnectionRegistry},
};
use futures::future::join_all;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long a single connection gets to close during a drain.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Reason sent to clients when the server goes down.
pub const SHUTDOWN_CLOSE_REASON: &str = "Server shutting down";

/// Result of one drain pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub closed: usize,
    pub failed: Vec<ConnectionId>,
}

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    registry: Arc<ConnectionRegistry>,
    signal: CancellationToken,
    per_connection_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, per_connection_timeout: Duration) -> Self {
        Self {
            registry,
            signal: CancellationToken::new(),
            per_connection_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Cancelled once shutdown has begun.
    pub fn token(&self) -> CancellationToken {
        self.signal.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Marks the server as shutting down, then drains the registry.
    pub async fn shutdown(&self) -> DrainReport {
        self.signal.cancel();
        self.drain().await
    }

    /// Closes every registered connection with a bounded wait each.
    pub async fn drain(&self) -> DrainReport {
        let handles = self.registry.snapshot();
        info!(
            active = handles.len(),
            "Shutting down, closing active connections"
        );

        let timeout = self.per_connection_timeout;
        let results = join_all(handles.iter().map(|handle| async move {
            let result = handle
                .request_close(CloseReason::going_away(SHUTDOWN_CLOSE_REASON), timeout)
                .await;
            (handle.id().clone(), result)
        }))
        .await;

        let mut report = DrainReport::default();
        for (id, result) in results {
            match result {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Error closing connection");
                    report.failed.push(id);
                }
            }
        }

        info!(
            closed = report.closed,
            failed = report.failed.len(),
            "All connections closed"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::CLOSE_GOING_AWAY,
        registry::{ConnectionHandle, ConnectionId},
    };
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn drains_every_registered_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let coordinator = ShutdownCoordinator::new(registry.clone(), Duration::from_secs(1));
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        for _ in 0..3 {
            let (handle, mut requests) = ConnectionHandle::new(ConnectionId::generate());
            let registration = registry.register(handle);
            let seen_tx = seen_tx.clone();
            tokio::spawn(async move {
                if let Some(request) = requests.recv().await {
                    seen_tx.send(request.reason.clone()).unwrap();
                    drop(registration);
                    request.acknowledge();
                }
            });
        }
        drop(seen_tx);

        let report = coordinator.shutdown().await;

        assert!(coordinator.is_shutting_down());
        assert_eq!(report.closed, 3);
        assert!(report.failed.is_empty());
        let mut reasons = Vec::new();
        while let Some(reason) = seen_rx.recv().await {
            reasons.push(reason);
        }
        assert_eq!(reasons.len(), 3);
        assert!(reasons.iter().all(|r| r.code == CLOSE_GOING_AWAY));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn stuck_connection_does_not_block_the_rest() {
        let registry = Arc::new(ConnectionRegistry::new());
        let coordinator = ShutdownCoordinator::new(registry.clone(), Duration::from_millis(100));

        let (stuck, _stuck_requests) = ConnectionHandle::new(ConnectionId::generate());
        let stuck_id = stuck.id().clone();
        let _stuck_registration = registry.register(stuck);

        let (healthy, mut healthy_requests) = ConnectionHandle::new(ConnectionId::generate());
        let _healthy_registration = registry.register(healthy);
        tokio::spawn(async move {
            if let Some(request) = healthy_requests.recv().await {
                request.acknowledge();
            }
        });

        let report = coordinator.shutdown().await;

        assert_eq!(report.closed, 1);
        assert_eq!(report.failed, vec![stuck_id]);
    }

    #[tokio::test]
    async fn empty_registry_drains_immediately() {
        let coordinator = ShutdownCoordinator::new(
            Arc::new(ConnectionRegistry::new()),
            DEFAULT_DRAIN_TIMEOUT,
        );
        let token = coordinator.token();

        assert_eq!(coordinator.shutdown().await, DrainReport::default());
        assert!(token.is_cancelled());
    }
}
