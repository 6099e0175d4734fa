//! Connection Registry
//!
//! Tracks every session that is currently forwarding so the shutdown path can
//! find them. The registry never touches a socket: a [`ConnectionHandle`]
//! can only ask the owning session to close and wait for it to confirm.

use crate::{error::DrainError, frame::CloseReason};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::{fmt, sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Short random identifier used for log correlation and registry keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A request, sent to a session, to close its client with `reason`.
#[derive(Debug)]
pub struct CloseRequest {
    pub reason: CloseReason,
    done: oneshot::Sender<()>,
}

impl CloseRequest {
    /// Tells the requester the client socket has been closed.
    pub fn acknowledge(self) {
        let _ = self.done.send(());
    }
}

/// Receiving end held by the session that owns the sockets.
pub type CloseRequests = mpsc::Receiver<CloseRequest>;

/// Registry view of one live session.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    created_at: DateTime<Utc>,
    close_tx: mpsc::Sender<CloseRequest>,
}

impl ConnectionHandle {
    /// Creates a handle plus the receiver its session must poll.
    pub fn new(id: ConnectionId) -> (Self, CloseRequests) {
        let (close_tx, close_rx) = mpsc::channel(1);
        let handle = Self {
            id,
            created_at: Utc::now(),
            close_tx,
        };
        (handle, close_rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Asks the owning session to close its client and waits up to `timeout`
    /// for the acknowledgement.
    ///
    /// A session that has already finished counts as closed.
    pub async fn request_close(
        &self,
        reason: CloseReason,
        timeout: Duration,
    ) -> Result<(), DrainError> {
        let (done, acked) = oneshot::channel();
        let request = CloseRequest { reason, done };

        let exchange = async {
            if self.close_tx.send(request).await.is_err() {
                return Ok(());
            }
            acked
                .await
                .map_err(|_| DrainError::Abandoned(self.id.to_string()))
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| DrainError::Timeout(self.id.to_string()))?
    }
}

/// Concurrent map from connection id to handle.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `handle`; the entry lives exactly as long as the returned guard.
    pub fn register(self: &Arc<Self>, handle: ConnectionHandle) -> Registration {
        let id = handle.id.clone();
        self.connections.insert(id.clone(), handle);
        Registration {
            registry: Arc::clone(self),
            id,
        }
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Clones every handle out of the map so callers can await on them
    /// without holding a shard lock.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// Removes its connection from the registry when dropped.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Registration {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.connections.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_hex() {
        let id = ConnectionId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, ConnectionId::generate());
    }

    #[test]
    fn registration_guard_removes_entry() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, _requests) = ConnectionHandle::new(ConnectionId::generate());
        let id = handle.id().clone();

        let registration = registry.register(handle);
        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);

        drop(registration);
        assert!(!registry.contains(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_does_not_remove_entries() {
        let registry = Arc::new(ConnectionRegistry::new());
        let guards: Vec<_> = (0..3)
            .map(|_| {
                let (handle, requests) = ConnectionHandle::new(ConnectionId::generate());
                (registry.register(handle), requests)
            })
            .collect();

        assert_eq!(registry.snapshot().len(), 3);
        assert_eq!(registry.len(), guards.len());
    }

    #[tokio::test]
    async fn request_close_waits_for_acknowledgement() {
        let (handle, mut requests) = ConnectionHandle::new(ConnectionId::generate());

        let session = tokio::spawn(async move {
            let request = requests.recv().await.expect("close request should arrive");
            assert_eq!(request.reason.code, 1001);
            request.acknowledge();
        });

        handle
            .request_close(CloseReason::going_away("bye"), Duration::from_secs(1))
            .await
            .expect("close should be acknowledged");
        session.await.expect("session task should finish");
    }

    #[tokio::test]
    async fn finished_session_counts_as_closed() {
        let (handle, requests) = ConnectionHandle::new(ConnectionId::generate());
        drop(requests);

        assert!(
            handle
                .request_close(CloseReason::going_away("bye"), Duration::from_millis(50))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn unresponsive_session_times_out() {
        let (handle, _requests) = ConnectionHandle::new(ConnectionId::generate());

        let result = handle
            .request_close(CloseReason::going_away("bye"), Duration::from_millis(50))
            .await;

        assert_eq!(result, Err(DrainError::Timeout(handle.id().to_string())));
    }

    #[tokio::test]
    async fn dropped_request_is_reported() {
        let (handle, mut requests) = ConnectionHandle::new(ConnectionId::generate());

        tokio::spawn(async move {
            let request = requests.recv().await;
            drop(request);
        });

        let result = handle
            .request_close(CloseReason::going_away("bye"), Duration::from_secs(1))
            .await;

        assert_eq!(result, Err(DrainError::Abandoned(handle.id().to_string())));
    }
}
