//! Connection Registry
//!
//! Maps an authenticated user to the one live connection that can currently
//! reach them. A second login silently replaces the first mapping; the old
//! socket stays open but is no longer reachable through the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::models::UserId;

use super::protocol::ServerFrame;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("connection closed")]
    Closed,
    #[error("push timed out")]
    TimedOut,
}

/// Write capability for one connected client: the sending half of that
/// connection's outbound frame queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<ServerFrame>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame, waiting at most `timeout` for room in a full queue.
    pub async fn push(&self, frame: ServerFrame, timeout: Duration) -> Result<(), PushError> {
        self.tx
            .send_timeout(frame, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Closed(_) => PushError::Closed,
                SendTimeoutError::Timeout(_) => PushError::TimedOut,
            })
    }

    /// Queue a frame on our own connection, waiting for room.
    pub async fn send(&self, frame: ServerFrame) -> Result<(), PushError> {
        self.tx.send(frame).await.map_err(|_| PushError::Closed)
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// Thread-safe user → connection map. Every operation takes the lock once
/// and never holds it across an await point.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `user_id`. Returns the orphaned handle, if any.
    pub async fn register(
        &self,
        user_id: UserId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut entries = self.entries.write().await;
        entries.insert(user_id, handle)
    }

    /// Absence means the user is offline; callers skip delivery.
    pub async fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        let entries = self.entries.read().await;
        entries.get(&user_id).cloned()
    }

    /// Remove the entry only if it still belongs to `connection_id`, so a stale
    /// disconnect cannot evict a newer connection for the same user.
    pub async fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get(&user_id) {
            Some(current) if current.id == connection_id => {
                entries.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Number of reachable users.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
