//! Relay Server
//!
//! Owns the process-wide connection registry and wires every accepted socket
//! to a fresh [`RelaySession`]. Registry state is never persisted: after a
//! restart every client re-authenticates.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{AuthConfig, RelayConfig};
use crate::metrics::RelayMetrics;
use crate::store::{ChatStore, SessionVerifier};

use super::protocol::ServerFrame;
use super::registry::{ConnectionHandle, ConnectionRegistry};
use super::router::MessageRouter;
use super::session::RelaySession;

/// Shared relay wiring. Cheap to clone; every field is reference counted.
#[derive(Clone)]
pub struct RelayServer {
    pub(super) registry: Arc<ConnectionRegistry>,
    pub(super) router: Arc<MessageRouter>,
    pub(super) store: Arc<dyn ChatStore>,
    pub(super) verifier: Arc<dyn SessionVerifier>,
    pub(super) config: Arc<RelayConfig>,
    pub(super) auth: Arc<AuthConfig>,
    pub(super) metrics: Arc<RelayMetrics>,
}

impl RelayServer {
    /// Build a relay with its own, empty registry.
    pub fn new(
        store: Arc<dyn ChatStore>,
        verifier: Arc<dyn SessionVerifier>,
        config: RelayConfig,
        auth: Arc<AuthConfig>,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(MessageRouter::new(
            registry.clone(),
            config.push_timeout,
            metrics.clone(),
        ));
        Self {
            registry,
            router,
            store,
            verifier,
            config: Arc::new(config),
            auth,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<RelayMetrics> {
        &self.metrics
    }

    /// Largest chat frame the session will accept, in bytes.
    pub fn max_frame_bytes(&self) -> usize {
        self.config.max_frame_bytes
    }

    /// Start a session for a new connection. The receiver is that
    /// connection's outbound frame queue; the caller drains it into the socket.
    pub fn open_session(&self) -> (RelaySession, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(self.config.send_channel_capacity);
        let handle = ConnectionHandle::new(tx);
        (RelaySession::new(self.clone(), handle), rx)
    }
}
