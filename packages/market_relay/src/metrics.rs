//! Relay metrics for observability
//!
//! Counters for connection lifecycle and message flow through the relay.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Connection metrics
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,
    /// Successful handshakes
    pub authentications: AtomicU64,

    // Message metrics
    /// Frames received from clients
    pub frames_received: AtomicU64,
    /// Chat messages durably stored
    pub messages_persisted: AtomicU64,
    /// Live pushes that reached the counterpart's outbound queue
    pub pushes_delivered: AtomicU64,
    /// Counterpart offline, or push failed/timed out
    pub delivery_misses: AtomicU64,

    // Error metrics
    /// Malformed or out-of-state frames
    pub protocol_errors: AtomicU64,
    /// Chat frames the store rejected or failed on
    pub persistence_errors: AtomicU64,
    /// Senders that are not a party to the conversation
    pub routing_errors: AtomicU64,

    start_time: Option<Instant>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn authenticated(&self) {
        self.authentications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_persisted(&self) {
        self.messages_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn push_delivered(&self) {
        self.pushes_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivery_missed(&self) {
        self.delivery_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn routing_error(&self) {
        self.routing_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
                authenticated: self.authentications.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                frames_received: self.frames_received.load(Ordering::Relaxed),
                persisted: self.messages_persisted.load(Ordering::Relaxed),
                delivered: self.pushes_delivered.load(Ordering::Relaxed),
                delivery_misses: self.delivery_misses.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                protocol: self.protocol_errors.load(Ordering::Relaxed),
                persistence: self.persistence_errors.load(Ordering::Relaxed),
                routing: self.routing_errors.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
    pub authenticated: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub frames_received: u64,
    pub persisted: u64,
    pub delivered: u64,
    pub delivery_misses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub protocol: u64,
    pub persistence: u64,
    pub routing: u64,
}
