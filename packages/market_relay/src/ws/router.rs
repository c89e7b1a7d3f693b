//! Message Router
//!
//! Best-effort live delivery of a persisted message to the other party of its
//! conversation. Misses are never retried or queued; the history endpoint is
//! the catch-up path.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics::RelayMetrics;
use crate::models::{Conversation, Message, UserId};

use super::protocol::ServerFrame;
use super::registry::{ConnectionRegistry, PushError};

/// What happened to a live push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered { recipient: UserId },
    /// No registered connection for the recipient.
    RecipientOffline { recipient: UserId },
    /// The recipient's connection closed or stayed full past the push timeout.
    PushFailed {
        recipient: UserId,
        reason: PushError,
    },
    /// The sender is not buyer or seller of the conversation.
    NotAParty,
}

pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    push_timeout: Duration,
    metrics: Arc<RelayMetrics>,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        push_timeout: Duration,
        metrics: Arc<RelayMetrics>,
    ) -> Self {
        Self {
            registry,
            push_timeout,
            metrics,
        }
    }

    pub async fn route(&self, message: &Message, conversation: &Conversation) -> Delivery {
        let recipient = match conversation.counterpart_of(message.sender_id) {
            Ok(recipient) => recipient,
            Err(e) => {
                warn!(message_id = message.id, "Skipping delivery: {}", e);
                self.metrics.routing_error();
                return Delivery::NotAParty;
            }
        };

        let Some(handle) = self.registry.lookup(recipient).await else {
            debug!(
                message_id = message.id,
                recipient, "Recipient offline, delivery skipped"
            );
            self.metrics.delivery_missed();
            return Delivery::RecipientOffline { recipient };
        };

        let frame = ServerFrame::Message {
            data: message.clone(),
        };
        match handle.push(frame, self.push_timeout).await {
            Ok(()) => {
                self.metrics.push_delivered();
                Delivery::Delivered { recipient }
            }
            Err(reason) => {
                debug!(
                    message_id = message.id,
                    recipient,
                    conn_id = handle.id(),
                    "Push failed ({}), delivery skipped",
                    reason
                );
                self.metrics.delivery_missed();
                Delivery::PushFailed { recipient, reason }
            }
        }
    }
}
