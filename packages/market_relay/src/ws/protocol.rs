//! Relay Protocol Types
//!
//! JSON frames exchanged over the relay WebSocket, one object per text frame,
//! discriminated by a snake_case `type` field.

use serde::{Deserialize, Serialize};

use crate::models::{Message, UserId};

/// Generic reply to any frame that fails to parse.
pub const MALFORMED_FRAME: &str = "Invalid message format";

/// Frames sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Handshake; must precede any chat frame on the connection.
    #[serde(rename_all = "camelCase")]
    Auth {
        user_id: UserId,
        /// Session token issued at login. Required only when the server
        /// is configured to verify handshakes.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Chat {
        conversation_id: i64,
        content: String,
    },
}

/// Frames sent FROM the server TO the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted; the connection is now reachable by `user_id`.
    #[serde(rename_all = "camelCase")]
    Authenticated { user_id: UserId },

    /// Live push of a message written by the other party.
    Message { data: Message },

    /// Acknowledgment to the sender, sent once the message is persisted.
    MessageSent { data: Message },

    Error { message: String },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}
