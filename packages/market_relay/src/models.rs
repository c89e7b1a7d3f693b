use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Opaque numeric identifier for a user. Buyer/seller is a per-conversation role.
pub type UserId = i64;

/// Longest chat message the store accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Current time as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// Users
// =============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: i64,
}

/// Fields accepted when registering a user. `password` is plaintext until hashed.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

/// User info safe to hand back to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
        }
    }
}

// =============================================================================
// Products
// =============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub seller_id: UserId,
    pub title: String,
    pub description: Option<String>,
    /// Price in minor currency units.
    pub price: i64,
    pub category: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub seller_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: i64,
    #[serde(default)]
    pub category: Option<String>,
}

// =============================================================================
// Conversations
// =============================================================================

/// A two-party chat thread about one product. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub product_id: i64,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    pub product_id: i64,
    pub buyer_id: UserId,
    pub seller_id: UserId,
}

/// The sender is neither the buyer nor the seller of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("user {sender} is not a party to conversation {conversation_id}")]
pub struct NotAParty {
    pub conversation_id: i64,
    pub sender: UserId,
}

impl Conversation {
    /// The other party of this conversation, as seen from `sender`.
    pub fn counterpart_of(&self, sender: UserId) -> Result<UserId, NotAParty> {
        if sender == self.buyer_id {
            Ok(self.seller_id)
        } else if sender == self.seller_id {
            Ok(self.buyer_id)
        } else {
            Err(NotAParty {
                conversation_id: self.id,
                sender,
            })
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A persisted chat message. Append-only: created once, never edited.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: UserId,
    pub content: String,
    /// Unix epoch milliseconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: UserId,
    pub content: String,
}

// =============================================================================
// Sessions
// =============================================================================

/// A login session. Only the SHA-256 digest of the bearer token is stored.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token_hash: String,
    pub user_id: UserId,
    pub expires_at: i64,
}
