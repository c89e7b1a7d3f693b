//! The persistence boundary the relay consumes.
//!
//! The relay never talks to SQL directly: sessions and the router only see
//! [`ChatStore`] and [`SessionVerifier`], so tests can hand them a fresh
//! in-memory repository or a double.

use async_trait::async_trait;

use crate::models::{Conversation, Message, NewMessage, UserId};
use crate::repository::MarketRepository;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The payload was rejected before anything was written.
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Conversation and message storage used by the relay.
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, StoreError>;

    /// Persist a message. Fails with `Validation` for bad content and
    /// `NotFound` when the conversation does not exist.
    async fn create_message(&self, msg: NewMessage) -> Result<Message, StoreError>;

    /// All messages of a conversation, oldest first.
    async fn list_messages_by_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<Message>, StoreError>;
}

/// Resolves a handshake token to the user it was issued to.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> anyhow::Result<Option<UserId>>;
}

#[async_trait]
impl ChatStore for MarketRepository {
    async fn get_conversation(&self, id: i64) -> Result<Option<Conversation>, StoreError> {
        MarketRepository::get_conversation(self, id).await
    }

    async fn create_message(&self, msg: NewMessage) -> Result<Message, StoreError> {
        MarketRepository::create_message(self, &msg).await
    }

    async fn list_messages_by_conversation(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<Message>, StoreError> {
        MarketRepository::list_messages_by_conversation(self, conversation_id).await
    }
}

#[async_trait]
impl SessionVerifier for MarketRepository {
    async fn verify(&self, token: &str) -> anyhow::Result<Option<UserId>> {
        self.get_session_user(token).await
    }
}
