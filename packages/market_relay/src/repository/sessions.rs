//! Login sessions. The bearer token is handed to the client once; only its
//! SHA-256 digest is stored.

use anyhow::Result;
use rand::Rng;
use sha2::{Digest, Sha256};

use super::MarketRepository;
use crate::models::{Session, UserId, now_millis};

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    bytes_to_hex(&bytes)
}

fn token_digest(token: &str) -> String {
    bytes_to_hex(&Sha256::digest(token.as_bytes()))
}

impl MarketRepository {
    /// Create a session for `user_id` and return the plaintext bearer token.
    pub async fn create_session(&self, user_id: UserId, ttl_secs: u64) -> Result<String> {
        let token = generate_token();
        let ttl_millis = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let session = Session {
            token_hash: token_digest(&token),
            user_id,
            expires_at: now_millis().saturating_add(ttl_millis),
        };

        sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(&session.token_hash)
            .bind(session.user_id)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await?;

        Ok(token)
    }

    /// Resolve a bearer token to its user. Unknown and expired tokens yield `None`.
    pub async fn get_session_user(&self, token: &str) -> Result<Option<UserId>> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT token_hash, user_id, expires_at FROM sessions WHERE token_hash = ?",
        )
        .bind(token_digest(token))
        .fetch_optional(&self.pool)
        .await?;

        Ok(session
            .filter(|s| s.expires_at > now_millis())
            .map(|s| s.user_id))
    }

    pub async fn delete_session(&self, token: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(token_digest(token))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove expired sessions, returning how many were deleted.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::repository::test_helpers;

    #[tokio::test]
    async fn token_resolves_to_user() {
        let repo = test_helpers::test_repository().await;
        let alice = test_helpers::seed_user(&repo, "alice").await;

        let token = repo.create_session(alice, 3600).await.unwrap();
        assert_eq!(token.len(), 64);
        assert_eq!(repo.get_session_user(&token).await.unwrap(), Some(alice));
        assert_eq!(repo.get_session_user("bogus").await.unwrap(), None);
    }

    #[tokio::test]
    async fn tokens_are_unique() {
        let repo = test_helpers::test_repository().await;
        let alice = test_helpers::seed_user(&repo, "alice").await;

        let a = repo.create_session(alice, 3600).await.unwrap();
        let b = repo.create_session(alice, 3600).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn expired_sessions_are_ignored_and_cleaned() {
        let repo = test_helpers::test_repository().await;
        let alice = test_helpers::seed_user(&repo, "alice").await;

        let token = repo.create_session(alice, 0).await.unwrap();
        assert_eq!(repo.get_session_user(&token).await.unwrap(), None);

        let live = repo.create_session(alice, 3600).await.unwrap();
        assert_eq!(repo.cleanup_expired_sessions().await.unwrap(), 1);
        assert_eq!(repo.get_session_user(&live).await.unwrap(), Some(alice));
    }

    #[tokio::test]
    async fn logout_deletes_session() {
        let repo = test_helpers::test_repository().await;
        let alice = test_helpers::seed_user(&repo, "alice").await;

        let token = repo.create_session(alice, 3600).await.unwrap();
        assert!(repo.delete_session(&token).await.unwrap());
        assert!(!repo.delete_session(&token).await.unwrap());
        assert_eq!(repo.get_session_user(&token).await.unwrap(), None);
    }
}
