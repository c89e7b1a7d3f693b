use super::MarketRepository;
use crate::models::{Conversation, NewConversation, UserId, now_millis};
use crate::store::{StoreError, StoreResult};

const CONVERSATION_COLUMNS: &str = "id, product_id, buyer_id, seller_id, created_at";

/// A dangling product or user reference is bad input, not a server fault.
fn insert_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StoreError::Validation(
            "product, buyer or seller does not exist".into(),
        ),
        _ => StoreError::Database(err),
    }
}

fn check_parties(new: &NewConversation) -> StoreResult<()> {
    if new.buyer_id == new.seller_id {
        return Err(StoreError::Validation(
            "buyer and seller must be different users".into(),
        ));
    }
    Ok(())
}

impl MarketRepository {
    /// Insert a new conversation. A second insert for the same
    /// (product, buyer, seller) triple fails on the unique index.
    pub async fn create_conversation(&self, new: &NewConversation) -> StoreResult<Conversation> {
        check_parties(new)?;

        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            "INSERT INTO conversations (product_id, buyer_id, seller_id, created_at)
             VALUES (?, ?, ?, ?)
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(new.product_id)
        .bind(new.buyer_id)
        .bind(new.seller_id)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(insert_error)?;
        Ok(conversation)
    }

    /// Return the conversation for this triple, creating it if needed. The
    /// flag is true when this call created it. Safe under concurrent callers:
    /// the losing insert is absorbed by `ON CONFLICT` and re-read.
    pub async fn find_or_create_conversation(
        &self,
        new: &NewConversation,
    ) -> StoreResult<(Conversation, bool)> {
        check_parties(new)?;

        let inserted = sqlx::query_as::<_, Conversation>(&format!(
            "INSERT INTO conversations (product_id, buyer_id, seller_id, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT (product_id, buyer_id, seller_id) DO NOTHING
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(new.product_id)
        .bind(new.buyer_id)
        .bind(new.seller_id)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await
        .map_err(insert_error)?;

        if let Some(conversation) = inserted {
            return Ok((conversation, true));
        }
        let existing = self
            .get_conversation_by_parties(new.product_id, new.buyer_id, new.seller_id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound("conversation vanished after conflicting insert".into())
            })?;
        Ok((existing, false))
    }

    pub async fn get_conversation(&self, id: i64) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    pub async fn get_conversation_by_parties(
        &self,
        product_id: i64,
        buyer_id: UserId,
        seller_id: UserId,
    ) -> StoreResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE product_id = ? AND buyer_id = ? AND seller_id = ?"
        ))
        .bind(product_id)
        .bind(buyer_id)
        .bind(seller_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(conversation)
    }

    /// Conversations where the user is buyer or seller, newest first.
    pub async fn list_conversations_for_user(
        &self,
        user_id: UserId,
    ) -> StoreResult<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE buyer_id = ? OR seller_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{NewConversation, NewProduct};
    use crate::repository::test_helpers;
    use crate::store::StoreError;

    #[tokio::test]
    async fn lookup_by_parties() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        let found = repo
            .get_conversation_by_parties(conv.product_id, conv.buyer_id, conv.seller_id)
            .await
            .unwrap();
        assert_eq!(found, Some(conv.clone()));

        // Roles are not interchangeable
        let swapped = repo
            .get_conversation_by_parties(conv.product_id, conv.seller_id, conv.buyer_id)
            .await
            .unwrap();
        assert!(swapped.is_none());
    }

    #[tokio::test]
    async fn duplicate_triple_rejected() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        let dup = repo
            .create_conversation(&NewConversation {
                product_id: conv.product_id,
                buyer_id: conv.buyer_id,
                seller_id: conv.seller_id,
            })
            .await;
        assert!(matches!(dup, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn find_or_create_reuses_existing() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;
        let triple = NewConversation {
            product_id: conv.product_id,
            buyer_id: conv.buyer_id,
            seller_id: conv.seller_id,
        };

        let (found, created) = repo.find_or_create_conversation(&triple).await.unwrap();
        assert!(!created);
        assert_eq!(found, conv);
    }

    #[tokio::test]
    async fn concurrent_find_or_create_yields_one_conversation() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;
        let carol = test_helpers::seed_user(&repo, "carol").await;
        let triple = NewConversation {
            product_id: conv.product_id,
            buyer_id: carol,
            seller_id: conv.seller_id,
        };

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            tasks.push(tokio::spawn(async move {
                repo.find_or_create_conversation(&triple).await.unwrap()
            }));
        }
        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
        let id = results[0].0.id;
        assert!(results.iter().all(|(c, _)| c.id == id));
    }

    #[tokio::test]
    async fn unknown_party_is_a_validation_error() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        let result = repo
            .find_or_create_conversation(&NewConversation {
                product_id: conv.product_id,
                buyer_id: 999,
                seller_id: conv.seller_id,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn buyer_and_seller_must_differ() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        let result = repo
            .create_conversation(&NewConversation {
                product_id: conv.product_id,
                buyer_id: conv.seller_id,
                seller_id: conv.seller_id,
            })
            .await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn list_for_user_covers_both_roles() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;
        let carol = test_helpers::seed_user(&repo, "carol").await;

        // carol sells a lamp to bob
        let lamp = repo
            .create_product(&NewProduct {
                seller_id: carol,
                title: "Lamp".into(),
                description: None,
                price: 900,
                category: None,
            })
            .await
            .unwrap();
        let second = repo
            .create_conversation(&NewConversation {
                product_id: lamp.id,
                buyer_id: conv.seller_id,
                seller_id: carol,
            })
            .await
            .unwrap();

        let bobs = repo
            .list_conversations_for_user(conv.seller_id)
            .await
            .unwrap();
        assert_eq!(bobs.len(), 2);
        assert_eq!(bobs[0].id, second.id);

        let alices = repo
            .list_conversations_for_user(conv.buyer_id)
            .await
            .unwrap();
        assert_eq!(alices, vec![conv]);

        assert!(repo.list_conversations_for_user(999).await.unwrap().is_empty());
    }
}
