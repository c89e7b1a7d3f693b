use super::MarketRepository;
use crate::models::{MAX_MESSAGE_CHARS, Message, NewMessage, now_millis};
use crate::store::{StoreError, StoreResult};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, created_at";

fn validate_content(content: &str) -> StoreResult<()> {
    if content.trim().is_empty() {
        return Err(StoreError::Validation("message content is empty".into()));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(StoreError::Validation(format!(
            "message content exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(())
}

impl MarketRepository {
    /// Append a message to an existing conversation.
    ///
    /// `created_at` is assigned inside the INSERT as the later of the wall
    /// clock and one past the conversation's newest message, so it is
    /// strictly increasing per conversation even within one millisecond or
    /// across a clock step backwards.
    pub async fn create_message(&self, msg: &NewMessage) -> StoreResult<Message> {
        validate_content(&msg.content)?;

        if self.get_conversation(msg.conversation_id).await?.is_none() {
            return Err(StoreError::NotFound(format!(
                "conversation {} not found",
                msg.conversation_id
            )));
        }

        let message = sqlx::query_as::<_, Message>(&format!(
            "INSERT INTO messages (conversation_id, sender_id, content, created_at)
             VALUES (?, ?, ?, MAX(?, COALESCE(
                 (SELECT MAX(created_at) + 1 FROM messages WHERE conversation_id = ?), 0)))
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(msg.conversation_id)
        .bind(msg.sender_id)
        .bind(&msg.content)
        .bind(now_millis())
        .bind(msg.conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(message)
    }

    /// Full history of a conversation in reading order (oldest first).
    pub async fn list_messages_by_conversation(
        &self,
        conversation_id: i64,
    ) -> StoreResult<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{MAX_MESSAGE_CHARS, NewMessage};
    use crate::repository::test_helpers;
    use crate::store::StoreError;

    fn new_message(conversation_id: i64, sender_id: i64, content: &str) -> NewMessage {
        NewMessage {
            conversation_id,
            sender_id,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_list_in_order() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        for (sender, text) in [
            (conv.buyer_id, "is it still available?"),
            (conv.seller_id, "yes"),
            (conv.buyer_id, "great"),
        ] {
            repo.create_message(&new_message(conv.id, sender, text))
                .await
                .unwrap();
        }

        let history = repo.list_messages_by_conversation(conv.id).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["is it still available?", "yes", "great"]);
        assert_eq!(history[1].sender_id, conv.seller_id);

        // Reading twice returns the same set
        let again = repo.list_messages_by_conversation(conv.id).await.unwrap();
        assert_eq!(history, again);
    }

    #[tokio::test]
    async fn empty_content_is_a_validation_error() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        let err = repo
            .create_message(&new_message(conv.id, conv.buyer_id, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let too_long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        let err = repo
            .create_message(&new_message(conv.id, conv.buyer_id, &too_long))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        assert!(
            repo.list_messages_by_conversation(conv.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let repo = test_helpers::test_repository().await;
        let err = repo
            .create_message(&new_message(404, 1, "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_senders_read_back_in_time_order() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        let conv_id = conv.id;
        let mut tasks = Vec::new();
        for i in 0..20 {
            let repo = repo.clone();
            let sender = if i % 2 == 0 {
                conv.buyer_id
            } else {
                conv.seller_id
            };
            tasks.push(tokio::spawn(async move {
                repo.create_message(&new_message(conv_id, sender, &format!("msg {i}")))
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let history = repo.list_messages_by_conversation(conv.id).await.unwrap();
        assert_eq!(history.len(), 20);
        assert!(
            history
                .windows(2)
                .all(|pair| pair[0].created_at < pair[1].created_at)
        );
    }

    #[tokio::test]
    async fn back_to_back_messages_get_distinct_timestamps() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        let mut created = Vec::new();
        for i in 0..20 {
            let msg = repo
                .create_message(&new_message(conv.id, conv.buyer_id, &format!("burst {i}")))
                .await
                .unwrap();
            created.push(msg.created_at);
        }
        assert!(created.windows(2).all(|pair| pair[0] < pair[1]));

        let history = repo.list_messages_by_conversation(conv.id).await.unwrap();
        let read_back: Vec<_> = history.iter().map(|m| m.created_at).collect();
        assert_eq!(read_back, created);
    }

    #[tokio::test]
    async fn timestamps_never_move_backwards() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        // A row stamped in the future, as if the clock stepped back afterwards
        let future = crate::models::now_millis() + 60_000;
        sqlx::query(
            "INSERT INTO messages (conversation_id, sender_id, content, created_at)
             VALUES (?, ?, 'from the future', ?)",
        )
        .bind(conv.id)
        .bind(conv.seller_id)
        .bind(future)
        .execute(&repo.pool)
        .await
        .unwrap();

        let next = repo
            .create_message(&new_message(conv.id, conv.buyer_id, "now"))
            .await
            .unwrap();
        assert_eq!(next.created_at, future + 1);
    }

    #[tokio::test]
    async fn conversations_are_isolated() {
        let repo = test_helpers::test_repository().await;
        let conv = test_helpers::seed_conversation(&repo).await;

        repo.create_message(&new_message(conv.id, conv.buyer_id, "mine"))
            .await
            .unwrap();

        assert!(
            repo.list_messages_by_conversation(conv.id + 1)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
