use sqlx::sqlite::SqlitePoolOptions;

use crate::models::{Conversation, NewConversation, NewProduct, NewUser, UserId};

/// Create a fresh MarketRepository backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied.
pub async fn test_repository() -> super::MarketRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");

    super::MarketRepository::new(pool)
}

pub async fn seed_user(repo: &super::MarketRepository, username: &str) -> UserId {
    repo.create_user(&NewUser {
        username: username.to_string(),
        email: format!("{username}@example.com"),
        password: "hunter22".to_string(),
        full_name: None,
    })
    .await
    .expect("seed user")
    .id
}

/// Seed buyer "alice" (id 1), seller "bob" (id 2), one product, and their conversation.
pub async fn seed_conversation(repo: &super::MarketRepository) -> Conversation {
    let buyer = seed_user(repo, "alice").await;
    let seller = seed_user(repo, "bob").await;
    let product = repo
        .create_product(&NewProduct {
            seller_id: seller,
            title: "Bicycle".to_string(),
            description: None,
            price: 12_000,
            category: Some("sports".to_string()),
        })
        .await
        .expect("seed product");
    repo.create_conversation(&NewConversation {
        product_id: product.id,
        buyer_id: buyer,
        seller_id: seller,
    })
    .await
    .expect("seed conversation")
}
