//! Request/response side of chat: conversation setup and message history.
//!
//! History is the catch-up path for anything the relay failed to push live,
//! so clients read it whenever they (re)open a conversation.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::error::ApiError;
use crate::AppState;
use crate::models::{NewConversation, NewMessage, UserId};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    user_id: Option<String>,
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(params): Query<ConversationQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let raw = params
        .user_id
        .ok_or_else(|| ApiError::bad_request("User ID is required"))?;
    let user_id: UserId = raw
        .parse()
        .map_err(|_| ApiError::bad_request("Invalid user ID"))?;

    let conversations = state
        .repository
        .list_conversations_for_user(user_id)
        .await
        .map_err(|e| ApiError::from_store("Failed to fetch conversations", e))?;
    Ok(Json(serde_json::json!({ "conversations": conversations })))
}

/// Create a conversation, or return the existing one for the same
/// (product, buyer, seller) triple.
pub async fn create_conversation(
    State(state): State<AppState>,
    Json(new): Json<NewConversation>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = &state.repository;

    let product_exists = repo
        .get_product(new.product_id)
        .await
        .map_err(|e| ApiError::internal("Failed to create conversation", e))?
        .is_some();
    if !product_exists {
        return Err(ApiError::bad_request("Product does not exist"));
    }
    for (id, missing) in [
        (new.buyer_id, "Buyer does not exist"),
        (new.seller_id, "Seller does not exist"),
    ] {
        let exists = repo
            .get_user(id)
            .await
            .map_err(|e| ApiError::internal("Failed to create conversation", e))?
            .is_some();
        if !exists {
            return Err(ApiError::bad_request(missing));
        }
    }

    let (conversation, created) = repo
        .find_or_create_conversation(&new)
        .await
        .map_err(|e| ApiError::from_store("Failed to create conversation", e))?;

    if !created {
        return Ok((
            StatusCode::OK,
            Json(serde_json::json!({
                "conversation": conversation,
                "message": "Conversation already exists",
            })),
        ));
    }
    tracing::info!(
        conversation_id = conversation.id,
        product_id = conversation.product_id,
        "Conversation created"
    );

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "conversation": conversation,
            "message": "Conversation created successfully",
        })),
    ))
}

pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = &state.repository;
    if repo
        .get_conversation(conversation_id)
        .await
        .map_err(|e| ApiError::from_store("Failed to fetch messages", e))?
        .is_none()
    {
        return Err(ApiError::not_found("Conversation not found"));
    }

    let messages = repo
        .list_messages_by_conversation(conversation_id)
        .await
        .map_err(|e| ApiError::from_store("Failed to fetch messages", e))?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    sender_id: UserId,
    content: String,
}

/// Persist a message without live delivery.
pub async fn create_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let repo = &state.repository;
    if repo
        .get_conversation(conversation_id)
        .await
        .map_err(|e| ApiError::from_store("Failed to send message", e))?
        .is_none()
    {
        return Err(ApiError::not_found("Conversation not found"));
    }

    let message = repo
        .create_message(&NewMessage {
            conversation_id,
            sender_id: req.sender_id,
            content: req.content,
        })
        .await
        .map_err(|e| ApiError::from_store("Failed to send message", e))?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": message,
            "status": "Message sent successfully",
        })),
    ))
}
