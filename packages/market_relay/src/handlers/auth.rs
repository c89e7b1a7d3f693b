//! Account registration and login. Login issues the session token that the
//! relay handshake carries when token verification is enabled.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use serde::Deserialize;

use super::error::ApiError;
use crate::AppState;
use crate::models::{NewUser, UserInfo};

const MIN_PASSWORD_CHARS: usize = 6;

fn validate_new_user(user: &NewUser) -> Result<(), ApiError> {
    if user.username.trim().is_empty() {
        return Err(ApiError::bad_request("Username is required"));
    }
    if !user.email.contains('@') {
        return Err(ApiError::bad_request("Invalid email address"));
    }
    if user.password.chars().count() < MIN_PASSWORD_CHARS {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_CHARS} characters"
        )));
    }
    Ok(())
}

pub async fn register_handler(
    State(state): State<AppState>,
    Json(new_user): Json<NewUser>,
) -> Result<impl IntoResponse, ApiError> {
    validate_new_user(&new_user)?;

    let repo = &state.repository;
    if repo
        .get_user_by_email(&new_user.email)
        .await
        .map_err(|e| ApiError::internal("Failed to create account", e))?
        .is_some()
    {
        return Err(ApiError::bad_request("Email already in use"));
    }
    if repo
        .get_user_by_username(&new_user.username)
        .await
        .map_err(|e| ApiError::internal("Failed to create account", e))?
        .is_some()
    {
        return Err(ApiError::bad_request("Username already in use"));
    }

    let user = repo
        .create_user(&new_user)
        .await
        .map_err(|e| ApiError::internal("Failed to create account", e))?;
    tracing::info!(user_id = user.id, "Registered user {}", user.username);

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "user": UserInfo::from(user),
            "message": "User created successfully",
        })),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

pub async fn login_handler(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.email.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }

    let user = state
        .repository
        .verify_user_password(&req.email, &req.password)
        .await
        .map_err(|e| ApiError::internal("Login failed", e))?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    let token = state
        .repository
        .create_session(user.id, state.auth_config.session_ttl_secs)
        .await
        .map_err(|e| ApiError::internal("Login failed", e))?;

    Ok(Json(serde_json::json!({
        "user": UserInfo::from(user),
        "token": token,
    })))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or_else(|| ApiError::unauthorized("Missing token"))?;
    state
        .repository
        .delete_session(token)
        .await
        .map_err(|e| ApiError::internal("Logout failed", e))?;
    Ok(StatusCode::NO_CONTENT)
}
