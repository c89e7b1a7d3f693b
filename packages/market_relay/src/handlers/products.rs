use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use super::error::ApiError;
use crate::AppState;
use crate::models::NewProduct;

#[derive(Deserialize)]
pub struct ProductQuery {
    category: Option<String>,
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ProductQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let products = state
        .repository
        .list_products(params.category.as_deref())
        .await
        .map_err(|e| ApiError::internal("Failed to fetch products", e))?;
    Ok(Json(serde_json::json!({ "products": products })))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match state.repository.get_product(id).await {
        Ok(Some(product)) => Ok(Json(serde_json::json!({ "product": product }))),
        Ok(None) => Err(ApiError::not_found("Product not found")),
        Err(e) => Err(ApiError::internal("Failed to fetch product", e)),
    }
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(new_product): Json<NewProduct>,
) -> Result<impl IntoResponse, ApiError> {
    if new_product.title.trim().is_empty() {
        return Err(ApiError::bad_request("Title is required"));
    }
    if new_product.price < 0 {
        return Err(ApiError::bad_request("Price cannot be negative"));
    }
    let seller_exists = state
        .repository
        .get_user(new_product.seller_id)
        .await
        .map_err(|e| ApiError::internal("Failed to create product", e))?
        .is_some();
    if !seller_exists {
        return Err(ApiError::bad_request("Seller does not exist"));
    }

    let product = state
        .repository
        .create_product(&new_product)
        .await
        .map_err(|e| ApiError::internal("Failed to create product", e))?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "product": product,
            "message": "Product created successfully",
        })),
    ))
}
