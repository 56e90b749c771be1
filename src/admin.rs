//! Admin endpoints: product catalog, reference documents and the system prompt.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::ApiError;
use crate::types::{ProductBody, SystemPromptBody};

pub async fn list_products(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let products = state.catalog.list_products().await?;
    Ok(Json(json!({ "success": true, "data": products })))
}

pub async fn create_product(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ProductBody>,
) -> Result<Json<Value>, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("Product name is required"));
    }
    let id = body
        .id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let product = body.into_product(id);
    state.catalog.create_product(&product).await?;
    info!(product_id = %product.id, "product created");
    Ok(Json(json!({ "success": true, "data": product })))
}

pub async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ProductBody>,
) -> Result<Json<Value>, ApiError> {
    let product = body.into_product(id);
    if !state.catalog.update_product(&product).await? {
        return Err(ApiError::not_found("Product not found"));
    }
    Ok(Json(json!({ "success": true, "data": product })))
}

pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.catalog.delete_product(&id).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn list_documents(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let documents = state.documents.list().await?;
    Ok(Json(json!({ "success": true, "data": documents })))
}

/// Stores the multipart `file` field under its own file name.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("invalid multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let Some(name) = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
        else {
            continue;
        };
        let bytes = field
            .bytes()
            .await
            .map_err(|err| ApiError::bad_request(format!("failed to read upload: {err}")))?;

        state.documents.put(&name, &bytes).await?;
        info!(document = %name, size = bytes.len(), "document uploaded");
        return Ok(Json(json!({
            "success": true,
            "data": { "name": name, "size": bytes.len() }
        })));
    }

    Err(ApiError::bad_request("File not provided"))
}

pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.documents.delete(&key).await?;
    Ok(Json(json!({ "success": true })))
}

pub async fn get_system_prompt(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let prompt = state.system_prompt().await?;
    Ok(Json(json!({ "success": true, "data": { "prompt": prompt } })))
}

pub async fn set_system_prompt(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SystemPromptBody>,
) -> Result<Json<Value>, ApiError> {
    let Value::String(prompt) = body.prompt else {
        return Err(ApiError::bad_request("Prompt is required"));
    };
    state.chats.set_system_prompt(&prompt).await?;
    info!(chars = prompt.chars().count(), "system prompt updated");
    Ok(Json(json!({ "success": true })))
}
