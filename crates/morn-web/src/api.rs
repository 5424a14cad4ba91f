//! REST API route handlers.
//!
//! Provides the health probe and thread management endpoints.  Chat
//! streaming lives in [`crate::sse`].

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use morn_store::ConversationTurn;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

// ---------------------------------------------------------------------------
// Thread management endpoints
// ---------------------------------------------------------------------------

/// Response for the thread listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadListResponse {
    pub threads: Vec<String>,
}

/// GET /api/v1/threads: List all thread ids in lexicographic order.
pub async fn list_threads(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ThreadListResponse>, ApiError> {
    let threads = state.store().list().await?.into_iter().collect();
    Ok(Json(ThreadListResponse { threads }))
}

/// Query parameters for the message history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    /// Return only the most recent `limit` turns.
    pub limit: Option<usize>,
}

/// Message history of one thread.
#[derive(Debug, Serialize, Deserialize)]
pub struct ThreadMessagesResponse {
    pub thread_id: String,
    pub messages: Vec<ConversationTurn>,
}

/// GET /api/v1/threads/{id}/messages: Get the history of a thread.
pub async fn get_thread_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<ThreadMessagesResponse>, ApiError> {
    let messages = state
        .store()
        .get_turns(&id, query.limit)
        .await?
        .ok_or_else(|| ApiError::ThreadNotFound(id.clone()))?;
    Ok(Json(ThreadMessagesResponse {
        thread_id: id,
        messages,
    }))
}

/// DELETE /api/v1/threads/{id}: Delete a thread and its history.
pub async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.store().delete(&id).await? {
        tracing::info!(thread_id = %id, "thread deleted");
        Ok(Json(json!({ "message": format!("Thread {id} deleted successfully") })))
    } else {
        Err(ApiError::ThreadNotFound(id))
    }
}
