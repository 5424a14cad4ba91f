//! Server-Sent Events chat endpoint.
//!
//! `POST /api/v1/chat` starts one turn and streams every serialized item as
//! an SSE `message` event, ending with the `[DONE]` block.  The resolved
//! thread id is returned in the `x-thread-id` response header so a client
//! that omitted it can continue the conversation.
//!
//! Closing the connection drops the response body and with it the
//! [`TurnStream`](morn_agent::TurnStream), which cancels the turn.

use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderName, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Response header carrying the resolved thread id.
pub const THREAD_ID_HEADER: HeaderName = HeaderName::from_static("x-thread-id");

/// SSE event name used for every streamed item.
pub const MESSAGE_EVENT: &str = "message";

/// One prior message supplied by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Request body for the chat endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Thread to continue.  A new thread is created when absent.
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Plain user input, used when `messages` is empty.
    #[serde(default)]
    pub input: Option<String>,
    /// Client-side transcript; only the last message is sent to the engine.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// The user message for this turn: the last message's content, falling
    /// back to `input`.
    pub fn user_message(&self) -> Option<&str> {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .or(self.input.as_deref())
    }
}

/// POST /api/v1/chat: Stream one conversational turn.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let message = request.user_message().unwrap_or_default().to_owned();

    let turn = state.orchestrator.stream(request.thread_id, message)?;
    let thread_id = turn.thread_id().to_owned();
    tracing::info!(thread_id = %thread_id, "chat stream opened");

    let events = turn.map(|item| Ok::<_, Infallible>(message_event(&item)));
    let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(state.config.keep_alive));

    let mut response = sse.into_response();
    match HeaderValue::from_str(&thread_id) {
        Ok(value) => {
            response.headers_mut().insert(THREAD_ID_HEADER, value);
        }
        Err(e) => tracing::warn!(thread_id = %thread_id, error = %e, "thread id is not a valid header value"),
    }
    Ok(response)
}

/// Frame one item as a `message` event.
///
/// SSE cannot carry a bare carriage return inside `data`, so line endings
/// are normalized to `\n`; each line becomes its own `data:` field.
pub fn message_event(item: &str) -> Event {
    let data = if item.contains('\r') {
        item.replace("\r\n", "\n").replace('\r', "\n")
    } else {
        item.to_owned()
    };
    Event::default().event(MESSAGE_EVENT).data(data)
}
