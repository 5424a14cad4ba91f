//! Conversation thread model and the [`ThreadStore`] contract.
//!
//! A thread is an ordered, append-only list of [`ConversationTurn`]s keyed by
//! an opaque id.  Backends implement [`ThreadStore`]; the session layer only
//! ever talks to the trait.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Longest thread id accepted from clients.
pub const MAX_THREAD_ID_LEN: usize = 128;

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Input from the human user.
    User,
    /// Output from the agent.
    Assistant,
    /// Result of a tool invocation.
    Tool,
}

impl Role {
    /// Lowercase wire name of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single turn of a conversation.  Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Who produced this turn.
    pub role: Role,
    /// Textual content of the turn.
    pub content: String,
    /// Free-form metadata (tool call ids, usage, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// When the turn was created.
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn with the given role and content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a tool turn.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Attach a metadata entry, creating the mapping on first use.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

/// Snapshot of a conversation thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    /// Opaque thread identifier.
    pub thread_id: String,
    /// Turns in arrival order.
    pub turns: Vec<ConversationTurn>,
    /// When the thread was created.
    pub created_at: DateTime<Utc>,
    /// When the last turn was appended.
    pub updated_at: DateTime<Utc>,
}

impl ThreadState {
    /// Create an empty thread.
    pub fn new(thread_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The most recently appended turn, if any.
    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Number of turns in the thread.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Returns `true` if the thread has no turns.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub(crate) fn extend(&mut self, turns: Vec<ConversationTurn>) {
        self.updated_at = Utc::now();
        self.turns.extend(turns);
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Store contract
// ═══════════════════════════════════════════════════════════════════════

/// Keyed, append-only conversation history.
///
/// Operations on distinct thread ids must not block each other; operations
/// on the same id are serialized by the backend.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// Fetch a snapshot of a thread.  An unknown id yields `Ok(None)`.
    async fn get(&self, thread_id: &str) -> StoreResult<Option<ThreadState>>;

    /// Append a batch of turns as one write, creating the thread if it does
    /// not exist yet.  Either every turn lands or none does, and no other
    /// append to the same thread interleaves with the batch.
    async fn append_all(&self, thread_id: &str, turns: Vec<ConversationTurn>) -> StoreResult<()>;

    /// Append a single turn.
    async fn append(&self, thread_id: &str, turn: ConversationTurn) -> StoreResult<()> {
        self.append_all(thread_id, vec![turn]).await
    }

    /// Delete a thread.  Returns `true` if it existed.
    async fn delete(&self, thread_id: &str) -> StoreResult<bool>;

    /// Ids of every thread currently held.
    async fn list(&self) -> StoreResult<BTreeSet<String>>;

    /// The most recent `limit` turns of a thread in chronological order, or
    /// every turn when `limit` is `None`.
    async fn get_turns(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> StoreResult<Option<Vec<ConversationTurn>>> {
        Ok(self.get(thread_id).await?.map(|state| {
            let turns = state.turns;
            match limit {
                Some(n) if n < turns.len() => turns[turns.len() - n..].to_vec(),
                _ => turns,
            }
        }))
    }
}

/// Generate a fresh, time-ordered thread id.
pub fn new_thread_id() -> String {
    Uuid::now_v7().to_string()
}

/// Check that a client-supplied thread id is usable as a store key.
pub fn validate_thread_id(thread_id: &str) -> StoreResult<()> {
    if thread_id.trim().is_empty() {
        return Err(StoreError::InvalidArgument("thread id is empty".into()));
    }
    if thread_id.len() > MAX_THREAD_ID_LEN {
        return Err(StoreError::InvalidArgument(format!(
            "thread id exceeds {MAX_THREAD_ID_LEN} bytes"
        )));
    }
    if thread_id.chars().any(char::is_control) {
        return Err(StoreError::InvalidArgument(
            "thread id contains control characters".into(),
        ));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        let role: Role = serde_json::from_str("\"tool\"").unwrap();
        assert_eq!(role, Role::Tool);
        assert_eq!(Role::User.to_string(), "user");
    }

    #[test]
    fn turn_metadata_is_omitted_when_absent() {
        let turn = ConversationTurn::user("hello");
        let v = serde_json::to_value(&turn).unwrap();
        assert_eq!(v["role"], "user");
        assert_eq!(v["content"], "hello");
        assert!(v.get("metadata").is_none());
    }

    #[test]
    fn with_metadata_accumulates_entries() {
        let turn = ConversationTurn::assistant("done")
            .with_metadata("tool_calls", Value::from(2))
            .with_metadata("model", Value::from("deepseek-chat"));
        let meta = turn.metadata.unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta["tool_calls"], 2);
    }

    #[test]
    fn thread_id_validation() {
        assert!(validate_thread_id("thread-1").is_ok());
        assert!(validate_thread_id("   ").is_err());
        assert!(validate_thread_id("bad\nid").is_err());
        assert!(validate_thread_id(&"x".repeat(MAX_THREAD_ID_LEN + 1)).is_err());
    }

    #[test]
    fn generated_ids_are_unique_and_valid() {
        let a = new_thread_id();
        let b = new_thread_id();
        assert_ne!(a, b);
        assert!(validate_thread_id(&a).is_ok());
    }
}
