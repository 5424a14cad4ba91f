//! Agent error types.
//!
//! Each layer of the crate surfaces its own error type:
//!
//! - [`MalformedBlockError`] -- a block or chart payload violates its invariants.
//! - [`TranslationError`] -- an engine event could not be turned into output.
//! - [`AgentError`] -- the reasoning engine (LLM client, tools) failed.
//! - [`SessionError`] -- a conversational turn could not be served.

use std::time::Duration;

use morn_store::StoreError;
use uuid::Uuid;

/// A [`crate::blocks::Block`] or chart payload that violates its invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed block: {reason}")]
pub struct MalformedBlockError {
    /// What is wrong with the block.
    pub reason: String,
}

impl MalformedBlockError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure while converting a single engine event into stream items.
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    /// The resulting block was malformed.
    #[error(transparent)]
    MalformedBlock(#[from] MalformedBlockError),

    /// A payload could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Unified error type for the reasoning engine.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- LLM errors ----------------------------------------------------------
    /// An HTTP request to the LLM provider failed.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The LLM response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The streaming SSE connection was interrupted or produced invalid data.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    /// The API key is missing for a provider that requires one.
    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Runtime errors ------------------------------------------------------
    /// The ReAct loop exceeded the maximum number of allowed turns.
    #[error("react loop exceeded max turns ({max_turns}) for task {task_id}")]
    MaxTurnsExceeded { task_id: Uuid, max_turns: u32 },

    /// A tool call referenced by the LLM does not exist in the registry.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}

/// Failure serving one conversational turn.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request was rejected before any stream started.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The thread store failed.
    #[error("thread store error: {0}")]
    Store(#[from] StoreError),

    /// The engine returned an error.
    #[error("{0}")]
    Engine(#[from] AgentError),

    /// The engine task panicked or was cancelled.
    #[error("engine task aborted: {reason}")]
    EngineAborted { reason: String },

    /// The turn exceeded its configured deadline.
    #[error("turn timed out after {after:?}")]
    TimedOut { after: Duration },
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::EngineAborted {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_error_messages() {
        let err = SessionError::from(AgentError::LlmRequestFailed {
            reason: "boom".into(),
        });
        assert_eq!(err.to_string(), "llm request failed: boom");

        let err = SessionError::TimedOut {
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "turn timed out after 30s");

        let err = SessionError::from(StoreError::Backend("down".into()));
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn translation_error_is_transparent_over_block_errors() {
        let err = TranslationError::from(MalformedBlockError::new("bad data"));
        assert_eq!(err.to_string(), "malformed block: bad data");
    }
}
