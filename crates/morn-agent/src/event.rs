//! Events emitted by a reasoning engine while it executes a turn.
//!
//! An engine reports progress through a single hook,
//! [`crate::engine::EngineHooks::emit`], with one [`EngineEvent`] per
//! callback.  The [`crate::translator::Translator`] turns them into stream
//! items.

use std::fmt;

use serde_json::Value;

pub use crate::llm::types::{AssistantMessage, ToolCall, ToolCallChunk, Usage};

/// Outcome of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    Error,
}

impl fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Error => "error",
        })
    }
}

/// Where in the engine a reported error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    /// The model call failed.
    Llm,
    /// The engine's own processing failed.
    Processing,
    /// A tool failed.
    Tool,
}

impl ErrorStage {
    /// Prefix used in the user-visible error text.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Llm => "LLM error",
            Self::Processing => "Processing error",
            Self::Tool => "Tool error",
        }
    }
}

/// One engine callback.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A model call is about to start with `prompts` input messages.
    LlmStart { prompts: usize },

    /// A streamed model token.  An empty `text` signals a tool-argument
    /// step whose fragments are in `tool_call_chunks`.
    Token {
        text: String,
        tool_call_chunks: Vec<ToolCallChunk>,
    },

    /// A model call finished.
    GenerationComplete { message: AssistantMessage },

    /// A tool is about to run.
    ToolStart {
        call_id: String,
        name: String,
        input: Value,
    },

    /// A tool finished; `output` is its raw result.
    ToolEnd {
        call_id: String,
        name: String,
        status: ToolStatus,
        output: String,
    },

    /// The agent decided on an action.
    AgentAction {
        thought: Option<String>,
        tool: Option<String>,
        tool_input: Option<Value>,
    },

    /// Free-form engine text.
    Text { text: String },

    /// The turn produced its final answer.  `usage` is the token usage of
    /// the generation that produced it.
    TurnFinished {
        output: String,
        usage: Option<Usage>,
    },

    /// Something failed inside the engine.
    Error { stage: ErrorStage, message: String },
}

impl EngineEvent {
    /// A plain streamed token.
    pub fn token(text: impl Into<String>) -> Self {
        Self::Token {
            text: text.into(),
            tool_call_chunks: Vec::new(),
        }
    }

    /// A tool-argument streaming step.
    pub fn tool_arguments(chunks: Vec<ToolCallChunk>) -> Self {
        Self::Token {
            text: String::new(),
            tool_call_chunks: chunks,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::LlmStart { .. } => "llm_start",
            Self::Token { .. } => "token",
            Self::GenerationComplete { .. } => "generation_complete",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolEnd { .. } => "tool_end",
            Self::AgentAction { .. } => "agent_action",
            Self::Text { .. } => "text",
            Self::TurnFinished { .. } => "turn_finished",
            Self::Error { .. } => "error",
        }
    }
}
