//! LLM integration layer for the reference engine.
//!
//! - [`types`] -- Core data types (messages, tool calls, generations).
//! - [`client`] -- Streaming HTTP client for OpenAI-compatible APIs.
//! - [`streaming_openai`] -- SSE line parser for OpenAI incremental responses.

pub mod client;
pub mod streaming_openai;
pub mod types;

pub use client::{LlmClient, LlmClientConfig};
pub use streaming_openai::OpenAiStreamAccumulator;
pub use types::{
    AssistantMessage, ChatRequest, Message, Role, StreamDelta, ToolCall, ToolCallChunk,
    ToolDefinition, ToolResult, Usage,
};
