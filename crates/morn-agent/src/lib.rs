//! Agent streaming core for Morn.
//!
//! This crate turns a black-box reasoning engine into a well-formed,
//! cancellable stream of typed content blocks, and keeps per-thread history
//! so a stateless request can resume a multi-turn conversation.
//!
//! ## Architecture
//!
//! ```text
//!  request ─▶ SessionOrchestrator ──get/append──▶ ThreadStore
//!                   │
//!                   ▼ open
//!             StreamBridge ◀─push── EngineHooks ◀─emit── Engine (task)
//!                   │                   │
//!                   │              Translator ─▶ Block / text
//!                   ▼ drain
//!              TurnStream ─▶ transport (SSE)
//! ```
//!
//! ## Modules
//!
//! - [`blocks`] -- Typed content blocks (text, chart).
//! - [`event`] -- Engine callback events.
//! - [`translator`] -- Event to block translation.
//! - [`bridge`] -- Background task to pull-stream hand-off.
//! - [`engine`] -- The engine contract and its hooks.
//! - [`session`] -- Per-request turn orchestration.
//! - [`llm`], [`runtime`], [`prompts`] -- Reference OpenAI-compatible engine.
//! - [`error`] -- Error types.

pub mod blocks;
pub mod bridge;
pub mod engine;
pub mod error;
pub mod event;
pub mod llm;
pub mod prompts;
pub mod runtime;
pub mod session;
pub mod translator;

// Re-export the most commonly used types at the crate root.
pub use blocks::{Block, BlockType, ChartContent, DONE_MARKER, Dataset, TextContent};
pub use bridge::{BridgeConfig, BridgeSender, DrainOutcome, OpenBridge, StreamBridge, StreamItem};
pub use engine::{Engine, EngineHooks};
pub use error::{AgentError, MalformedBlockError, Result, SessionError, TranslationError};
pub use event::{EngineEvent, ErrorStage, ToolStatus};
pub use llm::{LlmClient, LlmClientConfig};
pub use prompts::{PromptContext, PromptSet};
pub use runtime::{AgentConfig, OpenAiEngine, ToolAdapter};
pub use session::{SessionConfig, SessionOrchestrator, TurnStream};
pub use translator::{DEFAULT_CHART_TOOL, Translator, TranslatorConfig};
