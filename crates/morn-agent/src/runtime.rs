//! Reference engine: a ReAct loop over an OpenAI-compatible model.
//!
//! Implements the **Reason + Act** loop.  The engine streams a generation
//! from the model, and when the model asks for tools, runs them through the
//! registered [`ToolAdapter`]s and feeds the results back.  This continues
//! until the model produces a final answer or the turn limit is hit.  Every
//! step is reported through [`EngineHooks`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use morn_store::{ConversationTurn, Role as TurnRole};
use serde_json::Value;
use uuid::Uuid;

use crate::engine::{Engine, EngineHooks};
use crate::error::{AgentError, Result};
use crate::event::{EngineEvent, ErrorStage, ToolStatus};
use crate::llm::LlmClient;
use crate::llm::types::{
    AssistantMessage, ChatRequest, Message, StreamDelta, ToolCall, ToolDefinition, ToolResult,
    Usage,
};
use crate::prompts::{PromptContext, PromptSet};

// ---------------------------------------------------------------------------
// Tool adapter trait
// ---------------------------------------------------------------------------

/// Trait for components that execute tool calls on behalf of the engine.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// The unique identifier for this adapter.
    fn adapter_id(&self) -> &str;

    /// Returns the tool definitions this adapter exposes to the LLM.
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    /// Execute a named tool with the given arguments.
    ///
    /// Returns the result as a string suitable for feeding back to the LLM.
    async fn execute(&self, tool_name: &str, arguments: Value) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the ReAct loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of ReAct turns (LLM call + tool execution = 1 turn).
    pub max_turns: u32,

    /// Model identifier; empty means the client default.
    pub model: String,

    /// Optional temperature for sampling.
    pub temperature: Option<f32>,

    /// Optional max tokens per response.
    pub max_tokens: Option<u32>,

    /// Substituted for `{project_id}` in the human prompt.
    pub project_id: String,

    /// Approximate token budget for replayed history.  The oldest turns are
    /// dropped first; `None` replays everything.
    pub max_history_tokens: Option<usize>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            model: String::new(),
            temperature: Some(0.0),
            max_tokens: None,
            project_id: String::new(),
            max_history_tokens: Some(DEFAULT_HISTORY_TOKENS),
        }
    }
}

/// Default bound on replayed history, in approximate tokens.
pub const DEFAULT_HISTORY_TOKENS: usize = 25_000;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// [`Engine`] backed by a streaming OpenAI-compatible model.
pub struct OpenAiEngine {
    llm: Arc<LlmClient>,
    adapters: Vec<Arc<dyn ToolAdapter>>,
    prompts: PromptSet,
    config: AgentConfig,
}

impl OpenAiEngine {
    pub fn new(llm: Arc<LlmClient>, config: AgentConfig) -> Self {
        Self {
            llm,
            adapters: Vec::new(),
            prompts: PromptSet::default(),
            config,
        }
    }

    /// Register a tool adapter.
    pub fn with_adapter(mut self, adapter: Arc<dyn ToolAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Prompts prepended to every conversation.
    pub fn with_prompts(mut self, prompts: PromptSet) -> Self {
        self.prompts = prompts;
        self
    }

    /// Collect all tool definitions from registered adapters.
    fn all_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.adapters
            .iter()
            .flat_map(|a| a.tool_definitions())
            .collect()
    }

    /// Find the adapter that owns a given tool name.
    fn find_adapter_for_tool(&self, tool_name: &str) -> Option<&Arc<dyn ToolAdapter>> {
        self.adapters
            .iter()
            .find(|a| a.tool_definitions().iter().any(|td| td.name == tool_name))
    }

    fn model_name(&self) -> &str {
        if self.config.model.is_empty() {
            self.llm.default_model()
        } else {
            &self.config.model
        }
    }

    /// Stream one generation, forwarding deltas as token events.
    async fn generate(&self, request: &ChatRequest, hooks: &EngineHooks) -> Result<AssistantMessage> {
        self.llm
            .stream_chat(request, |delta| {
                let hooks = hooks.clone();
                async move {
                    let event = match delta {
                        StreamDelta::Text(text) => EngineEvent::token(text),
                        StreamDelta::ToolArguments(chunks) => EngineEvent::tool_arguments(chunks),
                    };
                    hooks.emit(event).await;
                }
            })
            .await
    }

    /// Run a batch of tool calls concurrently, reporting each start and end
    /// in call order.
    async fn execute_tool_calls(&self, calls: &[ToolCall], hooks: &EngineHooks) -> Vec<ToolResult> {
        for call in calls {
            hooks
                .emit(EngineEvent::ToolStart {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                })
                .await;
        }

        let outputs = join_all(calls.iter().map(|call| async move {
            tracing::debug!(tool = %call.name, id = %call.id, "executing tool");
            match self.find_adapter_for_tool(&call.name) {
                Some(adapter) => adapter
                    .execute(&call.name, call.arguments.clone())
                    .await
                    .map_err(|e| match e {
                        AgentError::ToolExecutionFailed { .. } => e,
                        other => AgentError::ToolExecutionFailed {
                            tool_name: call.name.clone(),
                            reason: other.to_string(),
                        },
                    }),
                None => Err(AgentError::UnknownTool {
                    tool_name: call.name.clone(),
                }),
            }
        }))
        .await;

        let mut results = Vec::with_capacity(calls.len());
        for (call, output) in calls.iter().zip(outputs) {
            let (status, content) = match output {
                Ok(content) => (ToolStatus::Success, content),
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "tool execution failed");
                    hooks
                        .emit(EngineEvent::Error {
                            stage: ErrorStage::Tool,
                            message: e.to_string(),
                        })
                        .await;
                    (ToolStatus::Error, format!("Error: {e}"))
                }
            };
            hooks
                .emit(EngineEvent::ToolEnd {
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                    status,
                    output: content.clone(),
                })
                .await;
            results.push(ToolResult {
                tool_call_id: call.id.clone(),
                content,
                is_error: status == ToolStatus::Error,
            });
        }
        results
    }
}

#[async_trait]
impl Engine for OpenAiEngine {
    async fn run(
        &self,
        history: Vec<ConversationTurn>,
        hooks: EngineHooks,
    ) -> Result<Vec<ConversationTurn>> {
        let task_id = Uuid::now_v7();
        let tools = self.all_tool_definitions();
        let max_turns = self.config.max_turns;

        let context = PromptContext {
            timestamp: Utc::now().timestamp_millis(),
            project_id: self.config.project_id.clone(),
        };
        let window = match self.config.max_history_tokens {
            Some(budget) => bound_history(&history, budget),
            None => &history[..],
        };
        if window.len() < history.len() {
            tracing::info!(
                task_id = %task_id,
                dropped = history.len() - window.len(),
                kept = window.len(),
                "history trimmed to the token budget"
            );
        }
        let mut messages = self.prompts.preamble(&context);
        messages.extend(window.iter().map(turn_to_message));

        tracing::info!(
            task_id = %task_id,
            max_turns,
            tool_count = tools.len(),
            history_len = history.len(),
            "starting ReAct loop"
        );

        let mut usage: Option<Usage> = None;
        let mut tool_calls_made = 0usize;

        for turn in 0..max_turns {
            hooks
                .emit(EngineEvent::LlmStart {
                    prompts: messages.len(),
                })
                .await;

            let request = ChatRequest {
                model: self.config.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                temperature: self.config.temperature,
                max_tokens: self.config.max_tokens,
            };

            let generation = match self.generate(&request, &hooks).await {
                Ok(generation) => generation,
                Err(e) => {
                    hooks
                        .emit(EngineEvent::Error {
                            stage: ErrorStage::Llm,
                            message: e.to_string(),
                        })
                        .await;
                    return Err(e);
                }
            };
            if let Some(u) = generation.usage {
                usage = Some(usage.unwrap_or_default() + u);
            }

            if !generation.has_tool_calls() {
                tracing::info!(
                    task_id = %task_id,
                    turns = turn + 1,
                    "ReAct loop completed with text response"
                );
                hooks
                    .emit(EngineEvent::TurnFinished {
                        output: generation.content.clone(),
                        usage: generation.usage,
                    })
                    .await;

                let mut answer = ConversationTurn::assistant(generation.content)
                    .with_metadata("model", Value::from(self.model_name()))
                    .with_metadata("tool_calls", Value::from(tool_calls_made));
                if let Some(usage) = usage {
                    answer = answer.with_metadata("usage", serde_json::to_value(usage)?);
                }
                return Ok(vec![answer]);
            }

            let calls = generation.tool_calls.clone();
            tracing::info!(
                task_id = %task_id,
                turn,
                tool_count = calls.len(),
                tools = ?calls.iter().map(|c| &c.name).collect::<Vec<_>>(),
                "LLM requested tool calls"
            );
            hooks
                .emit(EngineEvent::GenerationComplete {
                    message: generation.clone(),
                })
                .await;
            // The generation block describes the first call; announce the rest.
            for call in calls.iter().skip(1) {
                hooks
                    .emit(EngineEvent::AgentAction {
                        thought: None,
                        tool: Some(call.name.clone()),
                        tool_input: Some(call.arguments.clone()),
                    })
                    .await;
            }

            messages.push(Message::assistant_tool_calls(generation.content, calls.clone()));
            for result in self.execute_tool_calls(&calls, &hooks).await {
                messages.push(Message::tool_result(result.tool_call_id, result.content));
            }
            tool_calls_made += calls.len();
        }

        Err(AgentError::MaxTurnsExceeded { task_id, max_turns })
    }
}

/// Rough token count: four characters per token.
fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// The newest turns whose estimated size fits `budget`.
///
/// The last turn is always kept.  The window starts on a user turn when one
/// is available, so the model never opens on an orphaned answer.
fn bound_history(history: &[ConversationTurn], budget: usize) -> &[ConversationTurn] {
    let mut start = history.len();
    let mut used = 0usize;
    while start > 0 {
        let cost = estimate_tokens(&history[start - 1].content);
        if start < history.len() && used + cost > budget {
            break;
        }
        used += cost;
        start -= 1;
    }
    while start + 1 < history.len() && history[start].role != TurnRole::User {
        start += 1;
    }
    &history[start..]
}

/// Map a stored turn onto a model message.
///
/// Stored tool turns carry no call id, so they are replayed as assistant
/// notes rather than `tool` messages.
fn turn_to_message(turn: &ConversationTurn) -> Message {
    match turn.role {
        TurnRole::User => Message::user(turn.content.clone()),
        TurnRole::Assistant => Message::assistant(turn.content.clone()),
        TurnRole::Tool => Message::assistant(format!("Tool result: {}", turn.content)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
