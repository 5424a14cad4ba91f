//! Incremental parser for OpenAI-style `chat.completion.chunk` streams.
//!
//! Each SSE `data:` line carries one JSON chunk whose `choices[0].delta`
//! holds either a content fragment or tool-call fragments.  The stream ends
//! with `data: [DONE]`.  [`OpenAiStreamAccumulator`] turns every line into at
//! most one [`StreamDelta`] and assembles the complete [`AssistantMessage`].

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{AgentError, Result};
use crate::llm::types::{AssistantMessage, StreamDelta, ToolCall, ToolCallChunk, Usage};

/// Payload that terminates the stream.
const DONE_SENTINEL: &str = "[DONE]";

/// Highest tool-call index accepted from the upstream.
const MAX_TOOL_CALL_INDEX: usize = 127;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Option<Vec<Choice>>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// A tool call under construction, keyed by its `index` in the stream.
#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    fn finish(self) -> Result<ToolCall> {
        let arguments = if self.arguments.trim().is_empty() {
            Value::Object(Map::new())
        } else {
            serde_json::from_str(&self.arguments).map_err(|e| AgentError::LlmParseFailed {
                reason: format!("arguments of tool call `{}` are not JSON: {e}", self.name),
            })?
        };
        Ok(ToolCall {
            id: self.id,
            name: self.name,
            arguments,
        })
    }
}

/// Folds stream lines into one generation.
#[derive(Debug, Default)]
pub struct OpenAiStreamAccumulator {
    text: String,
    calls: Vec<PendingCall>,
    usage: Option<Usage>,
    done: bool,
}

impl OpenAiStreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once the `[DONE]` line has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one line of the event stream.
    ///
    /// Lines that are not `data:` fields, or chunks without a delta, yield
    /// `Ok(None)`.  A payload that is not a valid chunk is an error.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<StreamDelta>> {
        let Some(data) = line.trim_end().strip_prefix("data:").map(str::trim) else {
            return Ok(None);
        };
        if data == DONE_SENTINEL {
            self.done = true;
            return Ok(None);
        }

        let chunk: Chunk = serde_json::from_str(data).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("malformed stream chunk: {e}"),
        })?;

        // Usage usually arrives on its own, with an empty `choices` array.
        if let Some(usage) = chunk.usage {
            let total = self.usage.get_or_insert_with(Usage::default);
            if let Some(n) = usage.prompt_tokens {
                total.input_tokens = n;
            }
            if let Some(n) = usage.completion_tokens {
                total.output_tokens = n;
            }
        }

        let Some(delta) = chunk.choices.into_iter().flatten().next().and_then(|c| c.delta) else {
            return Ok(None);
        };

        if let Some(fragments) = delta.tool_calls.filter(|f| !f.is_empty()) {
            let chunks = fragments
                .into_iter()
                .map(|fragment| self.absorb(fragment))
                .collect::<Result<_>>()?;
            return Ok(Some(StreamDelta::ToolArguments(chunks)));
        }

        match delta.content {
            Some(content) if !content.is_empty() => {
                self.text.push_str(&content);
                Ok(Some(StreamDelta::Text(content)))
            }
            _ => Ok(None),
        }
    }

    /// Merge one tool-call fragment into its pending call.
    fn absorb(&mut self, fragment: ToolCallFragment) -> Result<ToolCallChunk> {
        if fragment.index > MAX_TOOL_CALL_INDEX {
            return Err(AgentError::LlmParseFailed {
                reason: format!(
                    "tool call index {} exceeds {MAX_TOOL_CALL_INDEX}",
                    fragment.index
                ),
            });
        }
        if self.calls.len() <= fragment.index {
            self.calls.resize_with(fragment.index + 1, PendingCall::default);
        }
        let call = &mut self.calls[fragment.index];
        let function = fragment.function.unwrap_or_default();

        if let Some(id) = &fragment.id {
            call.id.clone_from(id);
        }
        if let Some(name) = &function.name {
            call.name.push_str(name);
        }
        let args = function.arguments.unwrap_or_default();
        call.arguments.push_str(&args);

        Ok(ToolCallChunk {
            index: fragment.index,
            id: fragment.id,
            name: function.name,
            args,
        })
    }

    /// Finish the generation.  Fails if a tool call's arguments are not JSON.
    pub fn into_message(self) -> Result<AssistantMessage> {
        let tool_calls = self
            .calls
            .into_iter()
            .map(PendingCall::finish)
            .collect::<Result<Vec<_>>>()?;
        Ok(AssistantMessage {
            content: self.text,
            tool_calls,
            usage: self.usage,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
