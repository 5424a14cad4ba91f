//! Engine event translation.
//!
//! [`Translator::translate`] maps one [`EngineEvent`] to zero or more
//! [`StreamItem`]s.  Output order follows input order.  A failure while
//! building a block never propagates: it is logged and reported to the client
//! as a `Processing error: ...` text block, and the stream carries on.

use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::blocks::{Block, ChartContent};
use crate::bridge::StreamItem;
use crate::error::TranslationError;
use crate::event::{
    AssistantMessage, EngineEvent, ErrorStage, ToolCall, ToolCallChunk, ToolStatus, Usage,
};

/// Tool name whose results are rendered as charts by default.
pub const DEFAULT_CHART_TOOL: &str = "format_chart";

/// Options controlling what the translator emits.
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Results of this tool are rendered as chart blocks.
    pub chart_tool: String,
    /// Emit a diagnostic text item when a tool starts.
    pub tool_start_diagnostics: bool,
    /// Emit token usage as an extra text block after each generation.
    pub emit_token_usage: bool,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            chart_tool: DEFAULT_CHART_TOOL.to_owned(),
            tool_start_diagnostics: false,
            emit_token_usage: false,
        }
    }
}

/// Per-turn timestamps used only for duration logging.
#[derive(Debug, Default)]
struct TimeMetrics {
    engine_start: Option<Instant>,
    tool_start: Option<Instant>,
}

fn elapsed_ms(since: Option<Instant>) -> Option<u64> {
    since.map(|t| t.elapsed().as_millis() as u64)
}

/// Stateful event translator, one per turn.
#[derive(Debug)]
pub struct Translator {
    config: TranslatorConfig,
    metrics: TimeMetrics,
}

impl Translator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self {
            config,
            metrics: TimeMetrics::default(),
        }
    }

    /// Translate one event.  Never fails.
    pub fn translate(&mut self, event: EngineEvent) -> Vec<StreamItem> {
        let name = event.name();
        match self.try_translate(event) {
            Ok(items) => items,
            Err(err) => {
                error!(event = name, error = %err, "event translation failed");
                vec![error_block(ErrorStage::Processing, &err.to_string()).into()]
            }
        }
    }

    fn try_translate(&mut self, event: EngineEvent) -> Result<Vec<StreamItem>, TranslationError> {
        match event {
            EngineEvent::LlmStart { prompts } => {
                self.metrics.engine_start = Some(Instant::now());
                info!(prompts, "llm start");
                Ok(Vec::new())
            }

            EngineEvent::Token {
                text,
                tool_call_chunks,
            } => Ok(translate_token(text, &tool_call_chunks)),

            EngineEvent::GenerationComplete { message } => {
                info!(
                    elapsed_ms = elapsed_ms(self.metrics.engine_start),
                    tool_calls = message.tool_calls.len(),
                    "generation complete"
                );
                let mut items = vec![Block::text(describe_generation(&message)).into()];
                items.extend(self.usage_block(message.usage.as_ref())?);
                Ok(items)
            }

            EngineEvent::ToolStart {
                call_id,
                name,
                input,
            } => {
                self.metrics.tool_start = Some(Instant::now());
                debug!(tool = %name, call_id = %call_id, "tool start");
                if self.config.tool_start_diagnostics {
                    Ok(vec![StreamItem::Text(format!(
                        "Starting tool `{name}` (call {call_id}) with input: {input}"
                    ))])
                } else {
                    Ok(Vec::new())
                }
            }

            EngineEvent::ToolEnd {
                call_id,
                name,
                status,
                output,
            } => {
                info!(
                    tool = %name,
                    call_id = %call_id,
                    %status,
                    elapsed_ms = elapsed_ms(self.metrics.tool_start),
                    "tool end"
                );
                let parsed = serde_json::from_str::<Value>(&output).ok();

                if name == self.config.chart_tool
                    && let Some(content) = parsed.as_ref().and_then(chart_payload)
                {
                    let chart = ChartContent::from_tool_payload(content)?;
                    return Ok(vec![Block::chart(chart).into()]);
                }

                let rendered = match parsed {
                    Some(v) => format!("```json\n{}\n```", serde_json::to_string_pretty(&v)?),
                    None => output,
                };
                Ok(vec![Block::text(describe_tool_result(&call_id, &name, status, &rendered)).into()])
            }

            EngineEvent::AgentAction {
                thought,
                tool,
                tool_input,
            } => {
                let mut parts = Vec::with_capacity(2);
                if let Some(thought) = thought.filter(|t| !t.is_empty()) {
                    parts.push(format!("Thought: {thought}"));
                }
                if let Some(tool) = tool.filter(|t| !t.is_empty()) {
                    let input = tool_input.map(|v| v.to_string()).unwrap_or_default();
                    parts.push(format!("Tool: {tool}\nInput: {input}"));
                }
                if parts.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![Block::text(parts.join("\n")).into()])
                }
            }

            EngineEvent::Text { text } => Ok(vec![StreamItem::Text(text)]),

            EngineEvent::TurnFinished { output, usage } => {
                info!(elapsed_ms = elapsed_ms(self.metrics.engine_start), "turn finished");
                let mut items = vec![Block::text(output).into()];
                items.extend(self.usage_block(usage.as_ref())?);
                Ok(items)
            }

            EngineEvent::Error { stage, message } => {
                error!(stage = stage.label(), error = %message, "engine reported error");
                Ok(vec![error_block(stage, &message).into()])
            }
        }
    }
}

impl Translator {
    /// The usage JSON as a text block, when enabled and reported.
    fn usage_block(&self, usage: Option<&Usage>) -> Result<Option<StreamItem>, TranslationError> {
        match usage {
            Some(usage) if self.config.emit_token_usage => {
                Ok(Some(Block::text(serde_json::to_string(usage)?).into()))
            }
            _ => Ok(None),
        }
    }
}

/// Text block reporting a failure at `stage`.
pub fn error_block(stage: ErrorStage, message: &str) -> Block {
    Block::text(format!("{}: {message}", stage.label()))
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn translate_token(text: String, chunks: &[ToolCallChunk]) -> Vec<StreamItem> {
    if !text.is_empty() {
        return vec![StreamItem::Text(text)];
    }
    // TODO: an empty model token and a tool-argument step look the same here;
    // distinguish them once engines tag argument steps explicitly.
    let args: String = chunks.iter().map(|c| c.args.as_str()).collect();
    if args.is_empty() {
        Vec::new()
    } else {
        vec![StreamItem::Text(args)]
    }
}

fn describe_generation(message: &AssistantMessage) -> String {
    match message.tool_calls.first() {
        Some(call) => format!("{}\n{}", message.content, describe_tool_call(call)),
        None => message.content.clone(),
    }
}

fn describe_tool_call(call: &ToolCall) -> String {
    format!(
        "\nCalling tool:\n\
         | Field | Value |\n\
         |-------|-------|\n\
         | Tool call ID | {} |\n\
         | Tool name | {} |\n\
         | Arguments | {} |\n",
        call.id, call.name, call.arguments
    )
}

fn describe_tool_result(call_id: &str, name: &str, status: ToolStatus, content: &str) -> String {
    format!(
        "\n**Tool ID**: {call_id}\n\
         **Tool name**: {name}\n\
         **Status**: {status}\n\
         **Content**:\n\
         {content}\n"
    )
}

/// `content` of a chart tool result, when it carries datasets.
fn chart_payload(value: &Value) -> Option<&Map<String, Value>> {
    value
        .as_object()?
        .get("content")?
        .as_object()
        .filter(|content| content.contains_key("datasets"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::BlockType;
    use crate::event::Usage;
    use serde_json::json;

    fn translator() -> Translator {
        Translator::new(TranslatorConfig::default())
    }

    fn block_text(item: &StreamItem) -> &str {
        match item {
            StreamItem::Block(b) => b.as_text().unwrap(),
            StreamItem::Text(t) => panic!("expected block, got text {t:?}"),
        }
    }

    #[test]
    fn tokens_pass_through() {
        let items = translator().translate(EngineEvent::token("Hel"));
        assert_eq!(items, vec![StreamItem::Text("Hel".into())]);
    }

    #[test]
    fn empty_token_emits_concatenated_tool_arguments() {
        let chunks = vec![
            ToolCallChunk {
                index: 0,
                id: Some("c1".into()),
                name: Some("lookup".into()),
                args: "{\"q\":".into(),
            },
            ToolCallChunk {
                args: "\"x\"}".into(),
                ..Default::default()
            },
        ];
        let items = translator().translate(EngineEvent::tool_arguments(chunks));
        assert_eq!(items, vec![StreamItem::Text("{\"q\":\"x\"}".into())]);

        assert!(translator().translate(EngineEvent::token("")).is_empty());
    }

    #[test]
    fn generation_with_tool_call_describes_first_call() {
        let message = AssistantMessage {
            content: "Let me look.".into(),
            tool_calls: vec![
                ToolCall {
                    id: "c1".into(),
                    name: "lookup".into(),
                    arguments: json!({"q": "x"}),
                },
                ToolCall {
                    id: "c2".into(),
                    name: "other".into(),
                    arguments: json!({}),
                },
            ],
            usage: None,
        };
        let items = translator().translate(EngineEvent::GenerationComplete { message });
        assert_eq!(items.len(), 1);
        let text = block_text(&items[0]);
        assert!(text.starts_with("Let me look.\n"));
        assert!(text.contains("| Tool call ID | c1 |"));
        assert!(text.contains("| Tool name | lookup |"));
        assert!(text.contains(r#"| Arguments | {"q":"x"} |"#));
        assert!(!text.contains("c2"));
    }

    #[test]
    fn generation_usage_block_is_opt_in() {
        let message = AssistantMessage {
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 2,
            }),
            ..AssistantMessage::text("done")
        };
        let event = EngineEvent::GenerationComplete { message };

        assert_eq!(translator().translate(event.clone()).len(), 1);

        let mut with_usage = Translator::new(TranslatorConfig {
            emit_token_usage: true,
            ..Default::default()
        });
        let items = with_usage.translate(event);
        assert_eq!(items.len(), 2);
        assert_eq!(block_text(&items[0]), "done");
        assert_eq!(block_text(&items[1]), r#"{"input_tokens":10,"output_tokens":2}"#);
    }

    #[test]
    fn final_answer_usage_block_is_opt_in() {
        let event = EngineEvent::TurnFinished {
            output: "answer".into(),
            usage: Some(Usage {
                input_tokens: 7,
                output_tokens: 3,
            }),
        };
        assert_eq!(translator().translate(event.clone()).len(), 1);

        let mut with_usage = Translator::new(TranslatorConfig {
            emit_token_usage: true,
            ..Default::default()
        });
        let items = with_usage.translate(event);
        assert_eq!(items.len(), 2);
        assert_eq!(block_text(&items[0]), "answer");
        assert_eq!(block_text(&items[1]), r#"{"input_tokens":7,"output_tokens":3}"#);

        let without = with_usage.translate(EngineEvent::TurnFinished {
            output: "again".into(),
            usage: None,
        });
        assert_eq!(without.len(), 1);
    }

    #[test]
    fn tool_json_scalar_result_is_normalized() {
        let items = translator().translate(EngineEvent::ToolEnd {
            call_id: "c2".into(),
            name: "calc".into(),
            status: ToolStatus::Success,
            output: "1e3".into(),
        });
        assert!(block_text(&items[0]).contains("```json\n1000.0\n```"));
    }

    #[test]
    fn tool_json_result_is_pretty_printed() {
        let items = translator().translate(EngineEvent::ToolEnd {
            call_id: "c1".into(),
            name: "lookup".into(),
            status: ToolStatus::Success,
            output: r#"{"a":1}"#.into(),
        });
        let text = block_text(&items[0]);
        assert!(text.contains("**Tool ID**: c1"));
        assert!(text.contains("**Tool name**: lookup"));
        assert!(text.contains("**Status**: success"));
        assert!(text.contains("```json\n{\n  \"a\": 1\n}\n```"));
    }

    #[test]
    fn tool_plain_result_is_kept_raw() {
        let items = translator().translate(EngineEvent::ToolEnd {
            call_id: "c9".into(),
            name: "shell".into(),
            status: ToolStatus::Error,
            output: "permission denied".into(),
        });
        let text = block_text(&items[0]);
        assert!(text.contains("**Status**: error"));
        assert!(text.contains("**Content**:\npermission denied"));
        assert!(!text.contains("```"));
    }

    #[test]
    fn chart_tool_result_becomes_chart_block() {
        let output = json!({
            "type": "chart",
            "content": {
                "type": "bar",
                "labels": ["a", "b"],
                "datasets": [{"label": "s", "data": ["1.5", 2], "backgroundColor": "#0f0"}]
            }
        })
        .to_string();
        let items = translator().translate(EngineEvent::ToolEnd {
            call_id: "c1".into(),
            name: DEFAULT_CHART_TOOL.into(),
            status: ToolStatus::Success,
            output,
        });

        let StreamItem::Block(block) = &items[0] else {
            panic!("expected block");
        };
        assert_eq!(block.kind(), BlockType::Chart);
        let chart = block.chart_content().unwrap();
        assert_eq!(chart.chart_type, "bar");
        assert_eq!(chart.datasets[0].data, [1.5, 2.0]);
        assert_eq!(chart.datasets[0].extra["backgroundColor"], "#0f0");
    }

    #[test]
    fn chart_with_bad_data_becomes_error_block() {
        let output = json!({"content": {"datasets": [{"data": ["abc"]}]}}).to_string();
        let items = translator().translate(EngineEvent::ToolEnd {
            call_id: "c1".into(),
            name: DEFAULT_CHART_TOOL.into(),
            status: ToolStatus::Success,
            output,
        });
        assert_eq!(items.len(), 1);
        assert!(block_text(&items[0]).starts_with("Processing error: "));
    }

    #[test]
    fn chart_tool_without_datasets_falls_back_to_text() {
        let items = translator().translate(EngineEvent::ToolEnd {
            call_id: "c1".into(),
            name: DEFAULT_CHART_TOOL.into(),
            status: ToolStatus::Success,
            output: r#"{"content":{"note":"empty"}}"#.into(),
        });
        assert!(block_text(&items[0]).contains("**Tool name**: format_chart"));
    }

    #[test]
    fn custom_chart_tool_name() {
        let mut t = Translator::new(TranslatorConfig {
            chart_tool: "plot".into(),
            ..Default::default()
        });
        let output = json!({"content": {"datasets": []}}).to_string();
        let items = t.translate(EngineEvent::ToolEnd {
            call_id: "c".into(),
            name: "plot".into(),
            status: ToolStatus::Success,
            output,
        });
        let StreamItem::Block(block) = &items[0] else {
            panic!("expected block");
        };
        assert_eq!(block.kind(), BlockType::Chart);
    }

    #[test]
    fn agent_action_combines_thought_and_tool() {
        let items = translator().translate(EngineEvent::AgentAction {
            thought: Some("need data".into()),
            tool: Some("lookup".into()),
            tool_input: Some(json!({"q": 1})),
        });
        assert_eq!(
            block_text(&items[0]),
            "Thought: need data\nTool: lookup\nInput: {\"q\":1}"
        );

        let none = translator().translate(EngineEvent::AgentAction {
            thought: None,
            tool: None,
            tool_input: Some(json!({})),
        });
        assert!(none.is_empty());
    }

    #[test]
    fn tool_start_diagnostics_are_opt_in() {
        let event = EngineEvent::ToolStart {
            call_id: "c1".into(),
            name: "lookup".into(),
            input: json!({"q": 1}),
        };
        assert!(translator().translate(event.clone()).is_empty());

        let mut t = Translator::new(TranslatorConfig {
            tool_start_diagnostics: true,
            ..Default::default()
        });
        let items = t.translate(event);
        let StreamItem::Text(text) = &items[0] else {
            panic!("expected text");
        };
        assert!(text.contains("lookup") && text.contains("c1"));
    }

    #[test]
    fn errors_are_labelled_by_stage() {
        let mut t = translator();
        let cases = [
            (ErrorStage::Llm, "LLM error: boom"),
            (ErrorStage::Processing, "Processing error: boom"),
            (ErrorStage::Tool, "Tool error: boom"),
        ];
        for (stage, expected) in cases {
            let items = t.translate(EngineEvent::Error {
                stage,
                message: "boom".into(),
            });
            assert_eq!(block_text(&items[0]), expected);
        }
    }

    #[test]
    fn output_order_follows_input_order() {
        let mut t = translator();
        let events = vec![
            EngineEvent::LlmStart { prompts: 2 },
            EngineEvent::token("a"),
            EngineEvent::Text { text: "b".into() },
            EngineEvent::TurnFinished {
                output: "c".into(),
                usage: None,
            },
        ];
        let wire: Vec<String> = events
            .into_iter()
            .flat_map(|e| t.translate(e))
            .map(|i| i.to_wire().unwrap())
            .collect();
        assert_eq!(
            wire,
            [
                "a",
                "b",
                r#"{"type":"text","text_content":{"text":"c"}}"#
            ]
        );
    }
}
