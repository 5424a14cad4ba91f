//! Typed content blocks.
//!
//! A [`Block`] is the unit of structured output sent to clients.  It carries
//! a `type` discriminator and exactly one payload matching it:
//!
//! ```json
//! {"type":"text","text_content":{"text":"hello"}}
//! {"type":"chart","chart_content":{"chart_type":"line","labels":["a"],"datasets":[{"label":"x","data":[1.0]}]}}
//! ```
//!
//! The invariant is enforced on construction and again on deserialization.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MalformedBlockError;

/// Text of the terminal marker that ends every completed stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Default chart type when a chart payload does not name one.
pub const DEFAULT_CHART_TYPE: &str = "line";

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Discriminator of a [`Block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Text,
    Chart,
}

/// Payload of a text block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

/// Payload of a chart block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartContent {
    /// Renderer hint (`line`, `bar`, `pie`, ...).
    pub chart_type: String,
    /// Category labels along the x axis.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Data series.
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

/// A single chart series.
///
/// Keys other than `label` and `data` (colors, fill, ...) are kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub data: Vec<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChartContent {
    /// Build a chart from a loosely typed tool payload.
    ///
    /// `type` selects the chart type (default [`DEFAULT_CHART_TYPE`]),
    /// `labels` may hold strings or numbers, and every dataset's `data`
    /// entries are coerced to `f64`.  Numeric strings such as `"1.5"` are
    /// parsed; any other non-numeric entry is rejected.
    pub fn from_tool_payload(content: &Map<String, Value>) -> Result<Self, MalformedBlockError> {
        let chart_type = match content.get("type") {
            None | Some(Value::Null) => DEFAULT_CHART_TYPE.to_owned(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(MalformedBlockError::new(format!(
                    "chart type must be a string, got {other}"
                )));
            }
        };

        let labels = match content.get("labels") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(coerce_label).collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(MalformedBlockError::new(format!(
                    "chart labels must be an array, got {other}"
                )));
            }
        };

        let datasets = match content.get("datasets") {
            Some(Value::Array(items)) => items
                .iter()
                .map(Dataset::from_tool_payload)
                .collect::<Result<_, _>>()?,
            _ => return Err(MalformedBlockError::new("chart datasets must be an array")),
        };

        Ok(Self {
            chart_type,
            labels,
            datasets,
        })
    }
}

impl Dataset {
    fn from_tool_payload(value: &Value) -> Result<Self, MalformedBlockError> {
        let Value::Object(fields) = value else {
            return Err(MalformedBlockError::new(format!(
                "chart dataset must be an object, got {value}"
            )));
        };

        let mut extra = fields.clone();
        let label = match extra.remove("label") {
            None | Some(Value::Null) => None,
            Some(v) => Some(coerce_label(&v)?),
        };
        let data = match extra.remove("data") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(coerce_number).collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(MalformedBlockError::new(format!(
                    "dataset data must be an array, got {other}"
                )));
            }
        };

        Ok(Self { label, data, extra })
    }
}

fn coerce_number(value: &Value) -> Result<f64, MalformedBlockError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|n| n.is_finite())
        .ok_or_else(|| MalformedBlockError::new(format!("non-numeric chart value: {value}")))
}

fn coerce_label(value: &Value) -> Result<String, MalformedBlockError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(MalformedBlockError::new(format!(
            "chart label must be a string or number, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A typed content unit with exactly one payload matching its `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBlock")]
pub struct Block {
    #[serde(rename = "type")]
    kind: BlockType,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_content: Option<TextContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    chart_content: Option<ChartContent>,
}

/// Unvalidated wire shape, checked by `TryFrom` on the way in.
#[derive(Deserialize)]
struct RawBlock {
    #[serde(rename = "type")]
    kind: BlockType,
    #[serde(default)]
    text_content: Option<TextContent>,
    #[serde(default)]
    chart_content: Option<ChartContent>,
}

impl TryFrom<RawBlock> for Block {
    type Error = MalformedBlockError;

    fn try_from(raw: RawBlock) -> Result<Self, Self::Error> {
        Block::new(raw.kind, raw.text_content, raw.chart_content)
    }
}

impl Block {
    /// Construct a block, checking that exactly the payload named by `kind`
    /// is present.
    pub fn new(
        kind: BlockType,
        text_content: Option<TextContent>,
        chart_content: Option<ChartContent>,
    ) -> Result<Self, MalformedBlockError> {
        match (kind, &text_content, &chart_content) {
            (BlockType::Text, Some(_), None) | (BlockType::Chart, None, Some(_)) => Ok(Self {
                kind,
                text_content,
                chart_content,
            }),
            (BlockType::Text, _, _) => Err(MalformedBlockError::new(
                "text block requires text_content and no chart_content",
            )),
            (BlockType::Chart, _, _) => Err(MalformedBlockError::new(
                "chart block requires chart_content and no text_content",
            )),
        }
    }

    /// A text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: BlockType::Text,
            text_content: Some(TextContent { text: text.into() }),
            chart_content: None,
        }
    }

    /// A chart block.
    pub fn chart(content: ChartContent) -> Self {
        Self {
            kind: BlockType::Chart,
            text_content: None,
            chart_content: Some(content),
        }
    }

    /// The terminal marker block.
    pub fn done() -> Self {
        Self::text(DONE_MARKER)
    }

    pub fn kind(&self) -> BlockType {
        self.kind
    }

    pub fn text_content(&self) -> Option<&TextContent> {
        self.text_content.as_ref()
    }

    pub fn chart_content(&self) -> Option<&ChartContent> {
        self.chart_content.as_ref()
    }

    /// Shortcut for the text of a text block.
    pub fn as_text(&self) -> Option<&str> {
        self.text_content.as_ref().map(|c| c.text.as_str())
    }

    /// Returns `true` for the `[DONE]` terminal marker.
    pub fn is_done_marker(&self) -> bool {
        self.as_text() == Some(DONE_MARKER)
    }

    /// Compact JSON encoding.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
