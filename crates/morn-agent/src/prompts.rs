//! Prompt loading for the reference engine.
//!
//! Prompts are plain `<name>.txt` files in a prompt directory.  A missing
//! prompt is not an error: it is skipped with a warning.
//!
//! The system and project prompts become system messages.  The human prompt
//! is a template: `{timestamp}` and `{project_id}` are filled in per turn and
//! the result is sent as a user message ahead of the conversation.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::llm::types::Message;

/// File stem of the system prompt.
pub const SYSTEM_PROMPT: &str = "system_prompt";

/// File stem of the project prompt.
pub const PROJECT_PROMPT: &str = "project_prompt";

/// File stem of the human prompt template.
pub const HUMAN_PROMPT: &str = "human_prompt";

/// Values substituted into the human prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    /// Milliseconds since the Unix epoch at turn start.
    pub timestamp: i64,
    pub project_id: String,
}

/// Prompts prepended to every model conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptSet {
    pub system: Option<String>,
    pub project: Option<String>,
    pub human: Option<String>,
}

impl PromptSet {
    /// Load the system and project prompts from `dir`.
    pub async fn load(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            system: load_prompt(dir, SYSTEM_PROMPT).await,
            project: load_prompt(dir, PROJECT_PROMPT).await,
            human: load_prompt(dir, HUMAN_PROMPT).await,
        }
    }

    /// Messages for the loaded prompts: system, project, then the rendered
    /// human prompt.
    pub fn preamble(&self, context: &PromptContext) -> Vec<Message> {
        let mut messages: Vec<Message> = [&self.system, &self.project]
            .into_iter()
            .flatten()
            .map(|prompt| Message::system(prompt.clone()))
            .collect();
        if let Some(template) = &self.human {
            messages.push(Message::user(render_human_prompt(template, context)));
        }
        messages
    }
}

/// Fill `{timestamp}` and `{project_id}`.  Other braces are left alone.
pub fn render_human_prompt(template: &str, context: &PromptContext) -> String {
    template
        .replace("{timestamp}", &context.timestamp.to_string())
        .replace("{project_id}", &context.project_id)
}

/// Read `<dir>/<name>.txt`.  Missing or unreadable files yield `None`.
pub async fn load_prompt(dir: &Path, name: &str) -> Option<String> {
    let path: PathBuf = dir.join(format!("{name}.txt"));
    match tokio::fs::read_to_string(&path).await {
        Ok(text) if text.trim().is_empty() => {
            warn!(path = %path.display(), "prompt file is empty, skipping");
            None
        }
        Ok(text) => {
            debug!(path = %path.display(), bytes = text.len(), "prompt loaded");
            Some(text)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "prompt not found, skipping");
            None
        }
    }
}
