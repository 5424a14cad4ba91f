//! Application configuration.
//!
//! [`AppConfig`] is read from an optional TOML file, then overridden by
//! environment variables (after `.env` has been loaded).  Command-line flags
//! are applied last by the caller.  Sections map onto the per-crate config
//! structs through the `*_config` methods.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use morn_agent::llm::client::OPENAI_BASE_URL;
use morn_agent::{
    AgentConfig, BridgeConfig, DEFAULT_CHART_TOOL, LlmClientConfig, SessionConfig,
    TranslatorConfig,
};
use morn_web::WebConfig;
use serde::{Deserialize, Serialize};

/// Config file used when `--config` is not given, if it exists.
pub const DEFAULT_CONFIG_PATH: &str = "config/morn.toml";

/// Logging profile that switches to JSON output.
pub const PROD_PROFILE: &str = "prod";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub store: StoreConfig,
}

/// `[server]`: HTTP listener and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// `prod` selects JSON logs; anything else selects compact logs.
    pub profile: String,
    pub keep_alive_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        let web = WebConfig::default();
        Self {
            host: web.bind_addr,
            port: web.port,
            profile: "dev".into(),
            keep_alive_secs: web.keep_alive.as_secs(),
        }
    }
}

/// `[llm]`: the OpenAI-compatible upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub temperature: Option<f32>,
    pub max_turns: u32,
}

impl Default for LlmSection {
    fn default() -> Self {
        let agent = AgentConfig::default();
        Self {
            api_key: None,
            base_url: OPENAI_BASE_URL.into(),
            model: morn_agent::llm::client::DEFAULT_MODEL.into(),
            max_tokens: 4096,
            request_timeout_secs: 120,
            temperature: agent.temperature,
            max_turns: agent.max_turns,
        }
    }
}

/// `[agent]`: turn orchestration and rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    /// Directory holding `system_prompt.txt`, `project_prompt.txt` and
    /// `human_prompt.txt`.
    pub prompt_dir: PathBuf,
    /// Filled into `{project_id}` in the human prompt.
    pub project_id: String,
    /// Approximate token budget for replayed history.
    pub max_history_tokens: Option<usize>,
    /// Tool whose results render as charts.
    pub chart_tool: String,
    /// Emit token usage after each generation.
    pub token_count: bool,
    /// Emit a diagnostic line when a tool starts.
    pub tool_start_diagnostics: bool,
    /// Abort turns running longer than this.  Unset disables the limit.
    pub turn_timeout_secs: Option<u64>,
    pub poll_interval_ms: u64,
    pub channel_capacity: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        let bridge = BridgeConfig::default();
        Self {
            prompt_dir: PathBuf::from("prompts"),
            project_id: String::new(),
            max_history_tokens: AgentConfig::default().max_history_tokens,
            chart_tool: DEFAULT_CHART_TOOL.into(),
            token_count: false,
            tool_start_diagnostics: false,
            turn_timeout_secs: None,
            poll_interval_ms: bridge.poll_interval.as_millis() as u64,
            channel_capacity: bridge.channel_capacity,
        }
    }
}

/// `[store]`: thread store backend selection.
///
/// With neither bound set, history is kept in an unbounded in-memory map.
/// Setting either switches to the bounded cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub max_threads: Option<u64>,
    pub thread_ttl_secs: Option<u64>,
}

impl StoreConfig {
    pub fn is_bounded(&self) -> bool {
        self.max_threads.is_some() || self.thread_ttl_secs.is_some()
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_PATH`] when it exists, then
    /// apply process environment overrides.
    ///
    /// An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration file loaded");
        Ok(config)
    }

    /// Apply environment overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(host) = var("MORN_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("MORN_PORT") {
            self.server.port = parse_var("MORN_PORT", &port)?;
        }
        if let Some(profile) = var("MORN_PROFILE") {
            self.server.profile = profile;
        }
        if let Some(key) = var("OPENAI_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = var("OPENAI_MODEL") {
            self.llm.model = model;
        }
        if let Some(dir) = var("MORN_PROMPT_DIR") {
            self.agent.prompt_dir = PathBuf::from(dir);
        }
        if let Some(project) = var("MORN_PROJECT_ID") {
            self.agent.project_id = project;
        }
        if let Some(tokens) = var("MORN_MAX_HISTORY_TOKENS") {
            self.agent.max_history_tokens = Some(parse_var("MORN_MAX_HISTORY_TOKENS", &tokens)?);
        }
        if let Some(tool) = var("MORN_CHART_TOOL") {
            self.agent.chart_tool = tool;
        }
        if let Some(flag) = var("MORN_TOKEN_COUNT") {
            self.agent.token_count = parse_flag("MORN_TOKEN_COUNT", &flag)?;
        }
        if let Some(secs) = var("MORN_TURN_TIMEOUT_SECS") {
            self.agent.turn_timeout_secs = Some(parse_var("MORN_TURN_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = var("MORN_THREAD_TTL_SECS") {
            self.store.thread_ttl_secs = Some(parse_var("MORN_THREAD_TTL_SECS", &secs)?);
        }
        if let Some(max) = var("MORN_MAX_THREADS") {
            self.store.max_threads = Some(parse_var("MORN_MAX_THREADS", &max)?);
        }
        Ok(())
    }

    /// Whether logs should be emitted as JSON.
    pub fn json_logs(&self) -> bool {
        self.server.profile.eq_ignore_ascii_case(PROD_PROFILE)
    }

    /// A copy safe to print.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.llm.api_key.is_some() {
            copy.llm.api_key = Some("***".into());
        }
        copy
    }

    // -- conversions --------------------------------------------------------

    pub fn web_config(&self) -> WebConfig {
        WebConfig {
            bind_addr: self.server.host.clone(),
            port: self.server.port,
            keep_alive: Duration::from_secs(self.server.keep_alive_secs.max(1)),
        }
    }

    /// Client settings.  Fails when no API key is configured.
    pub fn llm_config(&self) -> Result<LlmClientConfig> {
        let Some(api_key) = self.llm.api_key.clone() else {
            bail!("no API key configured: set OPENAI_API_KEY or [llm].api_key");
        };
        let mut config =
            LlmClientConfig::openai_compatible(api_key, &self.llm.model, &self.llm.base_url);
        config.max_tokens = self.llm.max_tokens;
        config.request_timeout = Duration::from_secs(self.llm.request_timeout_secs);
        Ok(config)
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_turns: self.llm.max_turns,
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            max_tokens: None,
            project_id: self.agent.project_id.clone(),
            max_history_tokens: self.agent.max_history_tokens,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            translator: TranslatorConfig {
                chart_tool: self.agent.chart_tool.clone(),
                tool_start_diagnostics: self.agent.tool_start_diagnostics,
                emit_token_usage: self.agent.token_count,
            },
            bridge: BridgeConfig {
                channel_capacity: self.agent.channel_capacity,
                poll_interval: Duration::from_millis(self.agent.poll_interval_ms),
            },
            turn_timeout: self.agent.turn_timeout_secs.map(Duration::from_secs),
            ..SessionConfig::default()
        }
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("invalid value for {key}: {value:?} (expected true or false)"),
    }
}
