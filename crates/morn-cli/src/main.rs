//! CLI entry point for Morn.
//!
//! This binary provides the `morn` command: `serve` runs the HTTP gateway,
//! `config` prints the resolved configuration.

mod cli;
mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use morn_agent::{LlmClient, OpenAiEngine, PromptSet, SessionOrchestrator};
use morn_store::{CachedThreadStore, MemoryThreadStore, ThreadStore};
use morn_web::WebServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::config::{AppConfig, StoreConfig};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap so `env = ...` arguments see it too.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            init_tracing(config.json_logs());
            if let Ok(path) = dotenv {
                info!(path = %path.display(), "loaded environment file");
            }
            cmd_serve(config).await
        }
        Commands::Config => {
            let rendered = toml::to_string_pretty(&config.redacted())
                .context("failed to render configuration")?;
            print!("{rendered}");
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand: serve
// ---------------------------------------------------------------------------

async fn cmd_serve(config: AppConfig) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting Morn");

    let store = build_store(&config.store)?;

    let llm = LlmClient::new(config.llm_config()?).context("failed to create LLM client")?;
    info!(base_url = %config.llm.base_url, model = %config.llm.model, "LLM client ready");

    let prompts = PromptSet::load(&config.agent.prompt_dir).await;
    let engine = OpenAiEngine::new(Arc::new(llm), config.agent_config()).with_prompts(prompts);

    let orchestrator = SessionOrchestrator::new(store, Arc::new(engine), config.session_config());
    let server = WebServer::new(config.web_config(), orchestrator);
    info!(addr = %server.addr(), "web server configured");

    server.start().await.map_err(|e| anyhow!(e))
}

/// Pick the thread store backend: bounded cache when any bound is set,
/// unbounded in-memory map otherwise.
fn build_store(config: &StoreConfig) -> Result<Arc<dyn ThreadStore>> {
    if !config.is_bounded() {
        info!(backend = "memory", "thread store initialized");
        return Ok(Arc::new(MemoryThreadStore::new()));
    }

    let mut builder = CachedThreadStore::builder();
    if let Some(max) = config.max_threads {
        builder = builder.max_capacity(max);
    }
    if let Some(secs) = config.thread_ttl_secs {
        builder = builder.time_to_idle(Duration::from_secs(secs));
    }
    let store = builder.build().context("invalid thread store configuration")?;
    info!(
        backend = "cache",
        max_threads = config.max_threads,
        thread_ttl_secs = config.thread_ttl_secs,
        "thread store initialized"
    );
    Ok(Arc::new(store))
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install the global subscriber.  `RUST_LOG` wins over the `info` default.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }
}
