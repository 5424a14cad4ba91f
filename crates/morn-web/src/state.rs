//! Shared application state for the web server.
//!
//! [`AppState`] is wrapped in an `Arc` and shared across all request
//! handlers.

use std::sync::Arc;

use morn_agent::SessionOrchestrator;
use morn_store::ThreadStore;

use crate::WebConfig;

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Runs chat turns.
    pub orchestrator: SessionOrchestrator,

    /// Web server configuration.
    pub config: WebConfig,
}

impl AppState {
    pub fn new(orchestrator: SessionOrchestrator, config: WebConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// The thread store behind the orchestrator.
    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        self.orchestrator.store()
    }
}
