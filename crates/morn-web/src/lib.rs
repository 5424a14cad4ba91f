//! HTTP transport for Morn.
//!
//! This crate exposes a [`SessionOrchestrator`](morn_agent::SessionOrchestrator)
//! over HTTP.  It includes:
//!
//! - `POST /api/v1/chat`, streaming one turn as Server-Sent Events.
//! - Thread endpoints for listing, reading, and deleting conversation history.
//! - A `/health` probe.

pub mod api;
pub mod error;
pub mod server;
pub mod sse;
pub mod state;

use std::time::Duration;

pub use error::ApiError;
pub use server::WebServer;
pub use state::AppState;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
    /// Interval between SSE keep-alive comments on idle chat streams.
    pub keep_alive: Duration,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 3000,
            keep_alive: Duration::from_secs(15),
        }
    }
}
