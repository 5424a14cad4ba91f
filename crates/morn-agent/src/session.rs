//! Session orchestration: one conversational turn per request.
//!
//! ```text
//! RECEIVED ─▶ HISTORY_LOADED ─▶ ENGINE_RUNNING ─▶ STREAMING ─┬─▶ COMPLETED
//!                                                            └─▶ FAILED
//! ```
//!
//! [`SessionOrchestrator::stream`] validates the request synchronously, then
//! drives the turn on a background task.  The engine runs behind a
//! [`StreamBridge`]; its output is forwarded to the returned [`TurnStream`]
//! as it arrives.  History is written back only when the turn succeeds, and
//! every stream that is read to the end finishes with the `[DONE]` block.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::Stream;
use morn_store::{ConversationTurn, ThreadStore, new_thread_id, validate_thread_id};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::blocks::Block;
use crate::bridge::{BridgeConfig, DrainOutcome, StreamBridge};
use crate::engine::{Engine, EngineHooks};
use crate::error::SessionError;
use crate::event::ErrorStage;
use crate::translator::{Translator, TranslatorConfig, error_block};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Options for [`SessionOrchestrator`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Translator options applied to every turn.
    pub translator: TranslatorConfig,
    /// Bridge tuning applied to every turn.
    pub bridge: BridgeConfig,
    /// Abort a turn that runs longer than this.  `None` disables the limit.
    pub turn_timeout: Option<Duration>,
    /// Buffer between the drain loop and the transport.
    pub output_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            translator: TranslatorConfig::default(),
            bridge: BridgeConfig::default(),
            turn_timeout: None,
            output_capacity: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// Turn stream
// ---------------------------------------------------------------------------

/// Serialized output of one turn, plus the thread it belongs to.
///
/// Dropping the stream signals a client disconnect and cancels the turn.
pub struct TurnStream {
    thread_id: String,
    inner: ReceiverStream<String>,
}

impl TurnStream {
    /// The resolved (given or generated) thread id.
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

impl Stream for TurnStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream")
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Serves conversational turns against a thread store and an engine.
///
/// Cheaply cloneable.
#[derive(Clone)]
pub struct SessionOrchestrator {
    store: Arc<dyn ThreadStore>,
    engine: Arc<dyn Engine>,
    config: Arc<SessionConfig>,
}

impl SessionOrchestrator {
    pub fn new(store: Arc<dyn ThreadStore>, engine: Arc<dyn Engine>, config: SessionConfig) -> Self {
        Self {
            store,
            engine,
            config: Arc::new(config),
        }
    }

    /// The backing thread store.
    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    /// Start a turn.
    ///
    /// Validation failures are returned before any stream exists.  Every
    /// later failure is reported inside the stream as an error block.
    /// Must be called from within a Tokio runtime.
    pub fn stream(
        &self,
        thread_id: Option<String>,
        message: String,
    ) -> Result<TurnStream, SessionError> {
        if message.trim().is_empty() {
            return Err(SessionError::InvalidRequest {
                reason: "message must not be blank".into(),
            });
        }
        let thread_id = match thread_id {
            Some(id) => {
                validate_thread_id(&id).map_err(|e| SessionError::InvalidRequest {
                    reason: e.to_string(),
                })?;
                id
            }
            None => new_thread_id(),
        };

        let (tx, rx) = mpsc::channel(self.config.output_capacity.max(1));
        let span = info_span!("turn", thread_id = %thread_id);
        let this = self.clone();
        let id = thread_id.clone();
        tokio::spawn(async move { this.drive(&id, message, tx).await }.instrument(span));

        Ok(TurnStream {
            thread_id,
            inner: ReceiverStream::new(rx),
        })
    }

    async fn drive(&self, thread_id: &str, message: String, out: mpsc::Sender<String>) {
        let started = Instant::now();
        match self.run_turn(thread_id, message, &out).await {
            Ok(DrainOutcome::Completed) => {
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "turn completed");
                send_block(&out, Block::done()).await;
            }
            Ok(DrainOutcome::Disconnected) => {
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "client disconnected, turn abandoned"
                );
            }
            Err(err) => {
                warn!(error = %err, "turn failed");
                send_block(&out, error_block(ErrorStage::Processing, &err.to_string())).await;
                send_block(&out, Block::done()).await;
            }
        }
    }

    async fn run_turn(
        &self,
        thread_id: &str,
        message: String,
        out: &mpsc::Sender<String>,
    ) -> Result<DrainOutcome, SessionError> {
        let mut history = self
            .store
            .get(thread_id)
            .await?
            .map(|state| state.turns)
            .unwrap_or_default();
        let user_turn = ConversationTurn::user(message);
        history.push(user_turn.clone());
        debug!(history_len = history.len(), "history loaded");

        let engine = Arc::clone(&self.engine);
        let translator = Translator::new(self.config.translator.clone());
        let mut bridge = StreamBridge::open(&self.config.bridge, move |sender| async move {
            engine.run(history, EngineHooks::new(translator, sender)).await
        });

        let outcome = match self.config.turn_timeout {
            Some(limit) => match tokio::time::timeout(limit, bridge.drain(out)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    bridge.cancel();
                    return Err(SessionError::TimedOut { after: limit });
                }
            },
            None => bridge.drain(out).await,
        };
        if outcome == DrainOutcome::Disconnected {
            return Ok(outcome);
        }

        let produced = bridge.finish().await??;
        let mut committed = Vec::with_capacity(produced.len() + 1);
        committed.push(user_turn);
        committed.extend(produced);
        let appended = committed.len();
        self.store.append_all(thread_id, committed).await?;
        debug!(appended, "history updated");
        Ok(DrainOutcome::Completed)
    }
}

async fn send_block(out: &mpsc::Sender<String>, block: Block) {
    match block.to_json() {
        Ok(json) => {
            // A closed receiver means the client is gone; nothing to report to.
            let _ = out.send(json).await;
        }
        Err(err) => warn!(error = %err, "failed to serialize block"),
    }
}
