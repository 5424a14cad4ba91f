//! The reasoning engine contract.
//!
//! An [`Engine`] runs one conversational turn against the thread history and
//! reports progress through [`EngineHooks`].  The session layer owns the
//! hooks; engines only emit events into them.

use std::sync::Arc;

use async_trait::async_trait;
use morn_store::ConversationTurn;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bridge::BridgeSender;
use crate::error::Result;
use crate::event::EngineEvent;
use crate::translator::Translator;

/// A black-box reasoning engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Execute one turn.
    ///
    /// `history` ends with the new user turn.  Returns the turns produced by
    /// the engine, to be appended to the thread once the turn succeeds.
    async fn run(
        &self,
        history: Vec<ConversationTurn>,
        hooks: EngineHooks,
    ) -> Result<Vec<ConversationTurn>>;
}

/// Single hook point handed to an engine for one turn.
///
/// Clones share the same translator, so events emitted from concurrent parts
/// of an engine are translated and pushed one at a time, in lock order.
#[derive(Clone)]
pub struct EngineHooks {
    translator: Arc<Mutex<Translator>>,
    sender: BridgeSender,
}

impl EngineHooks {
    pub fn new(translator: Translator, sender: BridgeSender) -> Self {
        Self {
            translator: Arc::new(Mutex::new(translator)),
            sender,
        }
    }

    /// Translate `event` and push the resulting items to the bridge.
    pub async fn emit(&self, event: EngineEvent) {
        let mut translator = self.translator.lock().await;
        for item in translator.translate(event) {
            if !self.sender.push(item).await {
                debug!("bridge receiver gone, dropping engine output");
                return;
            }
        }
    }
}

impl std::fmt::Debug for EngineHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHooks").finish_non_exhaustive()
    }
}
