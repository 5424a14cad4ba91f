//! Process-local thread store backed by [`DashMap`].
//!
//! Threads live for the lifetime of the process.  Each thread id maps to its
//! own shard entry, so appends to different threads proceed in parallel while
//! appends to the same thread are serialized by the entry lock.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, instrument};

use crate::error::StoreResult;
use crate::thread::{ConversationTurn, ThreadState, ThreadStore};

/// Unbounded in-memory [`ThreadStore`].
///
/// Cheaply cloneable; clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryThreadStore {
    inner: Arc<DashMap<String, ThreadState>>,
}

impl MemoryThreadStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads currently held.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if no thread is held.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    #[instrument(skip(self))]
    async fn get(&self, thread_id: &str) -> StoreResult<Option<ThreadState>> {
        Ok(self.inner.get(thread_id).map(|entry| entry.value().clone()))
    }

    #[instrument(skip(self, turns), fields(count = turns.len()))]
    async fn append_all(&self, thread_id: &str, turns: Vec<ConversationTurn>) -> StoreResult<()> {
        let mut entry = self
            .inner
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadState::new(thread_id));
        entry.extend(turns);
        debug!(thread_id, turns = entry.len(), "turns appended");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, thread_id: &str) -> StoreResult<bool> {
        let existed = self.inner.remove(thread_id).is_some();
        debug!(thread_id, existed, "thread deleted");
        Ok(existed)
    }

    async fn list(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self.inner.iter().map(|entry| entry.key().clone()).collect())
    }
}
