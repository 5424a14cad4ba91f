//! Bounded, idle-expiring thread store using [`moka`].
//!
//! Threads that are not touched for the configured time-to-idle are evicted,
//! and the total number of threads is capped.  Each cached thread sits behind
//! its own async mutex so concurrent appends to one thread are serialized
//! without blocking other threads.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::{StoreError, StoreResult};
use crate::thread::{ConversationTurn, ThreadState, ThreadStore};

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking thread lookups.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Lookups that found a live thread.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups for unknown or evicted threads.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Total lookups (hits + misses).
    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate as a value between 0.0 and 1.0 (returns 0.0 if no lookups).
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} total={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.total(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── store ────────────────────────────────────────────────────────────

/// [`ThreadStore`] with a capacity bound and idle expiry.
///
/// Cheaply cloneable; clones share the same cache.
#[derive(Clone)]
pub struct CachedThreadStore {
    inner: Cache<String, Arc<Mutex<ThreadState>>>,
    stats: Arc<CacheStats>,
}

impl CachedThreadStore {
    /// Start building a new store.
    pub fn builder() -> CachedThreadStoreBuilder {
        CachedThreadStoreBuilder {
            max_capacity: 10_000,
            time_to_idle: Duration::from_secs(3600),
        }
    }

    /// Lookup statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Approximate number of live threads.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Flush pending evictions.  Mostly useful in tests.
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl fmt::Debug for CachedThreadStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedThreadStore")
            .field("entries", &self.inner.entry_count())
            .field("stats", &self.stats)
            .finish()
    }
}

#[async_trait]
impl ThreadStore for CachedThreadStore {
    #[instrument(skip(self))]
    async fn get(&self, thread_id: &str) -> StoreResult<Option<ThreadState>> {
        match self.inner.get(thread_id).await {
            Some(slot) => {
                self.stats.record_hit();
                Ok(Some(slot.lock().await.clone()))
            }
            None => {
                self.stats.record_miss();
                debug!(thread_id, "thread cache miss");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, turns), fields(count = turns.len()))]
    async fn append_all(&self, thread_id: &str, turns: Vec<ConversationTurn>) -> StoreResult<()> {
        loop {
            let slot = self
                .inner
                .entry(thread_id.to_string())
                .or_insert_with(async { Arc::new(Mutex::new(ThreadState::new(thread_id))) })
                .await
                .into_value();
            let mut state = slot.lock().await;
            // A delete or eviction may have detached the slot while we waited
            // for the lock.  Writing into it would lose the turns.
            let live = matches!(
                self.inner.get(thread_id).await,
                Some(current) if Arc::ptr_eq(&current, &slot)
            );
            if !live {
                debug!(thread_id, "thread slot detached, retrying append");
                continue;
            }
            state.extend(turns);
            debug!(thread_id, turns = state.len(), "turns appended");
            return Ok(());
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, thread_id: &str) -> StoreResult<bool> {
        let existed = self.inner.remove(thread_id).await.is_some();
        debug!(thread_id, existed, "thread deleted");
        Ok(existed)
    }

    async fn list(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self.inner.iter().map(|(id, _)| id.as_ref().clone()).collect())
    }
}

// ── builder ──────────────────────────────────────────────────────────

/// Builder for [`CachedThreadStore`].
#[derive(Debug, Clone)]
pub struct CachedThreadStoreBuilder {
    max_capacity: u64,
    time_to_idle: Duration,
}

impl CachedThreadStoreBuilder {
    /// Maximum number of threads the store will hold.
    pub fn max_capacity(mut self, cap: u64) -> Self {
        self.max_capacity = cap;
        self
    }

    /// Evict a thread after it has gone untouched for this long.
    pub fn time_to_idle(mut self, ttl: Duration) -> Self {
        self.time_to_idle = ttl;
        self
    }

    /// Build the store.
    pub fn build(self) -> StoreResult<CachedThreadStore> {
        if self.max_capacity == 0 {
            return Err(StoreError::InvalidArgument(
                "max_capacity must be greater than zero".into(),
            ));
        }
        if self.time_to_idle.is_zero() {
            return Err(StoreError::InvalidArgument(
                "time_to_idle must be greater than zero".into(),
            ));
        }

        let inner = Cache::builder()
            .max_capacity(self.max_capacity)
            .time_to_idle(self.time_to_idle)
            .build();

        debug!(
            max_capacity = self.max_capacity,
            time_to_idle_secs = self.time_to_idle.as_secs(),
            "thread cache created"
        );

        Ok(CachedThreadStore {
            inner,
            stats: Arc::new(CacheStats::default()),
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────
