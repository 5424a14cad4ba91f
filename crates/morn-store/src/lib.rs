//! # morn-store
//!
//! Conversation thread storage for Morn.
//!
//! A thread is an append-only list of turns keyed by an opaque id.  Two
//! backends implement the [`ThreadStore`] contract:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  ThreadStore (async trait)                  │
//! ├──────────────────────┬──────────────────────┤
//! │  MemoryThreadStore   │  CachedThreadStore   │
//! │  (DashMap, forever)  │  (moka, TTI + cap)   │
//! └──────────────────────┴──────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use morn_store::{ConversationTurn, MemoryThreadStore, ThreadStore};
//!
//! let store = MemoryThreadStore::new();
//! store.append("thread-1", ConversationTurn::user("hello")).await?;
//! let state = store.get("thread-1").await?;
//! ```

pub mod cache;
pub mod error;
pub mod memory;
pub mod thread;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{CacheStats, CachedThreadStore, CachedThreadStoreBuilder};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryThreadStore;
pub use thread::{
    ConversationTurn, MAX_THREAD_ID_LEN, Role, ThreadState, ThreadStore, new_thread_id,
    validate_thread_id,
};
