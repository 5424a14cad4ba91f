//! Integration tests for the morn-store crate.
//!
//! Every scenario runs against both backends through `Arc<dyn ThreadStore>`
//! so the contract is checked independently of the storage strategy.

use std::sync::Arc;
use std::time::Duration;

use morn_store::{
    CachedThreadStore, ConversationTurn, MemoryThreadStore, Role, ThreadStore, new_thread_id,
};

fn backends() -> Vec<(&'static str, Arc<dyn ThreadStore>)> {
    let cached = CachedThreadStore::builder()
        .max_capacity(1_000)
        .time_to_idle(Duration::from_secs(300))
        .build()
        .unwrap();
    vec![
        ("memory", Arc::new(MemoryThreadStore::new())),
        ("cached", Arc::new(cached)),
    ]
}

// ═══════════════════════════════════════════════════════════════════════
//  Lifecycle
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn thread_lifecycle() {
    for (name, store) in backends() {
        let id = new_thread_id();
        assert!(store.get(&id).await.unwrap().is_none(), "{name}");

        store.append(&id, ConversationTurn::user("What is 2+2?")).await.unwrap();
        store
            .append(&id, ConversationTurn::assistant("4"))
            .await
            .unwrap();

        let state = store.get(&id).await.unwrap().unwrap();
        assert_eq!(state.thread_id, id, "{name}");
        let roles: Vec<_> = state.turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, [Role::User, Role::Assistant], "{name}");
        assert!(state.updated_at >= state.created_at, "{name}");

        assert!(store.list().await.unwrap().contains(&id), "{name}");
        assert!(store.delete(&id).await.unwrap(), "{name}");
        assert!(store.get(&id).await.unwrap().is_none(), "{name}");
        assert!(!store.list().await.unwrap().contains(&id), "{name}");
    }
}

#[tokio::test]
async fn snapshots_are_detached_from_later_appends() {
    for (name, store) in backends() {
        store.append("t", ConversationTurn::user("one")).await.unwrap();
        let snapshot = store.get("t").await.unwrap().unwrap();

        store.append("t", ConversationTurn::user("two")).await.unwrap();
        assert_eq!(snapshot.len(), 1, "{name}");
        assert_eq!(store.get("t").await.unwrap().unwrap().len(), 2, "{name}");
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_appends_to_one_thread_are_not_lost() {
    for (name, store) in backends() {
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append("shared", ConversationTurn::user(format!("m{i}")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let state = store.get("shared").await.unwrap().unwrap();
        assert_eq!(state.len(), 50, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_threads_stay_isolated() {
    for (name, store) in backends() {
        let mut handles = Vec::new();
        for t in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = format!("thread-{t}");
                for i in 0..10 {
                    store
                        .append(&id, ConversationTurn::user(format!("{t}:{i}")))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list().await.unwrap().len(), 8, "{name}");
        for t in 0..8 {
            let state = store.get(&format!("thread-{t}")).await.unwrap().unwrap();
            let expected: Vec<_> = (0..10).map(|i| format!("{t}:{i}")).collect();
            let actual: Vec<_> = state.turns.into_iter().map(|t| t.content).collect();
            assert_eq!(actual, expected, "{name}");
        }
    }
}
