//! End-to-end tests for the session orchestrator.
//!
//! Each test wires a scripted engine and a real thread store into a
//! `SessionOrchestrator`, drives a turn through the real bridge, and reads
//! the serialized stream the transport would see.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use morn_agent::{
    AgentError, BridgeConfig, Engine, EngineEvent, EngineHooks, SessionConfig, SessionError,
    SessionOrchestrator, ToolStatus,
};
use morn_store::{
    ConversationTurn, MemoryThreadStore, Role, StoreError, StoreResult, ThreadState, ThreadStore,
};
use tokio::sync::Mutex;

const DONE: &str = r#"{"type":"text","text_content":{"text":"[DONE]"}}"#;

fn text_block(text: &str) -> String {
    serde_json::json!({"type": "text", "text_content": {"text": text}}).to_string()
}

// ── scripted engine ──────────────────────────────────────────────────────────

enum Step {
    Emit(EngineEvent),
    Sleep(Duration),
    Fail(&'static str),
    Panic,
}

struct ScriptedEngine {
    steps: Vec<Step>,
    reply: &'static str,
    seen_history: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedEngine {
    fn new(reply: &'static str, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps,
            reply,
            seen_history: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn run(
        &self,
        history: Vec<ConversationTurn>,
        hooks: EngineHooks,
    ) -> morn_agent::Result<Vec<ConversationTurn>> {
        self.seen_history.lock().await.push(history);
        for step in &self.steps {
            match step {
                Step::Emit(event) => hooks.emit(event.clone()).await,
                Step::Sleep(d) => tokio::time::sleep(*d).await,
                Step::Fail(reason) => return Err(AgentError::Internal((*reason).into())),
                Step::Panic => panic!("scripted engine panic"),
            }
        }
        Ok(vec![ConversationTurn::assistant(self.reply)])
    }
}

fn fast_config() -> SessionConfig {
    SessionConfig {
        bridge: BridgeConfig {
            channel_capacity: 16,
            poll_interval: Duration::from_millis(20),
        },
        ..SessionConfig::default()
    }
}

fn orchestrator(
    store: Arc<dyn ThreadStore>,
    engine: Arc<dyn Engine>,
) -> SessionOrchestrator {
    SessionOrchestrator::new(store, engine, fast_config())
}

// ── completed turns ──────────────────────────────────────────────────────────

#[tokio::test]
async fn new_thread_streams_answer_then_done_and_persists() {
    let store = Arc::new(MemoryThreadStore::new());
    let engine = ScriptedEngine::new(
        "hi there",
        vec![Step::Emit(EngineEvent::TurnFinished {
            output: "hi there".into(),
            usage: None,
        })],
    );
    let orch = orchestrator(store.clone(), engine);

    let stream = orch.stream(None, "hello".into()).unwrap();
    let thread_id = stream.thread_id().to_owned();
    let items: Vec<String> = stream.collect().await;

    assert_eq!(items, vec![text_block("hi there"), DONE.to_owned()]);

    let state = store.get(&thread_id).await.unwrap().unwrap();
    assert_eq!(state.len(), 2);
    assert_eq!(state.turns[0].role, Role::User);
    assert_eq!(state.turns[0].content, "hello");
    assert_eq!(state.turns[1].role, Role::Assistant);
    assert_eq!(state.turns[1].content, "hi there");
}

#[tokio::test]
async fn tool_result_is_rendered_in_stream() {
    let store = Arc::new(MemoryThreadStore::new());
    let engine = ScriptedEngine::new(
        "done",
        vec![Step::Emit(EngineEvent::ToolEnd {
            call_id: "c1".into(),
            name: "lookup".into(),
            status: ToolStatus::Success,
            output: r#"{"a":1}"#.into(),
        })],
    );
    let orch = orchestrator(store, engine);

    let items: Vec<String> = orch.stream(None, "look it up".into()).unwrap().collect().await;
    assert_eq!(items.len(), 2);

    let block: serde_json::Value = serde_json::from_str(&items[0]).unwrap();
    let text = block["text_content"]["text"].as_str().unwrap();
    assert!(text.contains("c1"));
    assert!(text.contains("lookup"));
    assert!(text.contains("\"a\": 1"));
    assert_eq!(items[1], DONE);
}

#[tokio::test]
async fn tokens_and_blocks_keep_emission_order() {
    let store = Arc::new(MemoryThreadStore::new());
    let engine = ScriptedEngine::new(
        "ab",
        vec![
            Step::Emit(EngineEvent::token("a")),
            Step::Emit(EngineEvent::token("b")),
            Step::Emit(EngineEvent::TurnFinished {
                output: "ab".into(),
                usage: None,
            }),
        ],
    );
    let orch = orchestrator(store, engine);

    let items: Vec<String> = orch.stream(None, "go".into()).unwrap().collect().await;
    assert_eq!(
        items,
        vec!["a".to_owned(), "b".to_owned(), text_block("ab"), DONE.to_owned()]
    );
    assert_eq!(items.iter().filter(|i| *i == DONE).count(), 1);
}

#[tokio::test]
async fn follow_up_turn_sees_prior_history() {
    let store = Arc::new(MemoryThreadStore::new());
    let engine = ScriptedEngine::new("ok", Vec::new());
    let orch = orchestrator(store.clone(), engine.clone());

    let first = orch.stream(Some("t-1".into()), "one".into()).unwrap();
    let _: Vec<String> = first.collect().await;
    let second = orch.stream(Some("t-1".into()), "two".into()).unwrap();
    let _: Vec<String> = second.collect().await;

    let seen = engine.seen_history.lock().await;
    assert_eq!(seen.len(), 2);
    let contents: Vec<_> = seen[1].iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, ["one", "ok", "two"]);
    assert_eq!(store.get("t-1").await.unwrap().unwrap().len(), 4);
}

// ── validation ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_requests_are_rejected_before_streaming() {
    let store = Arc::new(MemoryThreadStore::new());
    let orch = orchestrator(store.clone(), ScriptedEngine::new("x", Vec::new()));

    assert!(matches!(
        orch.stream(None, "   ".into()),
        Err(SessionError::InvalidRequest { .. })
    ));
    assert!(matches!(
        orch.stream(Some("bad\u{0}id".into()), "hi".into()),
        Err(SessionError::InvalidRequest { .. })
    ));
    assert!(matches!(
        orch.stream(Some("x".repeat(200)), "hi".into()),
        Err(SessionError::InvalidRequest { .. })
    ));
    assert!(store.is_empty());
}

// ── failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn engine_failure_yields_error_block_and_keeps_history() {
    let store = Arc::new(MemoryThreadStore::new());
    store
        .append("t", ConversationTurn::user("earlier"))
        .await
        .unwrap();
    let engine = ScriptedEngine::new(
        "never",
        vec![Step::Emit(EngineEvent::token("partial")), Step::Fail("boom")],
    );
    let orch = orchestrator(store.clone(), engine);

    let items: Vec<String> = orch.stream(Some("t".into()), "hi".into()).unwrap().collect().await;
    assert_eq!(
        items,
        vec![
            "partial".to_owned(),
            text_block("Processing error: internal agent error: boom"),
            DONE.to_owned(),
        ]
    );
    assert_eq!(store.get("t").await.unwrap().unwrap().len(), 1);
}

#[tokio::test]
async fn engine_panic_is_reported_as_aborted() {
    let store = Arc::new(MemoryThreadStore::new());
    let orch = orchestrator(store.clone(), ScriptedEngine::new("x", vec![Step::Panic]));

    let stream = orch.stream(None, "hi".into()).unwrap();
    let thread_id = stream.thread_id().to_owned();
    let items: Vec<String> = stream.collect().await;

    assert_eq!(items.len(), 2);
    assert!(items[0].contains("Processing error: engine task aborted"));
    assert_eq!(items[1], DONE);
    assert!(store.get(&thread_id).await.unwrap().is_none());
}

#[tokio::test]
async fn turn_timeout_aborts_engine() {
    let store = Arc::new(MemoryThreadStore::new());
    let engine = ScriptedEngine::new("late", vec![Step::Sleep(Duration::from_secs(30))]);
    let orch = SessionOrchestrator::new(
        store.clone(),
        engine,
        SessionConfig {
            turn_timeout: Some(Duration::from_millis(100)),
            ..fast_config()
        },
    );

    let items: Vec<String> = tokio::time::timeout(
        Duration::from_secs(5),
        orch.stream(Some("slow".into()), "hi".into())
            .unwrap()
            .collect::<Vec<String>>(),
    )
    .await
    .unwrap();
    assert_eq!(
        items,
        vec![
            text_block("Processing error: turn timed out after 100ms"),
            DONE.to_owned()
        ]
    );
    assert!(store.get("slow").await.unwrap().is_none());
}

struct UnavailableStore;

#[async_trait]
impl ThreadStore for UnavailableStore {
    async fn get(&self, _thread_id: &str) -> StoreResult<Option<ThreadState>> {
        Err(StoreError::Backend("connection refused".into()))
    }

    async fn append_all(
        &self,
        _thread_id: &str,
        _turns: Vec<ConversationTurn>,
    ) -> StoreResult<()> {
        Err(StoreError::Backend("connection refused".into()))
    }

    async fn delete(&self, _thread_id: &str) -> StoreResult<bool> {
        Err(StoreError::Backend("connection refused".into()))
    }

    async fn list(&self) -> StoreResult<BTreeSet<String>> {
        Err(StoreError::Backend("connection refused".into()))
    }
}

#[tokio::test]
async fn store_failure_yields_error_block() {
    let orch = orchestrator(Arc::new(UnavailableStore), ScriptedEngine::new("x", Vec::new()));
    let items: Vec<String> = orch.stream(None, "hi".into()).unwrap().collect().await;

    assert_eq!(items.len(), 2);
    assert!(items[0].contains("Processing error: thread store error"));
    assert!(items[0].contains("connection refused"));
    assert_eq!(items[1], DONE);
}

/// Reads succeed, every write fails.
#[derive(Default)]
struct ReadOnlyStore {
    inner: MemoryThreadStore,
}

#[async_trait]
impl ThreadStore for ReadOnlyStore {
    async fn get(&self, thread_id: &str) -> StoreResult<Option<ThreadState>> {
        self.inner.get(thread_id).await
    }

    async fn append_all(
        &self,
        _thread_id: &str,
        _turns: Vec<ConversationTurn>,
    ) -> StoreResult<()> {
        Err(StoreError::Backend("write failed".into()))
    }

    async fn delete(&self, thread_id: &str) -> StoreResult<bool> {
        self.inner.delete(thread_id).await
    }

    async fn list(&self) -> StoreResult<BTreeSet<String>> {
        self.inner.list().await
    }
}

#[tokio::test]
async fn failed_commit_leaves_no_partial_turn() {
    let store = Arc::new(ReadOnlyStore::default());
    store
        .inner
        .append("t", ConversationTurn::user("earlier"))
        .await
        .unwrap();
    let orch = orchestrator(store.clone(), ScriptedEngine::new("answer", Vec::new()));

    let items: Vec<String> = orch.stream(Some("t".into()), "hello".into()).unwrap().collect().await;
    assert!(items[items.len() - 2].contains("Processing error: thread store error"));
    assert!(items[items.len() - 2].contains("write failed"));
    assert_eq!(items.last().map(String::as_str), Some(DONE));

    let turns = store.get("t").await.unwrap().unwrap().turns;
    let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, ["earlier"]);
}

// ── cancellation ─────────────────────────────────────────────────────────────

/// Sets its flag when dropped, i.e. when the engine future is torn down.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct SlowEngine {
    dropped: Arc<AtomicBool>,
    completed: Arc<AtomicBool>,
}

#[async_trait]
impl Engine for SlowEngine {
    async fn run(
        &self,
        _history: Vec<ConversationTurn>,
        hooks: EngineHooks,
    ) -> morn_agent::Result<Vec<ConversationTurn>> {
        let _guard = DropFlag(Arc::clone(&self.dropped));
        hooks.emit(EngineEvent::token("first")).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
        hooks.emit(EngineEvent::token("second")).await;
        self.completed.store(true, Ordering::SeqCst);
        Ok(vec![ConversationTurn::assistant("unreachable")])
    }
}

#[tokio::test]
async fn client_disconnect_aborts_engine_and_skips_persistence() {
    let store = Arc::new(MemoryThreadStore::new());
    let dropped = Arc::new(AtomicBool::new(false));
    let completed = Arc::new(AtomicBool::new(false));
    let engine = Arc::new(SlowEngine {
        dropped: Arc::clone(&dropped),
        completed: Arc::clone(&completed),
    });
    let orch = orchestrator(store.clone(), engine);

    let mut stream = orch.stream(Some("gone".into()), "hi".into()).unwrap();
    assert_eq!(stream.next().await.as_deref(), Some("first"));
    drop(stream);

    // The engine future must be torn down well before its 30s sleep ends.
    tokio::time::timeout(Duration::from_secs(2), async {
        while !dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("engine task was not aborted");

    assert!(!completed.load(Ordering::SeqCst));
    assert!(store.get("gone").await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_threads_do_not_interfere() {
    let store = Arc::new(MemoryThreadStore::new());
    let engine = ScriptedEngine::new(
        "pong",
        vec![
            Step::Sleep(Duration::from_millis(20)),
            Step::Emit(EngineEvent::TurnFinished {
                output: "pong".into(),
                usage: None,
            }),
        ],
    );
    let orch = orchestrator(store.clone(), engine);

    let mut handles = Vec::new();
    for i in 0..8 {
        let orch = orch.clone();
        handles.push(tokio::spawn(async move {
            let stream = orch.stream(Some(format!("t{i}")), "ping".into()).unwrap();
            stream.collect::<Vec<String>>().await
        }));
    }
    for handle in handles {
        let items = handle.await.unwrap();
        assert_eq!(items, vec![text_block("pong"), DONE.to_owned()]);
    }
    assert_eq!(store.list().await.unwrap().len(), 8);
}
