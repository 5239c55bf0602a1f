//! Behavior of the background analyzer against live process state: gating
//! on active sessions, the three-search invariant, and the freshness guard
//! on its output.

use async_trait::async_trait;
use serde_json::json;
use solace_core::analyzer::{run_cycle, AnalyzerContext};
use solace_core::{
    CoreResult, InMemoryStore, MemoryKind, MemoryOp, MemoryRecord, MemoryStore, Scaffold,
    ScaffoldCache, ScaffoldOrigin, SessionRegistry, SolaceConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Store that counts searches so tests can assert the three-search rule.
struct CountingStore {
    inner: InMemoryStore,
    searches: AtomicUsize,
}

#[async_trait]
impl MemoryStore for CountingStore {
    async fn upsert(&self, op: &MemoryOp) -> CoreResult<()> {
        self.inner.upsert(op).await
    }

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> CoreResult<Vec<MemoryRecord>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        self.inner.search(user_id, query, limit).await
    }
}

fn context(store: Arc<CountingStore>) -> (AnalyzerContext, tokio::task::JoinHandle<()>) {
    let config = Arc::new(SolaceConfig {
        batch_window_ms: 10,
        ..SolaceConfig::default()
    });
    let registry = Arc::new(SessionRegistry::new());
    let cache = Arc::new(ScaffoldCache::new(&config));
    let (writer, worker) =
        solace_core::spawn_memory_writer(store.clone() as Arc<dyn MemoryStore>, &config);
    (
        AnalyzerContext {
            registry,
            cache,
            store,
            writer,
            config,
        },
        worker,
    )
}

#[tokio::test]
async fn cycle_issues_exactly_three_searches() {
    let store = Arc::new(CountingStore {
        inner: InMemoryStore::new(),
        searches: AtomicUsize::new(0),
    });
    let (ctx, worker) = context(store.clone());

    run_cycle(&ctx, "alice").await.unwrap();
    assert_eq!(store.searches.load(Ordering::SeqCst), 3);

    drop(ctx);
    worker.await.unwrap();
}

#[tokio::test]
async fn cycle_enqueues_relationship_evolution() {
    let store = Arc::new(CountingStore {
        inner: InMemoryStore::new(),
        searches: AtomicUsize::new(0),
    });
    let (ctx, worker) = context(store.clone());

    store
        .upsert(&MemoryOp::new(
            "alice",
            MemoryKind::Conversation,
            json!({"content": "I trust you, you make me feel safe and supported"}),
        ))
        .await
        .unwrap();

    run_cycle(&ctx, "alice").await.unwrap();

    drop(ctx);
    worker.await.unwrap();

    // The conversation plus the evolution record written by the cycle.
    assert_eq!(store.inner.count_for("alice"), 2);
}

#[tokio::test]
async fn background_result_respects_fresh_realtime_entry() {
    let store = Arc::new(CountingStore {
        inner: InMemoryStore::new(),
        searches: AtomicUsize::new(0),
    });
    let (ctx, worker) = context(store.clone());

    let mut realtime = Scaffold::empty();
    realtime.intimacy_score = 0.8;
    realtime.emotional_undercurrent = "building_trust".to_string();
    ctx.cache.apply_realtime("alice", realtime).await;

    run_cycle(&ctx, "alice").await.unwrap();

    let snap = ctx.cache.get_for_session("alice").await.unwrap();
    assert_eq!(snap.origin, ScaffoldOrigin::Merged);
    // Realtime side dominates the blend (weight 0.6) and the categorical.
    assert!(snap.scaffold.intimacy_score > 0.4);
    assert_eq!(snap.scaffold.emotional_undercurrent, "building_trust");

    drop(ctx);
    worker.await.unwrap();
}

#[tokio::test]
async fn scaffold_write_read_round_trip_is_byte_equal() {
    let store = Arc::new(CountingStore {
        inner: InMemoryStore::new(),
        searches: AtomicUsize::new(0),
    });
    let (ctx, worker) = context(store);

    let mut scaffold = Scaffold::empty();
    scaffold.emotional_undercurrent = "deep_intimacy".to_string();
    scaffold.support_needs = vec!["validation".to_string(), "comfort".to_string()];
    scaffold.intimacy_score = 0.73;
    scaffold
        .communication_style
        .insert("connection_style".to_string(), "established".to_string());

    ctx.cache.apply_realtime("alice", scaffold.clone()).await;
    let snap = ctx.cache.get_for_session("alice").await.unwrap();
    assert_eq!(snap.scaffold, scaffold);

    drop(ctx);
    worker.await.unwrap();
}
