//! The memory writer: one long-lived worker draining a multi-producer
//! queue of [`MemoryOp`]s.
//!
//! Sessions and the analyzer only ever enqueue; nothing on the hot path
//! waits for a write. The worker deduplicates by fingerprint, coalesces
//! same-`(user, kind)` arrivals into batches, and retries with capped
//! exponential backoff before dropping.

use super::op::MemoryOp;
use super::store::MemoryStore;
use crate::config::SolaceConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Counters reported by the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryWriterStats {
    /// Operations sitting in the queue, not yet drained by the worker.
    pub pending_operations: usize,
    /// Fingerprints currently held in the dedupe window.
    pub dedupe_cache_size: usize,
}

/// Cheap handle for producers. Enqueueing never blocks a session: a full
/// queue drops the operation with a warning.
#[derive(Clone)]
pub struct MemoryWriterHandle {
    tx: mpsc::Sender<MemoryOp>,
    queue_capacity: usize,
    dedupe_size: Arc<AtomicUsize>,
}

impl MemoryWriterHandle {
    /// Queue depth and dedupe-window size, for health reporting.
    pub fn stats(&self) -> MemoryWriterStats {
        MemoryWriterStats {
            pending_operations: self.queue_capacity.saturating_sub(self.tx.capacity()),
            dedupe_cache_size: self.dedupe_size.load(Ordering::Relaxed),
        }
    }

    pub fn enqueue(&self, op: MemoryOp) {
        match self.tx.try_send(op) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(op)) => {
                warn!(
                    target: "solace::memory",
                    user = %op.user_id,
                    kind = op.kind.as_str(),
                    "memory queue full, dropping operation"
                );
            }
            Err(mpsc::error::TrySendError::Closed(op)) => {
                warn!(
                    target: "solace::memory",
                    user = %op.user_id,
                    kind = op.kind.as_str(),
                    "memory writer stopped, dropping operation"
                );
            }
        }
    }
}

/// Spawn the writer worker. Returns the producer handle and the worker's
/// join handle; the worker exits once every producer handle is dropped and
/// the queue is drained.
pub fn spawn_memory_writer(
    store: Arc<dyn MemoryStore>,
    config: &SolaceConfig,
) -> (MemoryWriterHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.memory_queue_capacity);
    let dedupe_size = Arc::new(AtomicUsize::new(0));
    let worker = Worker {
        store,
        dedupe_window: config.dedupe_window(),
        batch_window: config.batch_window(),
        max_batch_size: config.max_batch_size,
        retry_base: Duration::from_millis(config.retry_base_ms),
        retry_cap: Duration::from_millis(config.retry_cap_ms),
        max_attempts: config.max_write_attempts,
        seen: HashMap::new(),
        dedupe_size: dedupe_size.clone(),
    };
    let handle = tokio::spawn(worker.run(rx));
    (
        MemoryWriterHandle {
            tx,
            queue_capacity: config.memory_queue_capacity,
            dedupe_size,
        },
        handle,
    )
}

struct Worker {
    store: Arc<dyn MemoryStore>,
    dedupe_window: Duration,
    batch_window: Duration,
    max_batch_size: usize,
    retry_base: Duration,
    retry_cap: Duration,
    max_attempts: u32,
    /// fingerprint -> last time it was accepted.
    seen: HashMap<String, Instant>,
    /// Mirror of `seen.len()` readable from producer handles.
    dedupe_size: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<MemoryOp>) {
        info!(target: "solace::memory", "memory writer started");
        while let Some(first) = rx.recv().await {
            let batch = self.collect_window(first, &mut rx).await;
            let accepted = self.dedupe(batch);
            if accepted.is_empty() {
                continue;
            }
            for group in group_by_user_kind(accepted, self.max_batch_size) {
                self.write_with_retry(group).await;
            }
        }
        info!(target: "solace::memory", "memory writer drained and stopped");
    }

    /// Gather everything that arrives within one batch window after the
    /// first op. Order of arrival is preserved.
    async fn collect_window(
        &self,
        first: MemoryOp,
        rx: &mut mpsc::Receiver<MemoryOp>,
    ) -> Vec<MemoryOp> {
        let mut batch = vec![first];
        let deadline = Instant::now() + self.batch_window;
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(op)) => {
                    batch.push(op);
                    // One window can cover several (user, kind) groups, but
                    // cap how long the drain can grow.
                    if batch.len() >= self.max_batch_size * 4 {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        batch
    }

    /// Drop ops whose fingerprint was accepted within the dedupe window.
    fn dedupe(&mut self, ops: Vec<MemoryOp>) -> Vec<MemoryOp> {
        let now = Instant::now();
        self.seen
            .retain(|_, at| now.duration_since(*at) < self.dedupe_window);

        let mut accepted = Vec::with_capacity(ops.len());
        for op in ops {
            let hash = op.dedupe_hash();
            if self.seen.contains_key(&hash) {
                debug!(
                    target: "solace::memory",
                    user = %op.user_id,
                    kind = op.kind.as_str(),
                    "duplicate operation within window, dropping"
                );
                continue;
            }
            self.seen.insert(hash, now);
            accepted.push(op);
        }
        self.dedupe_size.store(self.seen.len(), Ordering::Relaxed);
        accepted
    }

    /// Write one `(user, kind)` group with exponential backoff. Terminal
    /// failure is logged and dropped; it never reaches a session.
    async fn write_with_retry(&self, mut group: Vec<MemoryOp>) {
        let user = group[0].user_id.clone();
        let kind = group[0].kind;
        let mut delay = self.retry_base;
        for attempt in 1..=self.max_attempts {
            for op in group.iter_mut() {
                op.attempts = attempt;
            }
            match self.store.upsert_batch(&group).await {
                Ok(()) => {
                    debug!(
                        target: "solace::memory",
                        user = %user,
                        kind = kind.as_str(),
                        ops = group.len(),
                        attempt,
                        "memory batch written"
                    );
                    return;
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        target: "solace::memory",
                        user = %user,
                        kind = kind.as_str(),
                        attempt,
                        "memory write failed: {e}, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.retry_cap);
                }
                Err(e) => {
                    error!(
                        target: "solace::memory",
                        user = %user,
                        kind = kind.as_str(),
                        ops = group.len(),
                        "memory write failed after {} attempts, dropping: {e}",
                        self.max_attempts
                    );
                }
            }
        }
    }
}

/// Split a drained window into per-`(user, kind)` groups, preserving
/// enqueue order within each group and capping group size.
fn group_by_user_kind(ops: Vec<MemoryOp>, max_batch_size: usize) -> Vec<Vec<MemoryOp>> {
    let mut order: Vec<(String, super::op::MemoryKind)> = Vec::new();
    let mut groups: HashMap<(String, super::op::MemoryKind), Vec<Vec<MemoryOp>>> = HashMap::new();

    for op in ops {
        let key = (op.user_id.clone(), op.kind);
        let chunks = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            vec![Vec::new()]
        });
        let needs_new_chunk = chunks
            .last()
            .map(|c| c.len() >= max_batch_size)
            .unwrap_or(true);
        if needs_new_chunk {
            chunks.push(Vec::new());
        }
        if let Some(chunk) = chunks.last_mut() {
            chunk.push(op);
        }
    }

    let mut out = Vec::new();
    for key in order {
        if let Some(chunks) = groups.remove(&key) {
            out.extend(chunks.into_iter().filter(|c| !c.is_empty()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, CoreResult};
    use crate::memory::op::MemoryKind;
    use crate::memory::store::{InMemoryStore, MemoryRecord};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    fn fast_config() -> SolaceConfig {
        SolaceConfig {
            batch_window_ms: 20,
            retry_base_ms: 5,
            retry_cap_ms: 20,
            ..SolaceConfig::default()
        }
    }

    #[tokio::test]
    async fn duplicate_within_window_written_once() {
        let store = Arc::new(InMemoryStore::new());
        let (handle, worker) = spawn_memory_writer(store.clone(), &fast_config());

        let payload = json!({"content": "hello"});
        handle.enqueue(MemoryOp::new("u1", MemoryKind::Conversation, payload.clone()));
        handle.enqueue(MemoryOp::new("u1", MemoryKind::Conversation, payload));
        drop(handle);
        worker.await.unwrap();

        assert_eq!(store.count_for("u1"), 1);
    }

    #[tokio::test]
    async fn distinct_payloads_both_written() {
        let store = Arc::new(InMemoryStore::new());
        let (handle, worker) = spawn_memory_writer(store.clone(), &fast_config());

        handle.enqueue(MemoryOp::new(
            "u1",
            MemoryKind::Conversation,
            json!({"content": "hello"}),
        ));
        handle.enqueue(MemoryOp::new(
            "u1",
            MemoryKind::Conversation,
            json!({"content": "goodbye"}),
        ));
        drop(handle);
        worker.await.unwrap();

        assert_eq!(store.count_for("u1"), 2);
    }

    /// Store that records every batch call and fails the first N.
    struct FlakyStore {
        fail_first: usize,
        calls: AtomicUsize,
        batches: Mutex<Vec<usize>>,
        inner: InMemoryStore,
    }

    #[async_trait]
    impl MemoryStore for FlakyStore {
        async fn upsert(&self, op: &MemoryOp) -> CoreResult<()> {
            self.inner.upsert(op).await
        }

        async fn upsert_batch(&self, ops: &[MemoryOp]) -> CoreResult<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(CoreError::Store("transient".to_string()));
            }
            self.batches.lock().await.push(ops.len());
            for op in ops {
                self.inner.upsert(op).await?;
            }
            Ok(())
        }

        async fn search(
            &self,
            user_id: &str,
            query: &str,
            limit: usize,
        ) -> CoreResult<Vec<MemoryRecord>> {
            self.inner.search(user_id, query, limit).await
        }
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let store = Arc::new(FlakyStore {
            fail_first: 2,
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            inner: InMemoryStore::new(),
        });
        let (handle, worker) = spawn_memory_writer(store.clone(), &fast_config());
        handle.enqueue(MemoryOp::new(
            "u1",
            MemoryKind::Conversation,
            json!({"content": "retry me"}),
        ));
        drop(handle);
        worker.await.unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.count_for("u1"), 1);
    }

    #[tokio::test]
    async fn terminal_failure_drops_without_panic() {
        let store = Arc::new(FlakyStore {
            fail_first: usize::MAX,
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            inner: InMemoryStore::new(),
        });
        let (handle, worker) = spawn_memory_writer(store.clone(), &fast_config());
        handle.enqueue(MemoryOp::new(
            "u1",
            MemoryKind::Conversation,
            json!({"content": "doomed"}),
        ));
        drop(handle);
        worker.await.unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 5);
        assert_eq!(store.inner.count_for("u1"), 0);
    }

    #[tokio::test]
    async fn same_user_kind_ops_are_batched() {
        let store = Arc::new(FlakyStore {
            fail_first: 0,
            calls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
            inner: InMemoryStore::new(),
        });
        let (handle, worker) = spawn_memory_writer(store.clone(), &fast_config());
        for i in 0..4 {
            handle.enqueue(MemoryOp::new(
                "u1",
                MemoryKind::Conversation,
                json!({"content": format!("msg {i}")}),
            ));
        }
        drop(handle);
        worker.await.unwrap();

        let batches = store.batches.lock().await;
        assert_eq!(batches.iter().sum::<usize>(), 4);
        // All four arrived inside one window, so one coalesced call.
        assert_eq!(batches.len(), 1);
    }

    #[tokio::test]
    async fn stats_report_queue_and_dedupe_window() {
        let store = Arc::new(InMemoryStore::new());
        let (handle, worker) = spawn_memory_writer(store, &fast_config());
        assert_eq!(handle.stats().pending_operations, 0);
        assert_eq!(handle.stats().dedupe_cache_size, 0);

        handle.enqueue(MemoryOp::new(
            "u1",
            MemoryKind::Conversation,
            json!({"content": "hello"}),
        ));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = handle.stats();
        assert_eq!(stats.pending_operations, 0);
        assert_eq!(stats.dedupe_cache_size, 1);

        drop(handle);
        worker.await.unwrap();
    }

    #[test]
    fn grouping_preserves_order_and_caps_size() {
        let mut ops = Vec::new();
        for i in 0..5 {
            ops.push(MemoryOp::new(
                "u1",
                MemoryKind::Conversation,
                json!({"content": format!("a{i}")}),
            ));
        }
        ops.push(MemoryOp::new(
            "u2",
            MemoryKind::Conversation,
            json!({"content": "b"}),
        ));
        let groups = group_by_user_kind(ops, 2);
        assert_eq!(groups.len(), 4); // u1 split 2+2+1, u2 once
        assert_eq!(groups[0][0].payload["content"], "a0");
        assert_eq!(groups[2][0].payload["content"], "a4");
        assert_eq!(groups[3][0].user_id, "u2");
    }
}
