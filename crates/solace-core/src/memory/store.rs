//! Memory store capability and the local fallback implementation.

use super::op::{MemoryKind, MemoryOp};
use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A semantic search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// The matched content.
    pub content: String,
    /// Relevance score (0.0 to 1.0, higher is better).
    pub score: f32,
    /// Kind, timestamps, and any vendor metadata.
    pub metadata: Value,
}

/// Capability the writer and analyzer consume. Any compliant vendor client
/// works; batching is optional and defaults to a loop.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn upsert(&self, op: &MemoryOp) -> CoreResult<()>;

    /// Coalesced write for operations of one `(user, kind)` group. Vendors
    /// without batch support inherit the per-op loop.
    async fn upsert_batch(&self, ops: &[MemoryOp]) -> CoreResult<()> {
        for op in ops {
            self.upsert(op).await?;
        }
        Ok(())
    }

    async fn search(&self, user_id: &str, query: &str, limit: usize)
        -> CoreResult<Vec<MemoryRecord>>;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    kind: MemoryKind,
    content: String,
    payload: Value,
}

/// In-process store with keyword-overlap search. Used in tests and as the
/// graceful fallback when no external memory backend is configured.
#[derive(Default)]
pub struct InMemoryStore {
    records: DashMap<String, Vec<StoredRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored for a user.
    pub fn count_for(&self, user_id: &str) -> usize {
        self.records.get(user_id).map(|r| r.len()).unwrap_or(0)
    }
}

fn extract_content(payload: &Value) -> String {
    payload
        .get("content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn upsert(&self, op: &MemoryOp) -> CoreResult<()> {
        if op.user_id.trim().is_empty() {
            return Err(CoreError::Store("empty user id".to_string()));
        }
        self.records
            .entry(op.user_id.clone())
            .or_default()
            .push(StoredRecord {
                kind: op.kind,
                content: extract_content(&op.payload),
                payload: op.payload.clone(),
            });
        Ok(())
    }

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> CoreResult<Vec<MemoryRecord>> {
        let Some(records) = self.records.get(user_id) else {
            return Ok(Vec::new());
        };
        let terms: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<MemoryRecord> = records
            .iter()
            .filter_map(|record| {
                let haystack = record.content.to_lowercase();
                let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
                if matched == 0 {
                    return None;
                }
                Some(MemoryRecord {
                    content: record.content.clone(),
                    score: matched as f32 / terms.len() as f32,
                    metadata: serde_json::json!({
                        "kind": record.kind.as_str(),
                        "payload": record.payload,
                    }),
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_then_search_round_trips() {
        let store = InMemoryStore::new();
        let op = MemoryOp::new(
            "alice",
            MemoryKind::Conversation,
            json!({"content": "I trust you with this secret"}),
        );
        store.upsert(&op).await.unwrap();

        let hits = store.search("alice", "trust secret", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("secret"));
        assert!(hits[0].score > 0.9);
    }

    #[tokio::test]
    async fn search_is_scoped_per_user() {
        let store = InMemoryStore::new();
        store
            .upsert(&MemoryOp::new(
                "alice",
                MemoryKind::Conversation,
                json!({"content": "trust"}),
            ))
            .await
            .unwrap();
        assert!(store.search("bob", "trust", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn limit_caps_results() {
        let store = InMemoryStore::new();
        for i in 0..10 {
            store
                .upsert(&MemoryOp::new(
                    "alice",
                    MemoryKind::Conversation,
                    json!({"content": format!("growth note {i}")}),
                ))
                .await
                .unwrap();
        }
        let hits = store.search("alice", "growth", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
    }
}
