//! Typed memory operations and their dedupe fingerprint.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// What a memory operation writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Conversation,
    ScaffoldUpdate,
    RelationshipEvolution,
    GraphRelationship,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::ScaffoldUpdate => "scaffold_update",
            Self::RelationshipEvolution => "relationship_evolution",
            Self::GraphRelationship => "graph_relationship",
        }
    }
}

/// One queued write. Delivered at-least-once to the writer, applied
/// at-most-once per dedupe hash within the writer's window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryOp {
    pub user_id: String,
    pub kind: MemoryKind,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
}

impl MemoryOp {
    pub fn new(user_id: impl Into<String>, kind: MemoryKind, payload: Value) -> Self {
        Self {
            user_id: user_id.into(),
            kind,
            payload,
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }

    /// Fingerprint over `(user, kind, normalized payload, hour bucket)`.
    pub fn dedupe_hash(&self) -> String {
        dedupe_hash(&self.user_id, self.kind, &self.payload, self.enqueued_at)
    }
}

/// Deterministic hash that is stable for a one-hour window, so the same
/// payload enqueued twice in quick succession collapses while a legitimate
/// repetition hours later still lands.
pub fn dedupe_hash(user_id: &str, kind: MemoryKind, payload: &Value, at: DateTime<Utc>) -> String {
    let bucket = at.timestamp() - i64::from(at.minute()) * 60 - i64::from(at.second());
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(b"|");
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(canonical_json(payload).as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serialize with object keys sorted so insertion order never changes the
/// fingerprint. Strings are lowercased and trimmed, matching how the
/// upstream conversation text is normalized before hashing.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        Value::String(s) => s.trim().to_lowercase(),
        other => other.to_string(),
    }
}
