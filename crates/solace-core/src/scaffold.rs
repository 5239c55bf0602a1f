//! Per-user relationship scaffold and its in-memory cache.
//!
//! The scaffold is the psychological profile prompt assembly reads on the
//! hot path. Reads are bounded (150 ms) and never rebuild state; writes come
//! from two sides — realtime turn analysis and the background analyzer —
//! and the **freshness guard** decides whether a background write replaces
//! or merges.

use crate::config::SolaceConfig;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where a cached scaffold came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaffoldOrigin {
    Realtime,
    Background,
    Merged,
}

/// Relationship state consumed by prompt assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaffold {
    /// Current emotional themes, e.g. "building_trust + increasing_openness".
    #[serde(default)]
    pub emotional_undercurrent: String,
    /// Trust/intimacy phase (initial_curiosity .. intimate_companionship).
    #[serde(default)]
    pub relationship_depth: String,
    /// Current support mode (exploring, seeking_support, celebrating, ...).
    #[serde(default)]
    pub availability_mode: String,
    /// Communication preferences, key -> value.
    #[serde(default)]
    pub communication_style: BTreeMap<String, String>,
    /// What the user needs right now.
    #[serde(default)]
    pub support_needs: Vec<String>,
    /// Shared memories worth referencing.
    #[serde(default)]
    pub inside_references: Vec<String>,
    /// Ongoing topics that may need follow-up.
    #[serde(default)]
    pub unresolved_threads: Vec<String>,
    #[serde(default)]
    pub conversation_count: u32,
    /// Overall closeness, 0.0..=1.0.
    #[serde(default)]
    pub intimacy_score: f32,
}

impl Default for Scaffold {
    fn default() -> Self {
        Self {
            emotional_undercurrent: "neutral".to_string(),
            relationship_depth: "initial_curiosity".to_string(),
            availability_mode: "exploring".to_string(),
            communication_style: BTreeMap::new(),
            support_needs: Vec::new(),
            inside_references: Vec::new(),
            unresolved_threads: Vec::new(),
            conversation_count: 0,
            intimacy_score: 0.0,
        }
    }
}

impl Scaffold {
    /// The empty profile used when the cache has no entry for a user.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Clamps the score to its valid range.
    pub fn clamp(&mut self) {
        self.intimacy_score = self.intimacy_score.clamp(0.0, 1.0);
    }
}

/// Background categorical values that override a fresh realtime entry.
///
/// The merge table prefers the realtime value for categorical fields; these
/// indicate a transition the reply must not miss even mid-conversation.
pub const CRITICAL_UNDERCURRENTS: &[&str] = &["seeking_security", "crisis_support"];
pub const CRITICAL_AVAILABILITY_MODES: &[&str] = &["seeking_support"];

/// One cached entry: the scaffold plus its provenance.
#[derive(Debug, Clone)]
pub struct ScaffoldEntry {
    pub scaffold: Scaffold,
    pub updated_at: DateTime<Utc>,
    pub origin: ScaffoldOrigin,
}

/// Snapshot handed to prompt assembly. `stale` asks the caller to schedule
/// a warm; the scaffold itself is still usable.
#[derive(Debug, Clone)]
pub struct ScaffoldSnapshot {
    pub scaffold: Scaffold,
    pub origin: ScaffoldOrigin,
    pub updated_at: DateTime<Utc>,
    pub stale: bool,
}

/// Per-user scaffold cache. Keys are user ids; each entry carries its own
/// mutex so users never contend with each other.
pub struct ScaffoldCache {
    entries: DashMap<String, Arc<Mutex<ScaffoldEntry>>>,
    ttl_secs: i64,
    freshness_guard_secs: i64,
    background_weight: f32,
    read_timeout: Duration,
}

impl ScaffoldCache {
    pub fn new(config: &SolaceConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_secs: config.scaffold_cache_ttl_secs as i64,
            freshness_guard_secs: config.freshness_guard_secs,
            background_weight: config.background_weight,
            read_timeout: config.scaffold_read_timeout(),
        }
    }

    fn entry(&self, user_id: &str) -> Arc<Mutex<ScaffoldEntry>> {
        self.entries
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ScaffoldEntry {
                    scaffold: Scaffold::empty(),
                    updated_at: DateTime::<Utc>::MIN_UTC,
                    origin: ScaffoldOrigin::Background,
                }))
            })
            .value()
            .clone()
    }

    /// Read path for prompt assembly. Returns `None` on a cache miss or when
    /// the per-user lock cannot be acquired within the bounded wait; the
    /// caller falls back to the empty profile and schedules a warm.
    pub async fn get_for_session(&self, user_id: &str) -> Option<ScaffoldSnapshot> {
        let entry = self.entries.get(user_id)?.value().clone();
        let guard = tokio::time::timeout(self.read_timeout, entry.lock())
            .await
            .ok()?;
        if guard.updated_at == DateTime::<Utc>::MIN_UTC {
            return None;
        }
        let age = Utc::now()
            .signed_duration_since(guard.updated_at)
            .num_seconds();
        Some(ScaffoldSnapshot {
            scaffold: guard.scaffold.clone(),
            origin: guard.origin,
            updated_at: guard.updated_at,
            stale: age >= self.ttl_secs,
        })
    }

    /// Realtime write path: always wins over an older realtime and over any
    /// older background entry. `updated_at` never moves backwards.
    pub async fn apply_realtime(&self, user_id: &str, mut scaffold: Scaffold) {
        scaffold.clamp();
        let entry = self.entry(user_id);
        let mut guard = entry.lock().await;
        let now = Utc::now();
        guard.scaffold = scaffold;
        guard.origin = ScaffoldOrigin::Realtime;
        guard.updated_at = guard.updated_at.max(now);
        debug!(target: "solace::scaffold", user = user_id, "realtime scaffold applied");
    }

    /// Background write path, subject to the freshness guard: a realtime
    /// entry younger than the guard window is merged per the field table,
    /// never overwritten. Returns the resulting origin.
    pub async fn apply_background(&self, user_id: &str, mut scaffold: Scaffold) -> ScaffoldOrigin {
        scaffold.clamp();
        let entry = self.entry(user_id);
        let mut guard = entry.lock().await;
        let now = Utc::now();

        let realtime_age = now
            .signed_duration_since(guard.updated_at)
            .num_seconds();
        let guard_active = guard.origin == ScaffoldOrigin::Realtime
            && guard.updated_at != DateTime::<Utc>::MIN_UTC
            && realtime_age < self.freshness_guard_secs;

        if guard_active {
            info!(
                target: "solace::scaffold",
                user = user_id,
                age_secs = realtime_age,
                "freshness guard active, merging background update"
            );
            let merged = merge_scaffolds(&guard.scaffold, &scaffold, self.background_weight);
            guard.scaffold = merged;
            guard.origin = ScaffoldOrigin::Merged;
            guard.updated_at = guard.updated_at.max(now);
            ScaffoldOrigin::Merged
        } else {
            guard.scaffold = scaffold;
            guard.origin = ScaffoldOrigin::Background;
            guard.updated_at = guard.updated_at.max(now);
            debug!(target: "solace::scaffold", user = user_id, "background scaffold applied");
            ScaffoldOrigin::Background
        }
    }

    /// Optional reclamation once the user's last session detached. Skipped
    /// when the entry mutex is held elsewhere.
    pub fn reclaim(&self, user_id: &str) {
        if let Some(entry) = self.entries.get(user_id) {
            if Arc::strong_count(entry.value()) > 1 {
                warn!(target: "solace::scaffold", user = user_id, "skip reclaim, entry still shared");
                return;
            }
        }
        self.entries.remove(user_id);
    }

    /// Number of cached users (health reporting).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn union_into(base: &[String], incoming: &[String]) -> Vec<String> {
    let mut out: Vec<String> = base.to_vec();
    for item in incoming {
        if !out.iter().any(|existing| existing == item) {
            out.push(item.clone());
        }
    }
    out
}

/// Field-level merge when the freshness guard holds.
///
/// | Field kind | Rule |
/// |---|---|
/// | numeric score | weighted average, background side weighted `weight` |
/// | counters | max |
/// | lists | set union, existing order first |
/// | categorical | realtime value, unless the background value is critical |
/// | maps | union, realtime wins per key |
fn merge_scaffolds(realtime: &Scaffold, background: &Scaffold, weight: f32) -> Scaffold {
    let critical_undercurrent = CRITICAL_UNDERCURRENTS
        .iter()
        .any(|c| background.emotional_undercurrent.contains(c));
    let critical_mode = CRITICAL_AVAILABILITY_MODES
        .iter()
        .any(|c| background.availability_mode.contains(c));

    let mut communication_style = background.communication_style.clone();
    for (k, v) in &realtime.communication_style {
        communication_style.insert(k.clone(), v.clone());
    }

    let mut merged = Scaffold {
        emotional_undercurrent: if critical_undercurrent {
            background.emotional_undercurrent.clone()
        } else {
            realtime.emotional_undercurrent.clone()
        },
        relationship_depth: realtime.relationship_depth.clone(),
        availability_mode: if critical_mode {
            background.availability_mode.clone()
        } else {
            realtime.availability_mode.clone()
        },
        communication_style,
        support_needs: union_into(&realtime.support_needs, &background.support_needs),
        inside_references: union_into(&realtime.inside_references, &background.inside_references),
        unresolved_threads: union_into(&realtime.unresolved_threads, &background.unresolved_threads),
        conversation_count: realtime.conversation_count.max(background.conversation_count),
        intimacy_score: realtime.intimacy_score * (1.0 - weight)
            + background.intimacy_score * weight,
    };
    merged.clamp();
    merged
}
