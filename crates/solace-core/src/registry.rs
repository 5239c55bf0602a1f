//! Process-wide session registry.
//!
//! Tracks attached sessions, the set of *active* sessions (anything between
//! `Recording` and `Speaking`), and the per-user instants the background
//! analyzer gates on. All maps are keyed for concurrent access; there is no
//! global writer lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Registry of live sessions and per-user activity markers.
#[derive(Default)]
pub struct SessionRegistry {
    /// session_id -> user_id for every attached session.
    sessions: DashMap<String, String>,
    /// session_id -> user_id for sessions currently in an active state.
    active: DashMap<String, String>,
    /// user_id -> instant the user's last turn finished.
    last_turn_finished: DashMap<String, DateTime<Utc>>,
    /// user_id -> instant the user's last session detached.
    last_detach: DashMap<String, DateTime<Utc>>,
    /// user_id -> running background analyzer task.
    analyzers: DashMap<String, JoinHandle<()>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session on client attach.
    pub fn attach(&self, session_id: &str, user_id: &str) {
        self.sessions
            .insert(session_id.to_string(), user_id.to_string());
        info!(target: "solace::registry", session = session_id, user = user_id, "session attached");
    }

    /// Remove a session on detach. Returns the user id it belonged to.
    pub fn detach(&self, session_id: &str) -> Option<String> {
        self.active.remove(session_id);
        let user_id = self.sessions.remove(session_id).map(|(_, u)| u)?;
        if self.sessions_for_user(&user_id) == 0 {
            self.last_detach.insert(user_id.clone(), Utc::now());
        }
        info!(target: "solace::registry", session = session_id, user = %user_id, "session detached");
        Some(user_id)
    }

    /// Mark a session active (entered `Recording`..`Speaking`).
    pub fn mark_active(&self, session_id: &str) {
        if let Some(user_id) = self.sessions.get(session_id) {
            self.active
                .insert(session_id.to_string(), user_id.value().clone());
        }
    }

    /// Mark a session idle (returned to `Idle`).
    pub fn mark_idle(&self, session_id: &str) {
        self.active.remove(session_id);
    }

    /// Whether any of the user's sessions is currently active.
    pub fn is_user_active(&self, user_id: &str) -> bool {
        self.active.iter().any(|e| e.value() == user_id)
    }

    /// Whether the given session id is in the active set.
    pub fn is_session_active(&self, session_id: &str) -> bool {
        self.active.contains_key(session_id)
    }

    /// Number of attached sessions for a user.
    pub fn sessions_for_user(&self, user_id: &str) -> usize {
        self.sessions.iter().filter(|e| e.value() == user_id).count()
    }

    /// Record that a turn just finished for the user.
    pub fn note_turn_finished(&self, user_id: &str) {
        self.last_turn_finished
            .insert(user_id.to_string(), Utc::now());
    }

    /// Whether the user had a turn finish within the last `window_secs`.
    pub fn turn_finished_within(&self, user_id: &str, window_secs: i64) -> bool {
        self.last_turn_finished
            .get(user_id)
            .map(|t| Utc::now().signed_duration_since(*t).num_seconds() < window_secs)
            .unwrap_or(false)
    }

    /// Seconds since the user's last session detached, if all are gone.
    pub fn seconds_since_detach(&self, user_id: &str) -> Option<i64> {
        if self.sessions_for_user(user_id) > 0 {
            return None;
        }
        self.last_detach
            .get(user_id)
            .map(|t| Utc::now().signed_duration_since(*t).num_seconds())
    }

    /// Register the user's analyzer task. When a live one already exists
    /// the duplicate is aborted and false is returned.
    pub fn register_analyzer(&self, user_id: &str, handle: JoinHandle<()>) -> bool {
        if let Some(existing) = self.analyzers.get(user_id) {
            if !existing.is_finished() {
                handle.abort();
                return false;
            }
        }
        self.analyzers.insert(user_id.to_string(), handle);
        true
    }

    /// Whether a live analyzer task exists for the user.
    pub fn has_analyzer(&self, user_id: &str) -> bool {
        self.analyzers
            .get(user_id)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Drop the user's analyzer handle (the task has exited or must stop).
    pub fn remove_analyzer(&self, user_id: &str) {
        if let Some((_, handle)) = self.analyzers.remove(user_id) {
            handle.abort();
            debug!(target: "solace::registry", user = user_id, "analyzer handle removed");
        }
    }

    /// Stats for the health endpoint.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            attached_sessions: self.sessions.len(),
            active_sessions: self.active.len(),
            analyzers: self.analyzers.iter().filter(|h| !h.is_finished()).count(),
        }
    }
}

/// Counters reported by the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub attached_sessions: usize,
    pub active_sessions: usize,
    pub analyzers: usize,
}
