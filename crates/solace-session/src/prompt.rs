//! Prompt assembly: final user text + scaffold snapshot + optional recent
//! relational context, combined without ever awaiting the memory subsystem
//! on the hot path.

use solace_core::{MemoryStore, Scaffold, ScaffoldCache};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PERSONA_BLOCK: &str = "You are Solace, a warm voice companion. You listen closely, \
    remember what matters, and answer briefly because your words are spoken aloud. \
    Validate feelings without amplifying drama; suggest professional help when a \
    situation calls for it.";

/// Opaque prompt object handed to the LLM adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub system: String,
    pub user_text: String,
}

/// What the scaffold access resolved to, for logging and status frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaffoldUse {
    Fresh,
    Stale,
    Empty,
}

/// Assemble the prompt for one turn. The scaffold read is bounded inside
/// the cache (150 ms); a miss or timeout falls back to the empty profile
/// and the caller schedules a warm.
pub async fn assemble(
    cache: &ScaffoldCache,
    user_id: &str,
    user_text: &str,
    recent_context: Option<&str>,
) -> (AssembledPrompt, ScaffoldUse) {
    let (scaffold, used) = match cache.get_for_session(user_id).await {
        Some(snapshot) if snapshot.stale => (snapshot.scaffold, ScaffoldUse::Stale),
        Some(snapshot) => (snapshot.scaffold, ScaffoldUse::Fresh),
        None => {
            debug!(target: "solace::prompt", user = user_id, "no scaffold, using empty profile");
            (Scaffold::empty(), ScaffoldUse::Empty)
        }
    };

    let mut system = String::from(PERSONA_BLOCK);
    render_scaffold(&mut system, &scaffold);
    if let Some(context) = recent_context {
        if !context.trim().is_empty() {
            system.push_str("\n\nRecent context: ");
            system.push_str(context.trim());
        }
    }

    (
        AssembledPrompt {
            system,
            user_text: user_text.to_string(),
        },
        used,
    )
}

fn render_scaffold(out: &mut String, scaffold: &Scaffold) {
    out.push_str("\n\nRelationship state:");
    out.push_str(&format!(
        "\n- emotional undercurrent: {}",
        scaffold.emotional_undercurrent
    ));
    out.push_str(&format!("\n- depth: {}", scaffold.relationship_depth));
    out.push_str(&format!("\n- mode: {}", scaffold.availability_mode));
    if !scaffold.support_needs.is_empty() {
        out.push_str(&format!(
            "\n- support needs: {}",
            scaffold.support_needs.join(", ")
        ));
    }
    if !scaffold.inside_references.is_empty() {
        out.push_str(&format!(
            "\n- shared references: {}",
            scaffold.inside_references.join("; ")
        ));
    }
    if !scaffold.unresolved_threads.is_empty() {
        out.push_str(&format!(
            "\n- open threads: {}",
            scaffold.unresolved_threads.join("; ")
        ));
    }
}

/// Warm the scaffold cache for a user from stored memories: a cheap profile
/// derived from how much history exists, submitted through the background
/// write path so it never clobbers realtime insights.
pub async fn warm_scaffold(cache: &ScaffoldCache, store: &Arc<dyn MemoryStore>, user_id: &str) {
    let recent = match store.search(user_id, "conversation interaction", 10).await {
        Ok(records) => records,
        Err(e) => {
            warn!(target: "solace::prompt", user = user_id, "scaffold warm search failed: {e}");
            Vec::new()
        }
    };

    let conversation_count = recent.len() as u32;
    let relationship_depth = if conversation_count < 3 {
        "initial_curiosity"
    } else if conversation_count < 10 {
        "growing_trust"
    } else {
        "emotional_availability"
    };

    let mut scaffold = Scaffold {
        emotional_undercurrent: "exploring_connection".to_string(),
        relationship_depth: relationship_depth.to_string(),
        availability_mode: "open_to_connection".to_string(),
        conversation_count,
        intimacy_score: (conversation_count as f32 * 0.05).min(1.0),
        ..Scaffold::empty()
    };
    scaffold.clamp();

    cache.apply_background(user_id, scaffold).await;
    info!(target: "solace::prompt", user = user_id, conversation_count, "scaffold warmed");
}
