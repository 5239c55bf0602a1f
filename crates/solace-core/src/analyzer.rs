//! Per-user background analyzer.
//!
//! Runs while a user has sessions (plus a grace period) and keeps the
//! scaffold cache current without ever touching a live conversation: a
//! cycle is skipped whenever the user has an active session or finished a
//! turn in the last few seconds, and its output goes through the cache's
//! background write path, which applies the freshness guard.

use crate::config::SolaceConfig;
use crate::memory::{MemoryKind, MemoryOp, MemoryRecord, MemoryStore, MemoryWriterHandle};
use crate::registry::SessionRegistry;
use crate::scaffold::{Scaffold, ScaffoldCache};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fixed psychological search themes. Exactly three searches per cycle,
/// whatever the personalization.
pub const ATTACHMENT_QUERY: &str =
    "attachment trust safety security comfort support emotional regulation crisis distress anxiety fear";
pub const VULNERABILITY_QUERY: &str =
    "vulnerable disclosure personal private secret sharing intimate emotional expression authentic feelings";
pub const GROWTH_QUERY: &str =
    "relationship growth progression development deeper connection understanding empathy companionship bond";

/// Everything a per-user analyzer task needs.
#[derive(Clone)]
pub struct AnalyzerContext {
    pub registry: Arc<SessionRegistry>,
    pub cache: Arc<ScaffoldCache>,
    pub store: Arc<dyn MemoryStore>,
    pub writer: MemoryWriterHandle,
    pub config: Arc<SolaceConfig>,
}

/// Start the user's analyzer if it is not already running. Called on every
/// session attach; idempotent.
pub fn ensure_analyzer_started(ctx: &AnalyzerContext, user_id: &str) {
    if ctx.registry.has_analyzer(user_id) {
        debug!(target: "solace::analyzer", user = user_id, "analyzer already running");
        return;
    }
    let task_ctx = ctx.clone();
    let user = user_id.to_string();
    let handle = tokio::spawn(async move {
        run_user_analyzer(task_ctx, user).await;
    });
    if ctx.registry.register_analyzer(user_id, handle) {
        info!(target: "solace::analyzer", user = user_id, "analyzer started");
    } else {
        // Lost the race to a concurrent attach; the duplicate was aborted.
        debug!(target: "solace::analyzer", user = user_id, "analyzer race, keeping existing task");
    }
}

async fn run_user_analyzer(ctx: AnalyzerContext, user_id: String) {
    loop {
        let interval = next_interval(&ctx, &user_id);
        tokio::time::sleep(interval).await;

        // Stop once the user has been gone longer than the grace period.
        if let Some(gone_secs) = ctx.registry.seconds_since_detach(&user_id) {
            if gone_secs >= ctx.config.analyzer_grace_secs {
                info!(
                    target: "solace::analyzer",
                    user = %user_id,
                    gone_secs,
                    "no sessions within grace period, stopping analyzer"
                );
                break;
            }
        }

        // Never analyze under an active conversation.
        if ctx.registry.is_user_active(&user_id)
            || ctx
                .registry
                .turn_finished_within(&user_id, ctx.config.analyzer_recent_turn_guard_secs)
        {
            debug!(target: "solace::analyzer", user = %user_id, "session active, skipping cycle");
            continue;
        }

        if let Err(e) = run_cycle(&ctx, &user_id).await {
            warn!(target: "solace::analyzer", user = %user_id, "analysis cycle failed: {e}");
        }
    }
    ctx.registry.remove_analyzer(&user_id);
}

/// One analysis cycle: three themed searches, synthesis, background
/// submission, and an evolution record for the memory log.
pub async fn run_cycle(ctx: &AnalyzerContext, user_id: &str) -> crate::error::CoreResult<()> {
    let limit = ctx.config.analyzer_search_limit;
    let existing = ctx
        .cache
        .get_for_session(user_id)
        .await
        .map(|s| s.scaffold)
        .unwrap_or_else(Scaffold::empty);

    let attachment = ctx
        .store
        .search(user_id, &personalized_query(ATTACHMENT_QUERY, &existing), limit)
        .await?;
    let vulnerability = ctx
        .store
        .search(user_id, &personalized_query(VULNERABILITY_QUERY, &existing), limit)
        .await?;
    let growth = ctx
        .store
        .search(user_id, &personalized_query(GROWTH_QUERY, &existing), limit)
        .await?;

    let profile = synthesize_profile(&attachment, &vulnerability, &growth, &existing);
    let summary = format!(
        "{} attachment, {} vulnerability, {} growth",
        attachment_style(&attachment),
        disclosure_depth(&vulnerability).0,
        growth_trajectory(&growth).0,
    );

    let origin = ctx.cache.apply_background(user_id, profile.clone()).await;
    info!(
        target: "solace::analyzer",
        user = user_id,
        origin = ?origin,
        "analysis cycle complete: {summary}"
    );

    ctx.writer.enqueue(MemoryOp::new(
        user_id,
        MemoryKind::RelationshipEvolution,
        serde_json::json!({
            "content": format!("Relationship analysis update: {summary}"),
            "analysis": {
                "emotional_undercurrent": profile.emotional_undercurrent,
                "relationship_depth": profile.relationship_depth,
                "support_needs": profile.support_needs,
                "intimacy_score": profile.intimacy_score,
            },
            "timestamp": Utc::now().to_rfc3339(),
        }),
    ));
    Ok(())
}

/// Theme queries may be colored by what we already know, but the count of
/// searches stays three.
fn personalized_query(base: &str, scaffold: &Scaffold) -> String {
    let depth = scaffold.relationship_depth.replace('_', " ");
    if depth.trim().is_empty() || depth == "initial curiosity" {
        base.to_string()
    } else {
        format!("{base} {depth}")
    }
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

fn attachment_style(records: &[MemoryRecord]) -> &'static str {
    let mut safety_seeking = 0usize;
    let mut crisis_moments = 0usize;
    for record in records {
        let text = record.content.to_lowercase();
        if contains_any(&text, &["help", "support", "comfort", "safe", "security"]) {
            safety_seeking += 1;
        }
        if contains_any(&text, &["crisis", "panic", "emergency", "desperate", "overwhelmed"]) {
            crisis_moments += 1;
        }
    }
    if crisis_moments > 3 {
        "anxious"
    } else if safety_seeking < 2 {
        "avoidant"
    } else {
        "secure"
    }
}

/// (depth label, comfort ratio 0..1)
fn disclosure_depth(records: &[MemoryRecord]) -> (&'static str, f32) {
    let mut intimate = 0usize;
    for record in records {
        let text = record.content.to_lowercase();
        if contains_any(&text, &["never told", "secret", "personal", "private", "intimate"]) {
            intimate += 1;
        }
    }
    let comfort = intimate as f32 / records.len().max(1) as f32;
    let label = if intimate >= 3 {
        "deep"
    } else if intimate >= 1 {
        "moderate"
    } else {
        "surface"
    };
    (label, comfort)
}

/// (trajectory label, companionship quality label)
fn growth_trajectory(records: &[MemoryRecord]) -> (&'static str, &'static str) {
    let mut growth = 0usize;
    let mut connection = 0usize;
    for record in records {
        let text = record.content.to_lowercase();
        if contains_any(&text, &["growth", "progress", "development", "better", "improve"]) {
            growth += 1;
        }
        if contains_any(&text, &["understand me", "get me", "connection", "bond", "close"]) {
            connection += 1;
        }
    }
    let trajectory = if growth >= 3 {
        "accelerating"
    } else if growth >= 1 {
        "progressing"
    } else {
        "stable"
    };
    let quality = match growth + connection {
        n if n >= 5 => "intimate",
        n if n >= 3 => "established",
        _ => "developing",
    };
    (trajectory, quality)
}

fn support_needs(attachment: &[MemoryRecord], vulnerability: &[MemoryRecord]) -> Vec<String> {
    let mut needs = Vec::new();
    let attachment_text: String = attachment
        .iter()
        .map(|r| r.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let vulnerability_text: String = vulnerability
        .iter()
        .map(|r| r.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    if contains_any(&attachment_text, &["crisis", "panic", "emergency"]) {
        needs.push("crisis_support".to_string());
    }
    if contains_any(&attachment_text, &["regulate", "calm", "breathe", "ground"]) {
        needs.push("emotional_regulation".to_string());
    }
    if attachment_style(attachment) == "anxious" {
        needs.push("reassurance".to_string());
    }
    if disclosure_depth(vulnerability).0 == "deep" {
        needs.push("validation".to_string());
    }
    if contains_any(&vulnerability_text, &["scared", "afraid", "terrified"]) {
        needs.push("comfort".to_string());
    }
    if contains_any(&vulnerability_text, &["sad", "crying", "heartbroken", "grief"]) {
        needs.push("empathetic_presence".to_string());
    }
    needs.truncate(3);
    needs
}

/// Merge the three search results into a scaffold proposal.
pub fn synthesize_profile(
    attachment: &[MemoryRecord],
    vulnerability: &[MemoryRecord],
    growth: &[MemoryRecord],
    existing: &Scaffold,
) -> Scaffold {
    let style = attachment_style(attachment);
    let (depth_label, comfort) = disclosure_depth(vulnerability);
    let (trajectory, quality) = growth_trajectory(growth);

    let mut themes: Vec<&str> = Vec::new();
    if style == "anxious" {
        themes.push("seeking_security");
    } else if !attachment.is_empty() {
        themes.push("building_trust");
    }
    if depth_label == "deep" {
        themes.push("deep_intimacy");
    } else if comfort > 0.3 {
        themes.push("increasing_openness");
    }
    let connection_deepening = growth.iter().any(|r| {
        contains_any(
            &r.content.to_lowercase(),
            &["understand me", "get me", "connection", "bond", "close"],
        )
    });
    if connection_deepening {
        themes.push("meaningful_connection");
    }
    let undercurrent = if themes.is_empty() {
        "exploring_connection".to_string()
    } else {
        themes.join(" + ")
    };

    let relationship_depth = match (depth_label, quality) {
        ("surface", _) => "initial_curiosity",
        ("moderate", "developing") => "growing_trust",
        ("moderate", _) => "emotional_availability",
        ("deep", _) => "intimate_companionship",
        _ => "growing_trust",
    };

    let mut communication_style = existing.communication_style.clone();
    communication_style.insert(
        "emotional_safety_needs".to_string(),
        if style == "anxious" { "high" } else { "moderate" }.to_string(),
    );
    communication_style.insert("vulnerability_comfort".to_string(), depth_label.to_string());
    communication_style.insert("connection_style".to_string(), quality.to_string());

    let conversation_count = existing
        .conversation_count
        .max((attachment.len() + vulnerability.len()) as u32);

    let mut scaffold = Scaffold {
        emotional_undercurrent: undercurrent,
        relationship_depth: relationship_depth.to_string(),
        availability_mode: if style == "anxious" || !support_needs(attachment, vulnerability).is_empty()
        {
            "seeking_support".to_string()
        } else if connection_deepening {
            "open_to_connection".to_string()
        } else {
            "exploring".to_string()
        },
        communication_style,
        support_needs: support_needs(attachment, vulnerability),
        inside_references: existing.inside_references.clone(),
        unresolved_threads: existing.unresolved_threads.clone(),
        conversation_count,
        intimacy_score: intimacy_score(relationship_depth, conversation_count, comfort),
    };
    scaffold.clamp();
    scaffold
}

fn intimacy_score(depth: &str, conversation_count: u32, vulnerability_comfort: f32) -> f32 {
    let depth_score = match depth {
        "initial_curiosity" => 0.1,
        "growing_trust" => 0.3,
        "emotional_availability" => 0.6,
        "intimate_companionship" => 0.9,
        _ => 0.1,
    };
    let conversation_factor = (conversation_count as f32 / 30.0).min(1.0);
    depth_score * 0.4 + conversation_factor * 0.3 + vulnerability_comfort.min(1.0) * 0.3
}

/// Adaptive cycle interval: more recent conversation, tighter loop.
fn next_interval(ctx: &AnalyzerContext, user_id: &str) -> Duration {
    let min = ctx.config.analyzer_min_interval_secs;
    let max = ctx.config.analyzer_max_interval_secs.max(min);
    let secs = if ctx.registry.turn_finished_within(user_id, 120) {
        min
    } else if ctx.registry.turn_finished_within(user_id, 600) {
        (min * 2).min(max)
    } else {
        max
    };
    Duration::from_secs(secs.clamp(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(content: &str) -> MemoryRecord {
        MemoryRecord {
            content: content.to_string(),
            score: 1.0,
            metadata: json!({}),
        }
    }

    #[test]
    fn empty_history_yields_exploring_profile() {
        let profile = synthesize_profile(&[], &[], &[], &Scaffold::empty());
        assert_eq!(profile.emotional_undercurrent, "exploring_connection");
        assert_eq!(profile.relationship_depth, "initial_curiosity");
        assert!(profile.intimacy_score < 0.2);
    }

    #[test]
    fn crisis_heavy_history_reads_anxious() {
        let attachment: Vec<MemoryRecord> = (0..4)
            .map(|i| record(&format!("felt panic and crisis again, episode {i}")))
            .collect();
        assert_eq!(attachment_style(&attachment), "anxious");

        let profile = synthesize_profile(&attachment, &[], &[], &Scaffold::empty());
        assert!(profile.emotional_undercurrent.contains("seeking_security"));
        assert!(profile.support_needs.contains(&"crisis_support".to_string()));
        assert_eq!(profile.availability_mode, "seeking_support");
    }

    #[test]
    fn deep_disclosures_raise_depth_and_score() {
        let vulnerability = vec![
            record("shared a secret I never told anyone"),
            record("something very personal and private"),
            record("an intimate fear about my family"),
        ];
        let growth = vec![
            record("our connection keeps growing"),
            record("I feel you understand me, real progress"),
            record("this bond is development I did not expect"),
        ];
        let attachment = vec![
            record("you make me feel safe"),
            record("thank you for the support and comfort"),
        ];
        let profile = synthesize_profile(&attachment, &vulnerability, &growth, &Scaffold::empty());
        assert_eq!(profile.relationship_depth, "intimate_companionship");
        assert!(profile.intimacy_score > 0.5);
        assert!(profile.emotional_undercurrent.contains("deep_intimacy"));
    }

    #[test]
    fn support_needs_cap_at_three() {
        let attachment = vec![
            record("crisis panic emergency"),
            record("crisis again"),
            record("panic again"),
            record("overwhelmed and desperate"),
            record("please help me calm down and breathe"),
        ];
        let vulnerability = vec![
            record("a secret I never told"),
            record("personal and private things"),
            record("intimate and scared"),
        ];
        let needs = support_needs(&attachment, &vulnerability);
        assert!(needs.len() <= 3);
        assert_eq!(needs[0], "crisis_support");
    }

    #[test]
    fn personalization_keeps_base_terms() {
        let mut scaffold = Scaffold::empty();
        scaffold.relationship_depth = "intimate_companionship".to_string();
        let q = personalized_query(ATTACHMENT_QUERY, &scaffold);
        assert!(q.starts_with(ATTACHMENT_QUERY));
        assert!(q.contains("intimate companionship"));

        let default_q = personalized_query(ATTACHMENT_QUERY, &Scaffold::empty());
        assert_eq!(default_q, ATTACHMENT_QUERY);
    }
}
