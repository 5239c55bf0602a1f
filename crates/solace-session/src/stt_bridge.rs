//! Final-transcript filtering for the STT event stream.
//!
//! Upstream STT emits spurious empty finals and duplicate finals right
//! after the real one. Both are dropped here so a single utterance never
//! produces two downstream turns. Partials pass through unfiltered; they
//! update the visible transcript but never trigger the pipeline.

use tracing::debug;

/// Per-session filter over final transcripts.
#[derive(Debug, Default)]
pub struct FinalFilter {
    last_delivered: Option<String>,
}

impl FinalFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the trimmed final to deliver, or `None` when the event must
    /// be dropped (empty after trimming, or equal to the most recently
    /// delivered final for this session).
    pub fn accept(&mut self, text: &str) -> Option<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            debug!(target: "solace::stt", "dropping empty final transcript");
            return None;
        }
        if self.last_delivered.as_deref() == Some(trimmed) {
            debug!(target: "solace::stt", "dropping duplicate final transcript");
            return None;
        }
        let owned = trimmed.to_string();
        self.last_delivered = Some(owned.clone());
        Some(owned)
    }

    /// Clear the duplicate window (session teardown).
    pub fn reset(&mut self) {
        self.last_delivered = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_finals_are_dropped() {
        let mut f = FinalFilter::new();
        assert!(f.accept("").is_none());
        assert!(f.accept("   ").is_none());
    }

    #[test]
    fn duplicate_final_is_dropped() {
        let mut f = FinalFilter::new();
        assert_eq!(f.accept("hi").as_deref(), Some("hi"));
        assert!(f.accept("hi").is_none());
        assert!(f.accept("  hi  ").is_none());
    }

    #[test]
    fn new_text_passes_after_duplicate() {
        let mut f = FinalFilter::new();
        assert!(f.accept("hi").is_some());
        assert!(f.accept("hi").is_none());
        assert_eq!(f.accept("hi there").as_deref(), Some("hi there"));
    }

    #[test]
    fn reset_clears_window() {
        let mut f = FinalFilter::new();
        assert!(f.accept("hi").is_some());
        f.reset();
        assert!(f.accept("hi").is_some());
    }
}
