//! Playback session ids.
//!
//! Each AI utterance gets a fresh monotonically increasing id. The outbound
//! sink compares ids before forwarding audio, so chunks from a TTS stream
//! that was interrupted are dropped without the stream holding a reference
//! back into the session.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic playback-session counter, shared between the session actor,
/// the pipeline, and the outbound sink.
#[derive(Debug, Default)]
pub struct PlaybackSessions {
    current: AtomicU64,
}

impl PlaybackSessions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new playback session and return its id.
    pub fn begin(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Invalidate the current playback session (barge-in, cleanup). Audio
    /// tagged with any older id becomes an orphan.
    pub fn invalidate(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_current(&self, id: u64) -> bool {
        self.current.load(Ordering::SeqCst) == id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_is_monotonic() {
        let p = PlaybackSessions::new();
        let a = p.begin();
        let b = p.begin();
        assert!(b > a);
        assert!(p.is_current(b));
        assert!(!p.is_current(a));
    }

    #[test]
    fn invalidate_orphans_current() {
        let p = PlaybackSessions::new();
        let id = p.begin();
        p.invalidate();
        assert!(!p.is_current(id));
    }
}
