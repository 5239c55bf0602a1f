//! Text boundary buffer between the LLM token stream and TTS.
//!
//! Flushing on natural speech boundaries keeps synthesized audio from
//! starting mid-clause while still feeding the TTS early enough to avoid
//! underruns. Sentence-terminal punctuation always flushes; clause
//! punctuation flushes once the buffer has grown past the soft threshold;
//! the owner's idle timer flushes whatever is pending.

const SENTENCE_TERMINALS: &[char] = &['.', '!', '?', '\n'];
const CLAUSE_BREAKS: &[char] = &[',', ';', ':'];

/// Accumulates tokens and yields TTS-sized text chunks.
#[derive(Debug)]
pub struct BoundaryBuffer {
    buf: String,
    soft_limit: usize,
    max_bytes: usize,
}

impl BoundaryBuffer {
    pub fn new(soft_limit: usize, max_bytes: usize) -> Self {
        Self {
            buf: String::new(),
            soft_limit,
            max_bytes,
        }
    }

    /// Add a token. Returns a chunk when a boundary rule fires.
    pub fn push(&mut self, token: &str) -> Option<String> {
        self.buf.push_str(token);
        if self.should_flush() {
            self.take()
        } else {
            None
        }
    }

    /// Idle-timer flush: hand over whatever is pending.
    pub fn flush_idle(&mut self) -> Option<String> {
        self.take()
    }

    /// Final flush when the token stream ends.
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.trim().is_empty()
    }

    fn take(&mut self) -> Option<String> {
        let chunk = self.buf.trim().to_string();
        self.buf.clear();
        if chunk.is_empty() {
            None
        } else {
            Some(chunk)
        }
    }

    fn should_flush(&self) -> bool {
        let trimmed = self.buf.trim_end();
        if trimmed.is_empty() {
            return false;
        }
        if self.buf.len() >= self.max_bytes {
            return true;
        }
        let last = trimmed.chars().last().unwrap_or(' ');
        if SENTENCE_TERMINALS.contains(&last) {
            return true;
        }
        CLAUSE_BREAKS.contains(&last) && self.buf.len() >= self.soft_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> BoundaryBuffer {
        BoundaryBuffer::new(60, 150)
    }

    #[test]
    fn sentence_terminal_flushes() {
        let mut b = buffer();
        assert!(b.push("Hello").is_none());
        assert!(b.push(" there").is_none());
        assert_eq!(b.push(".").as_deref(), Some("Hello there."));
        assert!(b.is_empty());
    }

    #[test]
    fn clause_break_waits_for_soft_limit() {
        let mut b = buffer();
        assert!(b.push("short,").is_none());

        let long = "x".repeat(60);
        b.push(&long);
        assert!(b.push(",").is_some());
    }

    #[test]
    fn max_bytes_forces_flush() {
        let mut b = buffer();
        let chunk = b.push(&"y".repeat(151));
        assert!(chunk.is_some());
    }

    #[test]
    fn idle_flush_yields_pending_text() {
        let mut b = buffer();
        b.push("still going");
        assert_eq!(b.flush_idle().as_deref(), Some("still going"));
        assert!(b.flush_idle().is_none());
    }

    #[test]
    fn whitespace_only_never_flushes() {
        let mut b = buffer();
        assert!(b.push("   ").is_none());
        assert!(b.finish().is_none());
    }

    #[test]
    fn question_and_exclamation_flush() {
        let mut b = buffer();
        assert!(b.push("Really?").is_some());
        assert!(b.push("Yes!").is_some());
    }
}
