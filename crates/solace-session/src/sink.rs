//! Outbound event sink.
//!
//! One bounded channel per session, drained by the transport writer. Every
//! producer (actor, boundary task, audio pump) goes through this sink, so
//! the per-session outbound sequence is totally ordered. Sends are
//! deadline-bounded: a consumer that cannot keep up turns into a
//! `slow_consumer` failure instead of wedging the pipeline.

use crate::error::{SessionError, SessionResult};
use crate::frames::OutboundFrame;
use crate::playback::PlaybackSessions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Cloneable sender half of the session's outbound sequence.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<OutboundFrame>,
    playback: Arc<PlaybackSessions>,
    send_timeout: Duration,
}

impl EventSink {
    pub fn new(
        capacity: usize,
        playback: Arc<PlaybackSessions>,
        send_timeout: Duration,
    ) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                playback,
                send_timeout,
            },
            rx,
        )
    }

    /// Emit a control/text frame. Blocks until the channel has room, up to
    /// the slow-consumer deadline.
    pub async fn send(&self, frame: OutboundFrame) -> SessionResult<()> {
        match self.tx.send_timeout(frame, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => Err(SessionError::SlowConsumer),
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(SessionError::ChannelClosed("outbound".to_string()))
            }
        }
    }

    /// Patient send for terminal frames (`result`, `error`, final status):
    /// waits for channel room however long the consumer takes, returning
    /// only when the frame is queued or the transport is gone. Used where
    /// losing the frame would strand the client.
    pub async fn send_wait(&self, frame: OutboundFrame) -> SessionResult<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| SessionError::ChannelClosed("outbound".to_string()))
    }

    /// Emit an audio chunk tagged with its playback session. Chunks from an
    /// invalidated playback session are dropped silently; that is how
    /// late-arriving audio from an interrupted TTS stream dies.
    pub async fn send_audio(&self, playback_id: u64, bytes: &[u8]) -> SessionResult<()> {
        if !self.playback.is_current(playback_id) {
            debug!(target: "solace::session", playback_id, "dropping orphaned audio chunk");
            return Ok(());
        }
        self.send(OutboundFrame::audio(bytes)).await
    }

    /// Best-effort send for teardown paths where the consumer may be gone.
    pub fn try_send(&self, frame: OutboundFrame) {
        let _ = self.tx.try_send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::SessionStatus;

    fn sink(capacity: usize, timeout_ms: u64) -> (EventSink, mpsc::Receiver<OutboundFrame>, Arc<PlaybackSessions>) {
        let playback = Arc::new(PlaybackSessions::new());
        let (sink, rx) = EventSink::new(
            capacity,
            playback.clone(),
            Duration::from_millis(timeout_ms),
        );
        (sink, rx, playback)
    }

    #[tokio::test]
    async fn frames_arrive_in_send_order() {
        let (sink, mut rx, _) = sink(8, 100);
        sink.send(OutboundFrame::status(SessionStatus::Recording))
            .await
            .unwrap();
        sink.send(OutboundFrame::TokenStream {
            content: "hi".to_string(),
        })
        .await
        .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            OutboundFrame::status(SessionStatus::Recording)
        );
        assert!(matches!(
            rx.recv().await.unwrap(),
            OutboundFrame::TokenStream { .. }
        ));
    }

    #[tokio::test]
    async fn stale_playback_audio_is_dropped() {
        let (sink, mut rx, playback) = sink(8, 100);
        let id = playback.begin();
        playback.invalidate();

        sink.send_audio(id, &[1, 2, 3]).await.unwrap();
        sink.send(OutboundFrame::SpeechInterrupted).await.unwrap();

        // Only the interrupt ack made it through.
        assert_eq!(rx.recv().await.unwrap(), OutboundFrame::SpeechInterrupted);
    }

    #[tokio::test]
    async fn stalled_consumer_times_out_as_slow_consumer() {
        let (sink, _rx, playback) = sink(1, 20);
        let id = playback.begin();
        sink.send_audio(id, &[0u8; 8]).await.unwrap();
        // Channel is full and nobody is draining.
        let err = sink.send_audio(id, &[0u8; 8]).await.unwrap_err();
        assert!(matches!(err, SessionError::SlowConsumer));
    }
}
