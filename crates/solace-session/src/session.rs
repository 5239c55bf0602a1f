//! The session controller.
//!
//! One actor task per client owns all mutable session state. Transport
//! frames and vendor callbacks never touch the state directly; they post
//! messages into the per-session mailbox and the actor serializes every
//! transition. Outbound events leave through one bounded sink, so the
//! client sees a single totally-ordered sequence.

use crate::adapters::{
    AudioStreamConfig, LanguageModel, SpeechToText, SttEvent, SttSink, TextToSpeech, VoiceConfig,
};
use crate::error::{SessionError, SessionResult};
use crate::frames::{decode_audio, InboundFrame, OutboundFrame, SessionStatus};
use crate::pipeline::{spawn_turn, TurnParams};
use crate::playback::PlaybackSessions;
use crate::prompt::{assemble, warm_scaffold, ScaffoldUse};
use crate::sink::EventSink;
use crate::state::SessionState;
use crate::stt_bridge::FinalFilter;
use solace_core::{
    ensure_analyzer_started, AnalyzerContext, MemoryKind, MemoryOp, MemoryStore,
    MemoryWriterHandle, Scaffold, ScaffoldCache, SessionRegistry, SolaceConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAILBOX_CAPACITY: usize = 64;
/// Chunks shorter than one 10 ms frame of 16 kHz s16le are noise.
const MIN_AUDIO_CHUNK_BYTES: usize = 320;

/// Messages the actor consumes. Vendor callbacks are marshalled here
/// instead of mutating session state.
#[derive(Debug)]
pub enum SessionMsg {
    Frame(InboundFrame),
    /// Transport-level protocol violation (e.g. an unparseable frame).
    Protocol(String),
    SttPartial(String),
    SttFinal(String),
    SttClosed,
    SttError(String),
    TurnSpeaking {
        turn_id: String,
    },
    TurnComplete {
        turn_id: String,
        transcript: String,
        reply: String,
        outcome: SessionResult<()>,
    },
    Detach,
}

/// Process-wide collaborators injected into every session.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<SolaceConfig>,
    pub registry: Arc<SessionRegistry>,
    pub cache: Arc<ScaffoldCache>,
    pub store: Arc<dyn MemoryStore>,
    pub writer: MemoryWriterHandle,
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
    pub voice: VoiceConfig,
}

/// Transport-facing handle: the four controller operations plus detach.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub user_id: String,
    mailbox: mpsc::Sender<SessionMsg>,
}

impl SessionHandle {
    pub async fn send_frame(&self, frame: InboundFrame) {
        let _ = self.mailbox.send(SessionMsg::Frame(frame)).await;
    }

    /// Report a transport-level protocol violation; the session answers
    /// with an `error` frame and keeps its current state.
    pub async fn report_protocol_error(&self, message: String) {
        let _ = self.mailbox.send(SessionMsg::Protocol(message)).await;
    }

    pub async fn open_audio_stream(&self, sample_rate: u32, channels: u8, format: String) {
        self.send_frame(InboundFrame::AudioStreamStart {
            sample_rate,
            channels,
            format,
        })
        .await;
    }

    pub async fn push_audio_chunk(&self, audio_data: String) {
        self.send_frame(InboundFrame::AudioChunk { audio_data }).await;
    }

    pub async fn close_audio_stream(&self) {
        self.send_frame(InboundFrame::AudioStreamEnd).await;
    }

    pub async fn interrupt(&self) {
        self.send_frame(InboundFrame::InterruptSpeech).await;
    }

    pub async fn detach(&self) {
        let _ = self.mailbox.send(SessionMsg::Detach).await;
    }
}

struct ActiveTurn {
    turn_id: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Create a session for an attached client: registers it, starts the user's
/// analyzer, and spawns the actor. The returned receiver is the session's
/// totally-ordered outbound sequence.
pub fn spawn_session(
    user_id: &str,
    deps: SessionDeps,
) -> (
    SessionHandle,
    mpsc::Receiver<OutboundFrame>,
    JoinHandle<()>,
) {
    let session_id = Uuid::new_v4().to_string();
    let playback = Arc::new(PlaybackSessions::new());
    let (sink, outbound) = EventSink::new(
        deps.config.outbound_channel_capacity,
        playback.clone(),
        deps.config.slow_consumer_timeout(),
    );
    let (mailbox_tx, mailbox_rx) = mpsc::channel(MAILBOX_CAPACITY);

    deps.registry.attach(&session_id, user_id);
    ensure_analyzer_started(
        &AnalyzerContext {
            registry: deps.registry.clone(),
            cache: deps.cache.clone(),
            store: deps.store.clone(),
            writer: deps.writer.clone(),
            config: deps.config.clone(),
        },
        user_id,
    );

    let actor = SessionActor {
        session_id: session_id.clone(),
        user_id: user_id.to_string(),
        deps,
        state: SessionState::Idle,
        sink,
        playback,
        stt_sink: None,
        stt_task: None,
        expect_stt_close: false,
        turn: None,
        recent_context: None,
        // Weak so the session winds down when the transport drops its
        // handle without an explicit detach.
        mailbox: mailbox_tx.downgrade(),
    };
    let task = tokio::spawn(actor.run(mailbox_rx));

    (
        SessionHandle {
            session_id,
            user_id: user_id.to_string(),
            mailbox: mailbox_tx,
        },
        outbound,
        task,
    )
}

struct SessionActor {
    session_id: String,
    user_id: String,
    deps: SessionDeps,
    state: SessionState,
    sink: EventSink,
    playback: Arc<PlaybackSessions>,
    stt_sink: Option<Box<dyn SttSink>>,
    stt_task: Option<JoinHandle<()>>,
    /// True when we closed the STT upstream ourselves, so its `Closed`
    /// event is expected and not a vendor failure.
    expect_stt_close: bool,
    turn: Option<ActiveTurn>,
    recent_context: Option<String>,
    mailbox: mpsc::WeakSender<SessionMsg>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionMsg>) {
        self.announce_scaffold().await;

        while let Some(msg) = rx.recv().await {
            match msg {
                SessionMsg::Frame(frame) => self.handle_frame(frame).await,
                SessionMsg::Protocol(message) => self.protocol_error(message).await,
                SessionMsg::SttPartial(text) => self.handle_partial(text).await,
                SessionMsg::SttFinal(text) => self.handle_final(text).await,
                SessionMsg::SttClosed => self.handle_stt_closed().await,
                SessionMsg::SttError(message) => self.handle_stt_error(message).await,
                SessionMsg::TurnSpeaking { turn_id } => self.handle_turn_speaking(&turn_id),
                SessionMsg::TurnComplete {
                    turn_id,
                    transcript,
                    reply,
                    outcome,
                } => {
                    self.handle_turn_complete(turn_id, transcript, reply, outcome)
                        .await
                }
                SessionMsg::Detach => {
                    self.cleanup("detach").await;
                    self.finish_detach();
                    return;
                }
            }
        }
        // Transport dropped the mailbox without an explicit detach.
        self.cleanup("transport closed").await;
        self.finish_detach();
    }

    /// Attach-time scaffold warm: tell the client whether its profile is
    /// ready, and build one in the background when it is not.
    async fn announce_scaffold(&self) {
        if self.deps.cache.get_for_session(&self.user_id).await.is_some() {
            self.emit(OutboundFrame::status(SessionStatus::ScaffoldReady))
                .await;
            return;
        }
        self.emit(OutboundFrame::status(SessionStatus::ScaffoldWarming))
            .await;
        let cache = self.deps.cache.clone();
        let store = self.deps.store.clone();
        let user_id = self.user_id.clone();
        let sink = self.sink.clone();
        tokio::spawn(async move {
            warm_scaffold(&cache, &store, &user_id).await;
            sink.try_send(OutboundFrame::status(SessionStatus::ScaffoldReady));
        });
    }

    async fn handle_frame(&mut self, frame: InboundFrame) {
        match frame {
            InboundFrame::AudioStreamStart {
                sample_rate,
                channels,
                format,
            } => {
                self.handle_stream_start(sample_rate, channels, format)
                    .await
            }
            InboundFrame::AudioChunk { audio_data } => self.handle_audio_chunk(audio_data).await,
            InboundFrame::AudioStreamEnd => self.handle_stream_end().await,
            InboundFrame::InterruptSpeech => self.handle_interrupt().await,
            InboundFrame::Ping => debug!(target: "solace::session", session = %self.session_id, "ping"),
        }
    }

    async fn handle_stream_start(&mut self, sample_rate: u32, channels: u8, format: String) {
        if self.state != SessionState::Idle {
            self.protocol_error(format!(
                "audio_stream_start while {}",
                self.state.as_str()
            ))
            .await;
            return;
        }
        if format != "raw_pcm_s16le" {
            self.protocol_error(format!("unsupported audio format: {format}"))
                .await;
            return;
        }
        // A leftover upstream from a previous utterance is stale by now.
        self.close_stt("new stream").await;

        let config = AudioStreamConfig {
            sample_rate,
            channels,
            format,
        };
        let opened = tokio::time::timeout(
            self.deps.config.vendor_request_timeout(),
            self.deps.stt.open_stream(&config),
        )
        .await;
        let stream = match opened {
            Err(_) => {
                self.emit(OutboundFrame::Error {
                    message: "vendor_timeout: stt open".to_string(),
                })
                .await;
                return;
            }
            Ok(Err(e)) => {
                self.emit(OutboundFrame::Error {
                    message: format!("{}: {e}", e.failure_kind().label()),
                })
                .await;
                return;
            }
            Ok(Ok(stream)) => stream,
        };

        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        self.stt_sink = Some(stream.sink);
        self.expect_stt_close = false;
        self.stt_task = Some(spawn_stt_bridge(stream.events, mailbox));
        self.set_state(SessionState::Recording);
        self.emit(OutboundFrame::status(SessionStatus::Recording)).await;
    }

    async fn handle_audio_chunk(&mut self, audio_data: String) {
        if self.state != SessionState::Recording {
            warn!(
                target: "solace::session",
                session = %self.session_id,
                state = self.state.as_str(),
                "dropping audio chunk outside recording"
            );
            return;
        }
        let pcm = match decode_audio(&audio_data) {
            Ok(pcm) => pcm,
            Err(e) => {
                self.protocol_error(e.to_string()).await;
                return;
            }
        };
        if pcm.len() < MIN_AUDIO_CHUNK_BYTES {
            debug!(
                target: "solace::session",
                session = %self.session_id,
                bytes = pcm.len(),
                "dropping undersized audio chunk"
            );
            return;
        }
        let Some(sink) = self.stt_sink.as_mut() else {
            return;
        };
        if let Err(e) = sink.send_audio(pcm).await {
            warn!(target: "solace::session", session = %self.session_id, "stt send failed: {e}");
            self.emit(OutboundFrame::Error {
                message: format!("{}: {e}", e.failure_kind().label()),
            })
            .await;
            self.close_stt("send failure").await;
            self.set_state(SessionState::Idle);
        }
    }

    async fn handle_stream_end(&mut self) {
        if self.state != SessionState::Recording {
            debug!(
                target: "solace::session",
                session = %self.session_id,
                state = self.state.as_str(),
                "audio_stream_end outside recording, ignoring"
            );
            return;
        }
        self.emit(OutboundFrame::status(SessionStatus::RecordingComplete))
            .await;
        // Stop the audio side; finals may still arrive on the event side.
        if let Some(sink) = self.stt_sink.as_mut() {
            self.expect_stt_close = true;
            if let Err(e) = sink.close().await {
                warn!(target: "solace::session", session = %self.session_id, "stt close failed: {e}");
            }
        }
    }

    async fn handle_interrupt(&mut self) {
        match self.state {
            SessionState::Idle => {
                debug!(target: "solace::session", session = %self.session_id, "interrupt while idle, no-op");
            }
            SessionState::Recording => {
                self.close_stt("interrupt").await;
                self.set_state(SessionState::Idle);
                self.emit(OutboundFrame::SpeechInterrupted).await;
            }
            SessionState::Finalizing | SessionState::Generating | SessionState::Speaking => {
                self.barge_in().await;
            }
        }
    }

    /// Barge-in: invalidate playback so late TTS chunks die at the sink,
    /// cancel the turn, ack the client, and free the session for a new
    /// recording immediately.
    async fn barge_in(&mut self) {
        info!(target: "solace::session", session = %self.session_id, "barge-in");
        if let Some(turn) = self.turn.take() {
            self.playback.invalidate();
            let _ = turn.cancel.send(true);
            abort_after(turn.task, self.deps.config.cleanup_subcall_timeout());
        }
        self.close_stt("barge-in").await;
        self.set_state(SessionState::Idle);
        self.emit(OutboundFrame::SpeechInterrupted).await;
    }

    async fn handle_partial(&mut self, text: String) {
        if self.state == SessionState::Recording {
            self.emit(OutboundFrame::TranscriptToken { content: text }).await;
        }
    }

    async fn handle_final(&mut self, text: String) {
        if self.state != SessionState::Recording {
            warn!(
                target: "solace::session",
                session = %self.session_id,
                state = self.state.as_str(),
                "dropping final transcript outside recording"
            );
            return;
        }
        info!(target: "solace::session", session = %self.session_id, "final transcript: {text:?}");
        self.set_state(SessionState::Finalizing);
        self.emit(OutboundFrame::TranscriptToken {
            content: text.clone(),
        })
        .await;
        self.emit(OutboundFrame::status(SessionStatus::TranscriptionComplete))
            .await;
        // This utterance is done; the next one opens a fresh upstream.
        self.close_stt("utterance finalized").await;

        let (prompt, scaffold_use) = assemble(
            &self.deps.cache,
            &self.user_id,
            &text,
            self.recent_context.as_deref(),
        )
        .await;
        if scaffold_use == ScaffoldUse::Empty || scaffold_use == ScaffoldUse::Stale {
            let cache = self.deps.cache.clone();
            let store = self.deps.store.clone();
            let user_id = self.user_id.clone();
            tokio::spawn(async move {
                warm_scaffold(&cache, &store, &user_id).await;
            });
        }

        let Some(mailbox) = self.mailbox.upgrade() else {
            return;
        };
        // Status goes out before the turn task exists, so no token can
        // outrun the `llm_tts_streaming` marker.
        self.set_state(SessionState::Generating);
        self.emit(OutboundFrame::status(SessionStatus::LlmTtsStreaming))
            .await;

        let turn_id = Uuid::new_v4().to_string();
        let playback_id = self.playback.begin();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = spawn_turn(TurnParams {
            turn_id: turn_id.clone(),
            transcript: text,
            prompt,
            llm: self.deps.llm.clone(),
            tts: self.deps.tts.clone(),
            voice: self.deps.voice.clone(),
            sink: self.sink.clone(),
            playback_id,
            config: self.deps.config.clone(),
            cancel: cancel_rx,
            mailbox,
        });
        self.turn = Some(ActiveTurn {
            turn_id,
            cancel: cancel_tx,
            task,
        });
    }

    async fn handle_stt_closed(&mut self) {
        if self.expect_stt_close {
            self.expect_stt_close = false;
            if let Some(task) = self.stt_task.take() {
                task.abort();
            }
            return;
        }
        if self.state == SessionState::Recording {
            // Vendor dropped mid-utterance: no final will come.
            warn!(target: "solace::session", session = %self.session_id, "stt closed during recording");
            self.emit(OutboundFrame::Error {
                message: "vendor_transient: speech stream closed unexpectedly".to_string(),
            })
            .await;
            self.close_stt("vendor closed").await;
            self.set_state(SessionState::Idle);
        }
    }

    async fn handle_stt_error(&mut self, message: String) {
        warn!(target: "solace::session", session = %self.session_id, "stt error: {message}");
        if self.state == SessionState::Recording || self.state == SessionState::Finalizing {
            self.emit(OutboundFrame::Error {
                message: format!("vendor_transient: {message}"),
            })
            .await;
            self.close_stt("vendor error").await;
            self.set_state(SessionState::Idle);
        }
    }

    fn handle_turn_speaking(&mut self, turn_id: &str) {
        let current = self.turn.as_ref().map(|t| t.turn_id.as_str());
        if current == Some(turn_id) && self.state == SessionState::Generating {
            self.set_state(SessionState::Speaking);
        }
    }

    async fn handle_turn_complete(
        &mut self,
        turn_id: String,
        transcript: String,
        reply: String,
        outcome: SessionResult<()>,
    ) {
        let current = self.turn.as_ref().map(|t| t.turn_id.clone());
        if current.as_deref() != Some(turn_id.as_str()) {
            debug!(target: "solace::session", session = %self.session_id, "stale turn completion, ignoring");
            return;
        }
        self.turn = None;

        match outcome {
            Ok(()) => {
                self.emit_wait(OutboundFrame::status(SessionStatus::StreamingComplete))
                    .await;
                self.emit_wait(OutboundFrame::Result {
                    transcript: transcript.clone(),
                    ai_response: reply.clone(),
                })
                .await;
                self.set_state(SessionState::Idle);
                self.deps.registry.note_turn_finished(&self.user_id);
                self.recent_context = Some(summarize_turn(&transcript, &reply));
                self.finish_turn_memory(&transcript, &reply).await;
            }
            Err(e) => {
                // Barge-in is not client-visible: the ack already went out
                // and this completion just settles the state.
                if e.is_client_visible() {
                    warn!(target: "solace::session", session = %self.session_id, "turn failed: {e}");
                    // A slow consumer that recovers must still learn its
                    // turn died, so terminal errors wait for channel room.
                    self.emit_wait(OutboundFrame::Error {
                        message: format!("{}: {e}", e.failure_kind().label()),
                    })
                    .await;
                }
                self.set_state(SessionState::Idle);
                if matches!(e, SessionError::VendorFatal(_)) {
                    // Keep the analyzer down until the user attaches again.
                    self.deps.registry.remove_analyzer(&self.user_id);
                }
            }
        }
    }

    /// Persist the finished turn and fold it into the realtime scaffold.
    /// Everything here is enqueue-only; failures never surface mid-session.
    async fn finish_turn_memory(&mut self, transcript: &str, reply: &str) {
        self.deps.writer.enqueue(MemoryOp::new(
            &self.user_id,
            MemoryKind::Conversation,
            serde_json::json!({
                "content": format!("User: {transcript}\nSolace: {reply}"),
                "user_message": transcript,
                "ai_response": reply,
                "session_id": self.session_id,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        ));

        let existing = self
            .deps
            .cache
            .get_for_session(&self.user_id)
            .await
            .map(|s| s.scaffold)
            .unwrap_or_else(Scaffold::empty);
        let updated = realtime_scaffold_from_turn(&existing, transcript);
        self.deps
            .cache
            .apply_realtime(&self.user_id, updated.clone())
            .await;

        self.deps.writer.enqueue(MemoryOp::new(
            &self.user_id,
            MemoryKind::ScaffoldUpdate,
            serde_json::json!({
                "content": format!("Realtime scaffold update: {}", updated.availability_mode),
                "availability_mode": updated.availability_mode,
                "conversation_count": updated.conversation_count,
                "intimacy_score": updated.intimacy_score,
            }),
        ));

        if let Some(emotion) = detect_emotion(transcript) {
            self.deps.writer.enqueue(MemoryOp::new(
                &self.user_id,
                MemoryKind::GraphRelationship,
                serde_json::json!({
                    "content": format!("feels {emotion}"),
                    "relationship_type": "feels",
                    "emotion": emotion,
                    "intensity": "medium",
                }),
            ));
        }
    }

    /// Idempotent teardown: STT upstream, running turn, playback validity,
    /// active-set membership. Every subcall is bounded; expiry logs and
    /// proceeds. Safe to invoke from any edge, any number of times.
    async fn cleanup(&mut self, reason: &str) {
        info!(target: "solace::session", session = %self.session_id, reason, "cleanup");
        self.close_stt(reason).await;
        if let Some(turn) = self.turn.take() {
            let _ = turn.cancel.send(true);
            abort_after(turn.task, self.deps.config.cleanup_subcall_timeout());
        }
        self.playback.invalidate();
        self.set_state(SessionState::Idle);
    }

    async fn close_stt(&mut self, reason: &str) {
        if let Some(mut sink) = self.stt_sink.take() {
            self.expect_stt_close = true;
            if tokio::time::timeout(self.deps.config.cleanup_subcall_timeout(), sink.close())
                .await
                .is_err()
            {
                warn!(
                    target: "solace::session",
                    session = %self.session_id,
                    reason,
                    "stt close timed out, proceeding"
                );
            }
        }
    }

    fn finish_detach(&mut self) {
        self.deps.registry.detach(&self.session_id);
        if self.deps.registry.sessions_for_user(&self.user_id) == 0 {
            self.deps.cache.reclaim(&self.user_id);
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(
                target: "solace::session",
                session = %self.session_id,
                from = self.state.as_str(),
                to = next.as_str(),
                "illegal state transition"
            );
            return;
        }
        debug!(
            target: "solace::session",
            session = %self.session_id,
            from = self.state.as_str(),
            to = next.as_str(),
            "state transition"
        );
        self.state = next;
        if next.is_active() {
            self.deps.registry.mark_active(&self.session_id);
        } else {
            self.deps.registry.mark_idle(&self.session_id);
        }
    }

    async fn protocol_error(&self, message: String) {
        warn!(target: "solace::session", session = %self.session_id, "protocol error: {message}");
        self.emit(OutboundFrame::Error {
            message: format!("client_protocol: {message}"),
        })
        .await;
    }

    /// Outbound emission from the actor itself. A stalled consumer is
    /// logged here; turn-level slow-consumer failures come from the
    /// pipeline, which owns the turn outcome.
    async fn emit(&self, frame: OutboundFrame) {
        if let Err(e) = self.sink.send(frame).await {
            warn!(target: "solace::session", session = %self.session_id, "outbound send failed: {e}");
        }
    }

    /// Patient variant for frames the client must not lose.
    async fn emit_wait(&self, frame: OutboundFrame) {
        if let Err(e) = self.sink.send_wait(frame).await {
            warn!(target: "solace::session", session = %self.session_id, "outbound send failed: {e}");
        }
    }
}

/// Demultiplex STT events into the mailbox, filtering finals.
fn spawn_stt_bridge(
    mut events: mpsc::Receiver<SttEvent>,
    mailbox: mpsc::Sender<SessionMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut filter = FinalFilter::new();
        while let Some(event) = events.recv().await {
            let msg = match event {
                SttEvent::Partial { text } => Some(SessionMsg::SttPartial(text)),
                SttEvent::Final { text } => filter.accept(&text).map(SessionMsg::SttFinal),
                SttEvent::Closed => Some(SessionMsg::SttClosed),
                SttEvent::Error { message } => Some(SessionMsg::SttError(message)),
            };
            if let Some(msg) = msg {
                if mailbox.send(msg).await.is_err() {
                    return;
                }
            }
        }
    })
}

/// Give a turn task a bounded window to notice cancellation, then abort it.
fn abort_after(task: JoinHandle<()>, grace: Duration) {
    tokio::spawn(async move {
        let mut task = task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            task.abort();
        }
    });
}

/// Char-boundary-safe prefix.
fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn summarize_turn(transcript: &str, reply: &str) -> String {
    format!(
        "they said \"{}\", you answered \"{}\"",
        clip(transcript, 120),
        clip(reply, 120)
    )
}

/// Fold one finished turn into the realtime scaffold.
fn realtime_scaffold_from_turn(existing: &Scaffold, user_text: &str) -> Scaffold {
    let text = user_text.to_lowercase();
    let mut updated = existing.clone();
    updated.conversation_count = existing.conversation_count.saturating_add(1);

    if ["happy", "excited", "great", "wonderful"]
        .iter()
        .any(|w| text.contains(w))
    {
        updated.availability_mode = "celebrating".to_string();
    } else if ["sad", "worried", "stressed", "difficult"]
        .iter()
        .any(|w| text.contains(w))
    {
        updated.availability_mode = "seeking_support".to_string();
    } else if ["confused", "thinking", "wondering"]
        .iter()
        .any(|w| text.contains(w))
    {
        updated.availability_mode = "processing".to_string();
    }

    if ["worried", "anxious", "concerned", "stressed"]
        .iter()
        .any(|w| text.contains(w))
    {
        if let Some((_, tail)) = text.split_once("about") {
            let thread = clip(&format!("concerned about{tail}"), 60);
            if !updated.unresolved_threads.contains(&thread) {
                updated.unresolved_threads.push(thread);
            }
        }
    }
    while updated.unresolved_threads.len() > 3 {
        updated.unresolved_threads.remove(0);
    }

    updated.intimacy_score = (updated.intimacy_score + 0.01).min(1.0);
    updated.clamp();
    updated
}

/// Emotion keyword scan over the user's words, for the relationship graph.
fn detect_emotion(text: &str) -> Option<&'static str> {
    let text = text.to_lowercase();
    let table: [(&str, &[&str]); 6] = [
        ("fear", &["scared", "afraid", "terrified"]),
        ("sadness", &["sad", "crying", "heartbroken", "grief"]),
        ("joy", &["happy", "excited", "thrilled", "joyful"]),
        ("anger", &["angry", "furious", "mad", "irritated"]),
        ("shame", &["ashamed", "embarrassed", "humiliated"]),
        ("love", &["love", "adore", "cherish", "devoted"]),
    ];
    table
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(emotion, _)| *emotion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emotion_table_matches_keywords() {
        assert_eq!(detect_emotion("I am so scared of tomorrow"), Some("fear"));
        assert_eq!(detect_emotion("feeling happy today"), Some("joy"));
        assert_eq!(detect_emotion("the weather is fine"), None);
    }

    #[test]
    fn turn_update_bumps_count_and_mode() {
        let updated = realtime_scaffold_from_turn(&Scaffold::empty(), "I'm worried about my exam");
        assert_eq!(updated.conversation_count, 1);
        assert_eq!(updated.availability_mode, "seeking_support");
        assert_eq!(updated.unresolved_threads.len(), 1);
        assert!(updated.unresolved_threads[0].starts_with("concerned about"));
    }

    #[test]
    fn threads_are_capped_at_three() {
        let mut scaffold = Scaffold::empty();
        for topic in ["a", "b", "c", "d"] {
            scaffold = realtime_scaffold_from_turn(
                &scaffold,
                &format!("I'm worried about topic {topic}"),
            );
        }
        assert_eq!(scaffold.unresolved_threads.len(), 3);
    }

    #[test]
    fn summary_is_bounded() {
        let long = "x".repeat(500);
        let summary = summarize_turn(&long, &long);
        assert!(summary.len() < 300);
    }
}
