//! # Solace Session
//!
//! The session orchestration core: a per-client actor couples streaming
//! STT, LLM, and TTS through a staged state machine
//! (`Idle → Recording → Finalizing → Generating → Speaking → Idle`, with
//! barge-in edges), while the memory subsystem in `solace-core` runs
//! alongside without ever blocking the hot path.
//!
//! ```text
//! transport ──frames──▶ [mailbox] ──▶ SessionActor ──▶ [outbound sink] ──▶ transport
//!                           ▲               │
//!      STT events ──────────┘               ▼
//!                              LLM tokens ─▶ boundary ─▶ TTS ─▶ audio pump
//! ```

pub mod adapters;
pub mod boundary;
pub mod error;
pub mod frames;
pub mod pipeline;
pub mod playback;
pub mod prompt;
pub mod session;
pub mod sink;
pub mod state;
pub mod stt_bridge;

pub use adapters::{
    AudioStreamConfig, HttpLlm, HttpStt, HttpTts, LanguageModel, ScriptedLlm, ScriptedStt,
    ScriptedTts, SpeechToText, TextToSpeech, VoiceConfig,
};
pub use error::{SessionError, SessionResult};
pub use frames::{InboundFrame, OutboundFrame, SessionStatus};
pub use playback::PlaybackSessions;
pub use prompt::AssembledPrompt;
pub use session::{spawn_session, SessionDeps, SessionHandle, SessionMsg};
pub use sink::EventSink;
pub use state::SessionState;
