//! Vendor adapter capabilities: STT, LLM, TTS.
//!
//! Each capability is a trait object shared by all sessions; the HTTP
//! implementations target OpenAI-compatible endpoints and the scripted
//! ones drive tests without a vendor. The memory store capability lives in
//! `solace-core`.

pub mod llm;
pub mod stt;
pub mod tts;

pub use llm::{HttpLlm, LanguageModel, LlmEvent, ScriptedLlm};
pub use stt::{
    AudioStreamConfig, HttpStt, ScriptedStt, SpeechToText, SttEvent, SttSink, SttStream,
};
pub use tts::{HttpTts, ScriptedTts, TextToSpeech, TtsEvent, TtsSink, TtsStream, VoiceConfig};
