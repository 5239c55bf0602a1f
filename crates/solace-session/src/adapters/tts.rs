//! **Text-to-Speech** capability: push text chunks upstream, receive audio
//! chunks as they are synthesized.
//!
//! `HttpTts` covers OpenAI-compatible `/audio/speech` endpoints, chunking
//! each response body into frames; `ScriptedTts` drives tests.

use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Voice parameters for one AI utterance.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub voice_id: String,
    /// Wire format of emitted chunks, e.g. "mp3".
    pub output_format: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: "shimmer".to_string(),
            output_format: "mp3".to_string(),
        }
    }
}

/// Events on the audio side of an open TTS stream.
#[derive(Debug, Clone)]
pub enum TtsEvent {
    Audio(Vec<u8>),
    /// The vendor finished its output stream.
    Closed,
    Error { message: String },
}

/// Upstream half of an open TTS stream.
#[async_trait]
pub trait TtsSink: Send {
    async fn send_text(&mut self, text: &str) -> SessionResult<()>;
    /// Signal end of text. The audio side closes once the remaining chunks
    /// have been emitted.
    async fn close(&mut self) -> SessionResult<()>;
}

/// An open TTS stream: text goes into `sink`, audio comes out of `audio`.
pub struct TtsStream {
    pub sink: Box<dyn TtsSink>,
    pub audio: mpsc::Receiver<TtsEvent>,
}

/// The TTS capability. `channel_capacity` bounds the audio side so a slow
/// consumer stalls synthesis instead of buffering without limit.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn open_stream(
        &self,
        voice: &VoiceConfig,
        channel_capacity: usize,
    ) -> SessionResult<TtsStream>;
}

// -----------------------------------------------------------------------------
// Scripted backend for tests
// -----------------------------------------------------------------------------

/// Test double: emits `chunks_per_flush` fixed-size audio chunks per text
/// flush, optionally paced to simulate synthesis latency.
#[derive(Debug, Clone)]
pub struct ScriptedTts {
    pub chunks_per_flush: usize,
    pub chunk_bytes: usize,
    pub chunk_delay: Option<Duration>,
}

impl Default for ScriptedTts {
    fn default() -> Self {
        Self {
            chunks_per_flush: 2,
            chunk_bytes: 64,
            chunk_delay: None,
        }
    }
}

impl ScriptedTts {
    pub fn new(chunks_per_flush: usize) -> Self {
        Self {
            chunks_per_flush,
            ..Self::default()
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

struct ScriptedTtsSink {
    config: ScriptedTts,
    tx: mpsc::Sender<TtsEvent>,
}

#[async_trait]
impl TtsSink for ScriptedTtsSink {
    async fn send_text(&mut self, text: &str) -> SessionResult<()> {
        for i in 0..self.config.chunks_per_flush {
            if let Some(d) = self.config.chunk_delay {
                tokio::time::sleep(d).await;
            }
            // Deterministic bytes derived from the flush so tests can tell
            // chunks apart.
            let seed = (text.len() + i) as u8;
            let chunk = vec![seed; self.config.chunk_bytes];
            if self.tx.send(TtsEvent::Audio(chunk)).await.is_err() {
                return Err(SessionError::ChannelClosed("tts audio".to_string()));
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> SessionResult<()> {
        let _ = self.tx.send(TtsEvent::Closed).await;
        Ok(())
    }
}

#[async_trait]
impl TextToSpeech for ScriptedTts {
    async fn open_stream(
        &self,
        _voice: &VoiceConfig,
        channel_capacity: usize,
    ) -> SessionResult<TtsStream> {
        let (tx, audio) = mpsc::channel(channel_capacity.max(1));
        Ok(TtsStream {
            sink: Box::new(ScriptedTtsSink {
                config: self.clone(),
                tx,
            }),
            audio,
        })
    }
}

// -----------------------------------------------------------------------------
// OpenAI-compatible speech backend
// -----------------------------------------------------------------------------

const HTTP_AUDIO_CHUNK_BYTES: usize = 4096;

/// Production TTS against an OpenAI-compatible speech API.
/// Uses `TTS_API_URL` (e.g. https://api.openai.com/v1), `TTS_API_KEY`, and
/// `TTS_MODEL` (default tts-1). Each boundary flush becomes one synthesis
/// request; the response body is re-chunked onto the bounded audio channel.
#[derive(Debug, Clone)]
pub struct HttpTts {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    client: reqwest::Client,
}

impl HttpTts {
    pub fn from_env() -> SessionResult<Self> {
        let base_url = std::env::var("TTS_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("TTS_API_KEY")
            .or_else(|_| std::env::var("SOLACE_VENDOR_API_KEY"))
            .map_err(|_| {
                SessionError::VendorFatal(
                    "TTS requires TTS_API_KEY or SOLACE_VENDOR_API_KEY".to_string(),
                )
            })?;
        let model = std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SessionError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

struct HttpTtsSink {
    tts: HttpTts,
    voice: VoiceConfig,
    tx: mpsc::Sender<TtsEvent>,
}

#[async_trait]
impl TtsSink for HttpTtsSink {
    async fn send_text(&mut self, text: &str) -> SessionResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let url = format!("{}/audio/speech", self.tts.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.tts.model,
            "input": text,
            "voice": self.voice.voice_id,
            "response_format": self.voice.output_format,
        });
        let res = self
            .tts
            .client
            .post(&url)
            .bearer_auth(&self.tts.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(SessionError::VendorFatal(format!("TTS {status}: {body}")));
            }
            return Err(SessionError::Tts(format!("TTS API error {status}: {body}")));
        }
        let bytes = res
            .bytes()
            .await
            .map_err(|e| SessionError::Tts(e.to_string()))?;
        for chunk in bytes.chunks(HTTP_AUDIO_CHUNK_BYTES) {
            if self.tx.send(TtsEvent::Audio(chunk.to_vec())).await.is_err() {
                return Err(SessionError::ChannelClosed("tts audio".to_string()));
            }
        }
        Ok(())
    }

    async fn close(&mut self) -> SessionResult<()> {
        let _ = self.tx.send(TtsEvent::Closed).await;
        Ok(())
    }
}

#[async_trait]
impl TextToSpeech for HttpTts {
    async fn open_stream(
        &self,
        voice: &VoiceConfig,
        channel_capacity: usize,
    ) -> SessionResult<TtsStream> {
        let (tx, audio) = mpsc::channel(channel_capacity.max(1));
        Ok(TtsStream {
            sink: Box::new(HttpTtsSink {
                tts: self.clone(),
                voice: voice.clone(),
                tx,
            }),
            audio,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_emits_chunks_then_closed() {
        let tts = ScriptedTts::new(3);
        let mut stream = tts
            .open_stream(&VoiceConfig::default(), 8)
            .await
            .unwrap();

        stream.sink.send_text("Hello there.").await.unwrap();
        stream.sink.close().await.unwrap();

        let mut audio_chunks = 0;
        loop {
            match stream.audio.recv().await {
                Some(TtsEvent::Audio(bytes)) => {
                    assert!(!bytes.is_empty());
                    audio_chunks += 1;
                }
                Some(TtsEvent::Closed) => break,
                Some(TtsEvent::Error { message }) => panic!("unexpected: {message}"),
                None => panic!("stream ended without Closed"),
            }
        }
        assert_eq!(audio_chunks, 3);
    }
}
