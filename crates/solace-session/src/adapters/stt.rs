//! **Speech-to-Text** capability: forward client PCM upstream, receive
//! partial and final transcripts as typed events.
//!
//! Implement [`SpeechToText`] for any streaming vendor. `HttpStt` covers
//! OpenAI-compatible transcription endpoints (buffer-and-post, one final);
//! `ScriptedStt` drives tests without a vendor.

use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Client audio stream parameters, as negotiated in `audio_stream_start`.
#[derive(Debug, Clone)]
pub struct AudioStreamConfig {
    pub sample_rate: u32,
    pub channels: u8,
    pub format: String,
}

impl Default for AudioStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            format: "raw_pcm_s16le".to_string(),
        }
    }
}

/// Events demultiplexed from the vendor connection.
#[derive(Debug, Clone)]
pub enum SttEvent {
    /// Cumulative partial transcript of the current utterance.
    Partial { text: String },
    /// A final transcript. May be empty or duplicated upstream; the session
    /// bridge filters those.
    Final { text: String },
    /// The vendor closed its side of the stream.
    Closed,
    Error { message: String },
}

/// Upstream half of an open STT stream.
#[async_trait]
pub trait SttSink: Send + Sync {
    async fn send_audio(&mut self, pcm: Vec<u8>) -> SessionResult<()>;
    /// Stop sending audio. Finals may still arrive on the event side.
    async fn close(&mut self) -> SessionResult<()>;
}

/// An open STT stream: audio goes into `sink`, transcripts come out of
/// `events`.
pub struct SttStream {
    pub sink: Box<dyn SttSink>,
    pub events: mpsc::Receiver<SttEvent>,
}

/// The STT capability. Vendor clients are singletons serving many
/// concurrent streams.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn open_stream(&self, config: &AudioStreamConfig) -> SessionResult<SttStream>;
}

// -----------------------------------------------------------------------------
// Scripted backend for tests
// -----------------------------------------------------------------------------

/// Test double: emits one scripted partial per audio chunk, then the
/// scripted finals (in order) when the audio side closes.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStt {
    pub partials: Vec<String>,
    pub finals: Vec<String>,
}

impl ScriptedStt {
    pub fn new(partials: Vec<&str>, finals: Vec<&str>) -> Self {
        Self {
            partials: partials.into_iter().map(str::to_string).collect(),
            finals: finals.into_iter().map(str::to_string).collect(),
        }
    }
}

struct ScriptedSttSink {
    partials: VecDeque<String>,
    finals: VecDeque<String>,
    tx: mpsc::Sender<SttEvent>,
}

#[async_trait]
impl SttSink for ScriptedSttSink {
    async fn send_audio(&mut self, _pcm: Vec<u8>) -> SessionResult<()> {
        if let Some(text) = self.partials.pop_front() {
            let _ = self.tx.send(SttEvent::Partial { text }).await;
        }
        Ok(())
    }

    async fn close(&mut self) -> SessionResult<()> {
        while let Some(text) = self.finals.pop_front() {
            let _ = self.tx.send(SttEvent::Final { text }).await;
        }
        let _ = self.tx.send(SttEvent::Closed).await;
        Ok(())
    }
}

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn open_stream(&self, _config: &AudioStreamConfig) -> SessionResult<SttStream> {
        let (tx, events) = mpsc::channel(32);
        Ok(SttStream {
            sink: Box::new(ScriptedSttSink {
                partials: self.partials.iter().cloned().collect(),
                finals: self.finals.iter().cloned().collect(),
                tx,
            }),
            events,
        })
    }
}

// -----------------------------------------------------------------------------
// OpenAI-compatible transcription backend
// -----------------------------------------------------------------------------

/// Wrap raw s16le PCM in a WAV container for API upload.
pub fn pcm_s16le_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Vec<u8> {
    let data_len = pcm.len() as u32;
    let byte_rate = sample_rate * u32::from(channels) * 2;
    let block_align = channels * 2;

    let mut buf = Vec::with_capacity(44 + pcm.len());
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    buf.extend_from_slice(pcm);
    buf
}

/// Production STT against an OpenAI-compatible transcription API.
/// Uses `STT_API_URL` (e.g. https://api.openai.com/v1), `STT_API_KEY`, and
/// `STT_MODEL` (default whisper-1). Audio is buffered per utterance and
/// posted when the client closes the stream; the transcript arrives as a
/// single final event.
#[derive(Debug, Clone)]
pub struct HttpStt {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    client: reqwest::Client,
}

impl HttpStt {
    pub fn from_env() -> SessionResult<Self> {
        let base_url = std::env::var("STT_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("STT_API_KEY")
            .or_else(|_| std::env::var("SOLACE_VENDOR_API_KEY"))
            .map_err(|_| {
                SessionError::VendorFatal(
                    "STT requires STT_API_KEY or SOLACE_VENDOR_API_KEY".to_string(),
                )
            })?;
        let model = std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| SessionError::Stt(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }
}

struct HttpSttSink {
    stt: HttpStt,
    config: AudioStreamConfig,
    buffer: Vec<u8>,
    tx: mpsc::Sender<SttEvent>,
    closed: bool,
}

#[async_trait]
impl SttSink for HttpSttSink {
    async fn send_audio(&mut self, pcm: Vec<u8>) -> SessionResult<()> {
        if !self.closed {
            self.buffer.extend_from_slice(&pcm);
        }
        Ok(())
    }

    async fn close(&mut self) -> SessionResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let pcm = std::mem::take(&mut self.buffer);
        let tx = self.tx.clone();
        let stt = self.stt.clone();
        let config = self.config.clone();
        // The request runs detached so closing never blocks the session
        // actor on vendor latency.
        tokio::spawn(async move {
            match transcribe(&stt, &config, pcm).await {
                Ok(text) => {
                    let _ = tx.send(SttEvent::Final { text }).await;
                    let _ = tx.send(SttEvent::Closed).await;
                }
                Err(e) => {
                    let _ = tx
                        .send(SttEvent::Error {
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        });
        Ok(())
    }
}

async fn transcribe(
    stt: &HttpStt,
    config: &AudioStreamConfig,
    pcm: Vec<u8>,
) -> SessionResult<String> {
    if pcm.is_empty() {
        return Ok(String::new());
    }
    let wav = pcm_s16le_to_wav(&pcm, config.sample_rate, u16::from(config.channels));
    let url = format!(
        "{}/audio/transcriptions",
        stt.base_url.trim_end_matches('/')
    );
    let part = reqwest::multipart::Part::bytes(wav)
        .file_name("audio.wav")
        .mime_str("audio/wav")
        .map_err(|e| SessionError::Stt(e.to_string()))?;
    let form = reqwest::multipart::Form::new()
        .part("file", part)
        .text("model", stt.model.clone());
    let res = stt
        .client
        .post(&url)
        .bearer_auth(&stt.api_key)
        .multipart(form)
        .send()
        .await
        .map_err(|e| SessionError::Stt(e.to_string()))?;
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(SessionError::VendorFatal(format!("STT {status}: {body}")));
        }
        return Err(SessionError::Stt(format!("STT API error {status}: {body}")));
    }
    let json: serde_json::Value = res
        .json()
        .await
        .map_err(|e| SessionError::Stt(e.to_string()))?;
    Ok(json
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string())
}

#[async_trait]
impl SpeechToText for HttpStt {
    async fn open_stream(&self, config: &AudioStreamConfig) -> SessionResult<SttStream> {
        let (tx, events) = mpsc::channel(32);
        Ok(SttStream {
            sink: Box::new(HttpSttSink {
                stt: self.clone(),
                config: config.clone(),
                buffer: Vec::new(),
                tx,
                closed: false,
            }),
            events,
        })
    }
}
