//! **Language model** capability: a prompt in, an async token stream out.
//!
//! `HttpLlm` speaks the OpenAI-compatible streaming chat API (SSE with
//! `stream: true`); `ScriptedLlm` drives tests.

use crate::error::{SessionError, SessionResult};
use crate::prompt::AssembledPrompt;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

/// Events on the reply stream.
#[derive(Debug, Clone)]
pub enum LlmEvent {
    Token(String),
    Done,
    Error { message: String },
}

/// The LLM capability. One call per turn; tokens arrive in generation
/// order on a bounded channel, so a stalled consumer pauses the feed.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn stream_reply(
        &self,
        prompt: &AssembledPrompt,
        channel_capacity: usize,
    ) -> SessionResult<mpsc::Receiver<LlmEvent>>;
}

// -----------------------------------------------------------------------------
// Scripted backend for tests
// -----------------------------------------------------------------------------

/// Test double: replays a fixed token sequence, optionally failing after a
/// prefix or pacing tokens to simulate a slow vendor.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLlm {
    pub tokens: Vec<String>,
    pub fail_after: Option<usize>,
    pub token_delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new(tokens: Vec<&str>) -> Self {
        Self {
            tokens: tokens.into_iter().map(str::to_string).collect(),
            fail_after: None,
            token_delay: None,
        }
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    async fn stream_reply(
        &self,
        _prompt: &AssembledPrompt,
        channel_capacity: usize,
    ) -> SessionResult<mpsc::Receiver<LlmEvent>> {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let tokens = self.tokens.clone();
        let fail_after = self.fail_after;
        let delay = self.token_delay;
        tokio::spawn(async move {
            for (i, token) in tokens.into_iter().enumerate() {
                if let Some(n) = fail_after {
                    if i >= n {
                        let _ = tx
                            .send(LlmEvent::Error {
                                message: "scripted stream loss".to_string(),
                            })
                            .await;
                        return;
                    }
                }
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                if tx.send(LlmEvent::Token(token)).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(LlmEvent::Done).await;
        });
        Ok(rx)
    }
}

// -----------------------------------------------------------------------------
// OpenAI-compatible streaming chat backend
// -----------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Production LLM against an OpenAI-compatible chat API with SSE streaming.
/// Uses `LLM_API_URL` (default OpenRouter), `LLM_API_KEY`, `LLM_MODEL`.
#[derive(Debug, Clone)]
pub struct HttpLlm {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    client: reqwest::Client,
}

impl HttpLlm {
    pub fn from_env() -> SessionResult<Self> {
        let base_url = std::env::var("LLM_API_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
        let api_key = std::env::var("LLM_API_KEY")
            .or_else(|_| std::env::var("SOLACE_VENDOR_API_KEY"))
            .map_err(|_| {
                SessionError::VendorFatal(
                    "LLM requires LLM_API_KEY or SOLACE_VENDOR_API_KEY".to_string(),
                )
            })?;
        let model =
            std::env::var("LLM_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());
        Self::new(base_url, api_key, model)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SessionError::Llm(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 512,
            client,
        })
    }
}

#[async_trait]
impl LanguageModel for HttpLlm {
    async fn stream_reply(
        &self,
        prompt: &AssembledPrompt,
        channel_capacity: usize,
    ) -> SessionResult<mpsc::Receiver<LlmEvent>> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.user_text.clone(),
                },
            ],
            stream: true,
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SessionError::Llm(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            if status.as_u16() == 401 || status.as_u16() == 403 || status.as_u16() == 429 {
                return Err(SessionError::VendorFatal(format!("LLM {status}: {text}")));
            }
            return Err(SessionError::Llm(format!("LLM API error {status}: {text}")));
        }

        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        tokio::spawn(async move {
            let mut stream = res.bytes_stream();
            let mut pending = String::new();
            while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(LlmEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = pending.find('\n') {
                    let line = pending[..pos].trim().to_string();
                    pending.drain(..=pos);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        let _ = tx.send(LlmEvent::Done).await;
                        return;
                    }
                    if let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) {
                        if let Some(token) = parsed
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.clone())
                        {
                            if tx.send(LlmEvent::Token(token)).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            let _ = tx.send(LlmEvent::Done).await;
        });
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> AssembledPrompt {
        AssembledPrompt {
            system: "be brief".to_string(),
            user_text: "hi".to_string(),
        }
    }

    #[tokio::test]
    async fn scripted_replays_tokens_then_done() {
        let llm = ScriptedLlm::new(vec!["Hey", " there", "."]);
        let mut rx = llm.stream_reply(&prompt(), 8).await.unwrap();

        let mut out = String::new();
        loop {
            match rx.recv().await {
                Some(LlmEvent::Token(t)) => out.push_str(&t),
                Some(LlmEvent::Done) => break,
                Some(LlmEvent::Error { message }) => panic!("unexpected: {message}"),
                None => panic!("stream ended without Done"),
            }
        }
        assert_eq!(out, "Hey there.");
    }

    #[tokio::test]
    async fn scripted_failure_surfaces_as_error_event() {
        let llm = ScriptedLlm::new(vec!["a", "b", "c"]).failing_after(2);
        let mut rx = llm.stream_reply(&prompt(), 8).await.unwrap();

        let mut tokens = 0;
        loop {
            match rx.recv().await {
                Some(LlmEvent::Token(_)) => tokens += 1,
                Some(LlmEvent::Error { .. }) => break,
                Some(LlmEvent::Done) => panic!("should have failed"),
                None => panic!("stream ended without error"),
            }
        }
        assert_eq!(tokens, 2);
    }
}
