//! Wire frames for the bidirectional client transport.
//!
//! Each frame is one tagged JSON object. Audio payloads travel base64 in
//! both directions; the `result` frame carries transcript and reply text
//! only, audio is delivered exclusively through `audio_chunk` frames.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Frames the client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    AudioStreamStart {
        sample_rate: u32,
        channels: u8,
        format: String,
    },
    AudioChunk {
        audio_data: String,
    },
    AudioStreamEnd,
    InterruptSpeech,
    Ping,
}

/// Session status markers, emitted in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    ScaffoldWarming,
    ScaffoldReady,
    Recording,
    RecordingComplete,
    TranscriptionComplete,
    LlmTtsStreaming,
    StreamingComplete,
}

/// Frames the server emits, totally ordered per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Status {
        status: SessionStatus,
    },
    /// Cumulative partial transcript of the current utterance.
    TranscriptToken {
        content: String,
    },
    /// Incremental reply token(s), in LLM order.
    TokenStream {
        content: String,
    },
    /// Incremental MP3-compatible audio, base64.
    AudioChunk {
        audio_data: String,
    },
    /// Terminal turn summary. No audio payload.
    Result {
        transcript: String,
        ai_response: String,
    },
    Error {
        message: String,
    },
    /// Acknowledgement of barge-in.
    SpeechInterrupted,
}

impl OutboundFrame {
    pub fn audio(bytes: &[u8]) -> Self {
        Self::AudioChunk {
            audio_data: BASE64.encode(bytes),
        }
    }

    pub fn status(status: SessionStatus) -> Self {
        Self::Status { status }
    }
}

/// Decode a client audio payload. Invalid base64 is a protocol error.
pub fn decode_audio(audio_data: &str) -> Result<Vec<u8>, crate::error::SessionError> {
    BASE64
        .decode(audio_data)
        .map_err(|e| crate::error::SessionError::ClientProtocol(format!("bad audio base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_tags_round_trip() {
        let frame = InboundFrame::AudioStreamStart {
            sample_rate: 16_000,
            channels: 1,
            format: "raw_pcm_s16le".to_string(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"audio_stream_start\""));
        assert_eq!(serde_json::from_str::<InboundFrame>(&json).unwrap(), frame);

        let end: InboundFrame = serde_json::from_str(r#"{"type":"audio_stream_end"}"#).unwrap();
        assert_eq!(end, InboundFrame::AudioStreamEnd);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json =
            serde_json::to_string(&OutboundFrame::status(SessionStatus::LlmTtsStreaming)).unwrap();
        assert_eq!(json, r#"{"type":"status","status":"llm_tts_streaming"}"#);
    }

    #[test]
    fn audio_round_trips_base64() {
        let frame = OutboundFrame::audio(&[1, 2, 3, 255]);
        let OutboundFrame::AudioChunk { audio_data } = &frame else {
            panic!("wrong variant");
        };
        assert_eq!(decode_audio(audio_data).unwrap(), vec![1, 2, 3, 255]);
    }

    #[test]
    fn bad_base64_is_protocol_error() {
        assert!(decode_audio("not base64!!!").is_err());
    }

    #[test]
    fn result_has_no_audio_field() {
        let json = serde_json::to_string(&OutboundFrame::Result {
            transcript: "hi there".to_string(),
            ai_response: "hello".to_string(),
        })
        .unwrap();
        assert!(!json.contains("audio"));
    }
}
