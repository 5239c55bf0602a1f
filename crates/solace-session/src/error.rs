//! Error types for the session orchestration core.

use solace_core::FailureKind;
use thiserror::Error;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while orchestrating a session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("client protocol error: {0}")]
    ClientProtocol(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("vendor timed out: {0}")]
    VendorTimeout(String),

    #[error("vendor refused permanently: {0}")]
    VendorFatal(String),

    #[error("outbound sink cannot keep up")]
    SlowConsumer,

    #[error("turn interrupted")]
    Interrupted,

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl SessionError {
    /// Map onto the shared failure taxonomy for propagation decisions.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::ClientProtocol(_) => FailureKind::ClientProtocol,
            Self::Stt(_) | Self::Llm(_) | Self::Tts(_) | Self::ChannelClosed(_) => {
                FailureKind::VendorTransient
            }
            Self::VendorTimeout(_) => FailureKind::VendorTimeout,
            Self::VendorFatal(_) => FailureKind::VendorFatal,
            Self::SlowConsumer => FailureKind::SlowConsumer,
            Self::Interrupted => FailureKind::Interrupted,
        }
    }

    /// Whether this failure should surface to the client as an `error` frame.
    pub fn is_client_visible(&self) -> bool {
        !matches!(self, Self::Interrupted)
    }
}
