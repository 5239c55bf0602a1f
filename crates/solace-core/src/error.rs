//! Error types for the Solace core subsystems.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the process-wide subsystems.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("memory store error: {0}")]
    Store(String),

    #[error("memory queue closed")]
    QueueClosed,

    #[error("scaffold access timed out after {0} ms")]
    ScaffoldTimeout(u64),
}

/// How a failure should be treated at the session boundary.
///
/// Transient vendor failures are retried at the adapter; fatal ones tear the
/// session down and keep the user's background analyzer stopped until the
/// next attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Malformed frame or out-of-sequence control from the client.
    ClientProtocol,
    /// Timeout, disconnect, 5xx. Retryable at the adapter.
    VendorTransient,
    /// Auth, quota, permanent vendor refusal.
    VendorFatal,
    /// A vendor await exceeded its configured deadline.
    VendorTimeout,
    /// The outbound sink could not keep up.
    SlowConsumer,
    /// User-initiated barge-in. Not a fault; acknowledged, never surfaced
    /// as an error frame.
    Interrupted,
}

impl FailureKind {
    /// Short wire label used in `error` frames and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::ClientProtocol => "client_protocol",
            Self::VendorTransient => "vendor_transient",
            Self::VendorFatal => "vendor_fatal",
            Self::VendorTimeout => "vendor_timeout",
            Self::SlowConsumer => "slow_consumer",
            Self::Interrupted => "interrupted",
        }
    }
}
