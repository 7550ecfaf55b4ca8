//! Error taxonomy shared by every pipeline stage.
//!
//! Each variant maps to a stable machine-readable kind so callers can
//! implement their own retry policy without parsing messages.

use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DetectError {
    /// The model file does not exist at the configured path.
    #[error("model artifact not found: {0}")]
    ArtifactNotFound(String),

    /// The model file exists but could not be deserialized.
    #[error("model artifact corrupt: {0}")]
    ArtifactCorrupt(String),

    /// The graph's declared shapes do not match the expected contract.
    #[error("model shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The payload could not be decoded as a supported image codec.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The payload exceeds the configured byte limit.
    #[error("payload exceeds limit of {limit_bytes} bytes")]
    PayloadTooLarge { limit_bytes: usize },

    /// The model artifact has not finished loading yet.
    #[error("service not ready: model artifact still loading")]
    ServiceNotReady,

    /// No inference slot became available within the admission timeout.
    #[error("inference pool exhausted, gave up after {0:?}")]
    Overloaded(Duration),

    /// The forward pass exceeded its wall-clock budget.
    #[error("inference exceeded budget of {0:?}")]
    InferenceTimeout(Duration),

    /// The forward pass failed with an internal fault. Never retried here.
    #[error("inference failed: {0}")]
    InferenceError(String),
}

impl DetectError {
    /// Stable kind identifier, part of the wire contract.
    pub fn kind(&self) -> &'static str {
        match self {
            DetectError::ArtifactNotFound(_) => "ArtifactNotFound",
            DetectError::ArtifactCorrupt(_) => "ArtifactCorrupt",
            DetectError::ShapeMismatch(_) => "ShapeMismatch",
            DetectError::UnsupportedFormat(_) => "UnsupportedFormat",
            DetectError::PayloadTooLarge { .. } => "PayloadTooLarge",
            DetectError::ServiceNotReady => "ServiceNotReady",
            DetectError::Overloaded(_) => "Overloaded",
            DetectError::InferenceTimeout(_) => "InferenceTimeout",
            DetectError::InferenceError(_) => "InferenceError",
        }
    }

    /// Errors that must abort process startup instead of serving traffic.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            DetectError::ArtifactNotFound(_)
                | DetectError::ArtifactCorrupt(_)
                | DetectError::ShapeMismatch(_)
        )
    }

    /// Errors a client may safely retry after backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DetectError::ServiceNotReady | DetectError::Overloaded(_)
        )
    }
}
