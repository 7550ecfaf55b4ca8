//! Wire types shared by the server and the CLI.

use serde::{Deserialize, Serialize};

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` once the model artifact is loaded, `"loading"` before.
    pub status: String,
    pub model_loaded: bool,
    pub version: String,
}

/// Body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind, e.g. `"PayloadTooLarge"`.
    pub error: String,
    pub message: String,
}

// Successful `POST /predict` responses serialize `dfdetect::Verdict`
// directly: label, confidence, flagged, threshold, processing_time_ms.
