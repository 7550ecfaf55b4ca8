//! The request gateway: routing, readiness, upload extraction, and the
//! error-kind → HTTP-status mapping.

use std::sync::{Arc, OnceLock};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use dfdetect::{DetectError, DetectRequest, Detector, DetectorConfig};
use serde_json::json;
use tracing::{info, warn};

use crate::api::{ErrorBody, HealthResponse};

/// Headroom over the configured payload cap so the library's own limit
/// check is the one that fires, with its stable error kind.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Shared gateway state. The detector slot starts empty and is installed
/// exactly once, after the model artifact has loaded; until then every
/// inference request fails fast with `ServiceNotReady`.
pub struct GatewayState {
    config: DetectorConfig,
    detector: OnceLock<Arc<Detector>>,
}

impl GatewayState {
    pub fn new(config: DetectorConfig) -> Self {
        GatewayState {
            config,
            detector: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Flips the gateway to ready. Later calls are ignored.
    pub fn install(&self, detector: Arc<Detector>) {
        if self.detector.set(detector).is_err() {
            warn!("detector already installed, ignoring reload");
        } else {
            info!("detector installed, gateway is ready");
        }
    }

    pub fn detector(&self) -> Option<Arc<Detector>> {
        self.detector.get().cloned()
    }

    pub fn ready(&self) -> bool {
        self.detector.get().is_some()
    }
}

pub fn router(state: Arc<GatewayState>) -> Router {
    let body_limit = state.config.max_payload_bytes + BODY_LIMIT_SLACK;
    Router::new()
        .route("/", get(info_handler))
        .route("/health", get(health))
        .route(
            "/predict",
            post(predict).layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

async fn info_handler() -> Json<serde_json::Value> {
    Json(json!({
        "service": "dfdetect",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/predict": "POST - classify an image as real or fake",
            "/health": "GET - readiness probe",
        },
    }))
}

async fn health(State(state): State<Arc<GatewayState>>) -> Response {
    let ready = state.ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if ready { "ok" } else { "loading" }.to_string(),
        model_loaded: ready,
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (status, Json(body)).into_response()
}

async fn predict(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let Some(detector) = state.detector() else {
        return error_response(&DetectError::ServiceNotReady);
    };

    let bytes = match extract_image(request, state.config.max_payload_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => return error_response(&err),
    };

    match detector.detect(DetectRequest::new(bytes)).await {
        Ok(verdict) => (StatusCode::OK, Json(verdict)).into_response(),
        Err(err) => {
            warn!(kind = err.kind(), "prediction failed: {err}");
            error_response(&err)
        }
    }
}

/// Pulls the image out of either a multipart upload (`file` or `image`
/// field, or any field carrying a filename) or a raw binary body.
async fn extract_image(request: Request, max_payload_bytes: usize) -> Result<Vec<u8>, DetectError> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| DetectError::UnsupportedFormat(format!("invalid multipart body: {e}")))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| multipart_error(e, max_payload_bytes))?
        {
            let name = field.name().unwrap_or_default();
            if name == "file" || name == "image" || field.file_name().is_some() {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, max_payload_bytes))?;
                return Ok(bytes.to_vec());
            }
        }
        Err(DetectError::UnsupportedFormat(
            "multipart body contains no image field".to_string(),
        ))
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), max_payload_bytes.saturating_add(1))
            .await
            .map_err(|_| DetectError::PayloadTooLarge {
                limit_bytes: max_payload_bytes,
            })?;
        Ok(bytes.to_vec())
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError, limit: usize) -> DetectError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DetectError::PayloadTooLarge { limit_bytes: limit }
    } else {
        DetectError::UnsupportedFormat(format!("reading multipart field: {err}"))
    }
}

fn status_for(err: &DetectError) -> StatusCode {
    match err {
        DetectError::UnsupportedFormat(_) | DetectError::PayloadTooLarge { .. } => {
            StatusCode::BAD_REQUEST
        }
        DetectError::ServiceNotReady | DetectError::Overloaded(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        DetectError::InferenceTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        DetectError::InferenceError(_)
        | DetectError::ArtifactNotFound(_)
        | DetectError::ArtifactCorrupt(_)
        | DetectError::ShapeMismatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: &DetectError) -> Response {
    let body = ErrorBody {
        error: err.kind().to_string(),
        message: err.to_string(),
    };
    (status_for(err), Json(body)).into_response()
}
