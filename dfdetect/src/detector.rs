//! The pipeline façade and per-request state machine.
//!
//! Every request walks `RECEIVED → VALIDATED → QUEUED → EXECUTING →
//! COMPLETED | FAILED`; each transition is emitted as a tracing event so
//! the gateway's behavior stays observable from the outside.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    sync::Arc,
    time::Instant,
};

use tracing::debug;
use uuid::Uuid;

use crate::{
    artifact::ForwardModel,
    config::DetectorConfig,
    error::DetectError,
    executor::InferenceExecutor,
    preprocess::Preprocessor,
    verdict::{Verdict, build_verdict},
};

/// One incoming classification request. Created per call, discarded
/// after the response is sent.
#[derive(Debug)]
pub struct DetectRequest {
    pub bytes: Vec<u8>,
    pub request_id: Uuid,
    pub received_at: Instant,
}

impl DetectRequest {
    pub fn new(bytes: Vec<u8>) -> Self {
        DetectRequest {
            bytes,
            request_id: Uuid::new_v4(),
            received_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    Validated,
    Queued,
    Executing,
    Completed,
    Failed,
}

impl Display for RequestPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            RequestPhase::Received => "RECEIVED",
            RequestPhase::Validated => "VALIDATED",
            RequestPhase::Queued => "QUEUED",
            RequestPhase::Executing => "EXECUTING",
            RequestPhase::Completed => "COMPLETED",
            RequestPhase::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

fn transition(request_id: Uuid, phase: RequestPhase) {
    debug!(%request_id, phase = %phase, "request state transition");
}

/// Wires preprocessing, bounded execution, and verdict building.
pub struct Detector {
    preprocessor: Preprocessor,
    executor: InferenceExecutor,
    labels: Vec<String>,
    threshold: f32,
}

impl Detector {
    pub fn new(model: Arc<dyn ForwardModel>, config: &DetectorConfig) -> Self {
        let labels = model.labels().to_vec();
        Detector {
            preprocessor: Preprocessor::new(config),
            executor: InferenceExecutor::new(model, config),
            labels,
            threshold: config.threshold,
        }
    }

    /// Runs the full pipeline for one request.
    pub async fn detect(&self, request: DetectRequest) -> Result<Verdict, DetectError> {
        let id = request.request_id;
        transition(id, RequestPhase::Received);

        let tensor = match self.preprocessor.prepare(&request.bytes) {
            Ok(tensor) => {
                transition(id, RequestPhase::Validated);
                tensor
            }
            Err(err) => return Err(self.fail(id, err)),
        };

        transition(id, RequestPhase::Queued);
        let scores = match self.executor.infer(id, tensor).await {
            Ok(scores) => scores,
            Err(err) => return Err(self.fail(id, err)),
        };

        let verdict = match build_verdict(
            &scores,
            &self.labels,
            self.threshold,
            request.received_at.elapsed(),
        ) {
            Ok(verdict) => verdict,
            Err(err) => return Err(self.fail(id, err)),
        };

        transition(id, RequestPhase::Completed);
        debug!(
            %id,
            label = %verdict.label,
            confidence = verdict.confidence,
            flagged = verdict.flagged,
            elapsed_ms = verdict.processing_time_ms,
            "verdict built"
        );
        Ok(verdict)
    }

    fn fail(&self, id: Uuid, err: DetectError) -> DetectError {
        transition(id, RequestPhase::Failed);
        debug!(%id, kind = err.kind(), "request failed: {err}");
        err
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Free slots in the inference pool, for observability endpoints and
    /// leak checks.
    pub fn available_slots(&self) -> usize {
        self.executor.available_slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubModel, png_image};
    use std::time::Duration;

    fn detector(stub: StubModel, config: &DetectorConfig) -> Detector {
        Detector::new(Arc::new(stub), config)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn black_square_yields_deterministic_verdict() {
        let config = DetectorConfig::default();
        let detector = detector(StubModel::new(vec![1.5, 0.2]), &config);
        let bytes = png_image(224, 224, [0, 0, 0]);

        let first = detector.detect(DetectRequest::new(bytes.clone())).await.unwrap();
        let second = detector.detect(DetectRequest::new(bytes)).await.unwrap();

        assert_eq!(first.label, "real");
        assert!((0.0..=1.0).contains(&first.confidence));
        assert_eq!(first.label, second.label);
        assert_eq!(first.confidence.to_bits(), second.confidence.to_bits());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_payload_never_reaches_the_pool() {
        let config = DetectorConfig {
            max_payload_bytes: 64,
            max_concurrent: 1,
            ..DetectorConfig::default()
        };
        let detector = detector(
            StubModel::new(vec![1.0, 0.0]).with_latency(Duration::from_secs(5)),
            &config,
        );

        let err = detector
            .detect(DetectRequest::new(vec![0u8; 1024]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PayloadTooLarge");
        // The slot was never touched; a hang in the stub would have shown.
        assert_eq!(detector.available_slots(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn flagged_image_reported_with_fake_label() {
        let config = DetectorConfig::default();
        let detector = detector(StubModel::new(vec![0.5, 3.0]), &config);

        let verdict = detector
            .detect(DetectRequest::new(png_image(64, 64, [200, 0, 0])))
            .await
            .unwrap();
        assert_eq!(verdict.label, "fake");
        assert!(verdict.flagged);
    }
}
