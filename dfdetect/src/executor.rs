//! Bounded execution of forward passes.
//!
//! A counting semaphore caps how many forward passes run at once; the
//! pass itself is an opaque blocking call pushed onto the blocking pool
//! with a timeout watchdog racing it. Slots are released by permit drop
//! on every path, including timeout, panic, and caller disconnect.

use std::{sync::Arc, time::Duration};

use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

use crate::{
    artifact::ForwardModel, config::DetectorConfig, detector::RequestPhase, error::DetectError,
    preprocess::NormalizedTensor,
};

pub struct InferenceExecutor {
    model: Arc<dyn ForwardModel>,
    slots: Arc<Semaphore>,
    capacity: usize,
    inference_timeout: Duration,
    admission_timeout: Duration,
}

impl InferenceExecutor {
    pub fn new(model: Arc<dyn ForwardModel>, config: &DetectorConfig) -> Self {
        InferenceExecutor {
            model,
            slots: Arc::new(Semaphore::new(config.max_concurrent)),
            capacity: config.max_concurrent,
            inference_timeout: config.inference_timeout,
            admission_timeout: config.admission_timeout,
        }
    }

    /// Runs the forward pass on `input`, returning raw scores.
    ///
    /// Waits at most the admission timeout for a slot (`Overloaded`
    /// otherwise) and at most the inference timeout for the pass itself
    /// (`InferenceTimeout`). A timed-out pass keeps running detached on
    /// the blocking pool and its result is discarded; the slot is
    /// released immediately either way. Faults surface as
    /// `InferenceError` and are never retried here.
    pub async fn infer(
        &self,
        request_id: Uuid,
        input: NormalizedTensor,
    ) -> Result<Vec<f32>, DetectError> {
        let permit = match tokio::time::timeout(
            self.admission_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(DetectError::InferenceError("slot pool closed".to_string()));
            }
            Err(_) => return Err(DetectError::Overloaded(self.admission_timeout)),
        };
        debug!(%request_id, phase = %RequestPhase::Executing, "request state transition");

        let model = Arc::clone(&self.model);
        let forward = tokio::task::spawn_blocking(move || model.forward(input));
        let outcome = tokio::time::timeout(self.inference_timeout, forward).await;
        drop(permit);

        match outcome {
            Err(_) => Err(DetectError::InferenceTimeout(self.inference_timeout)),
            Ok(Err(join)) => Err(DetectError::InferenceError(format!(
                "forward pass task failed: {join}"
            ))),
            Ok(Ok(scores)) => scores,
        }
    }

    /// Slots currently free. Equals the capacity when idle.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
