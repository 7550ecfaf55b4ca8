//! Model artifact loading.
//!
//! The artifact is loaded exactly once per process lifetime, validated
//! against the expected input/output contract, and shared read-only
//! behind an `Arc` afterwards. Nothing mutates it after load.

use std::{fs::File, io::Cursor, path::Path};

use memmap2::Mmap;
use tract_onnx::prelude::*;

use crate::{config::DetectorConfig, error::DetectError, preprocess::NormalizedTensor};

/// Labels used when no label file is configured. Authentic class first.
pub const DEFAULT_LABELS: [&str; 2] = ["real", "fake"];

/// The forward-pass seam between the executor and the model runtime.
///
/// The production implementation is [`ModelArtifact`]; tests substitute
/// a stub so pool and timeout behavior can be exercised without an ONNX
/// file on disk.
pub trait ForwardModel: Send + Sync + 'static {
    /// Runs the forward pass and returns one raw score per label.
    fn forward(&self, input: NormalizedTensor) -> Result<Vec<f32>, DetectError>;

    /// Ordered class labels, index-aligned with the output scores.
    fn labels(&self) -> &[String];
}

/// An immutable, loaded ONNX graph plus its label mapping.
#[derive(Debug)]
pub struct ModelArtifact {
    plan: TypedRunnableModel<TypedModel>,
    labels: Vec<String>,
    input_size: u32,
}

impl ModelArtifact {
    /// Loads and validates the artifact described by `config`.
    ///
    /// Fails with `ArtifactNotFound` when the file is missing,
    /// `ArtifactCorrupt` when deserialization fails, and `ShapeMismatch`
    /// when the graph cannot satisfy the `1×3×S×S` input /
    /// one-score-per-label output contract. All three abort startup.
    pub fn load(config: &DetectorConfig) -> Result<Self, DetectError> {
        let labels = match &config.labels_path {
            Some(path) => read_labels(path)?,
            None => DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
        };
        if labels.len() < 2 {
            return Err(DetectError::ShapeMismatch(format!(
                "classification needs at least two labels, got {}",
                labels.len()
            )));
        }

        let file = File::open(&config.model_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DetectError::ArtifactNotFound(config.model_path.display().to_string())
            } else {
                DetectError::ArtifactCorrupt(format!(
                    "opening {}: {e}",
                    config.model_path.display()
                ))
            }
        })?;
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| DetectError::ArtifactCorrupt(format!("mmap-ing model file: {e}")))?;

        let side = config.input_size as usize;
        let inference_model = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(&mmap[..]))
            .map_err(|e| DetectError::ArtifactCorrupt(format!("decoding ONNX graph: {e}")))?;

        let typed = inference_model
            .with_input_fact(0, f32::fact([1, 3, side, side]).into())
            .and_then(|m| m.into_optimized())
            .map_err(|e| {
                DetectError::ShapeMismatch(format!(
                    "graph incompatible with 1x3x{side}x{side} f32 input: {e}"
                ))
            })?;

        let output_fact = typed
            .output_fact(0)
            .map_err(|e| DetectError::ArtifactCorrupt(format!("reading output fact: {e}")))?;
        if let Some(shape) = output_fact.shape.as_concrete() {
            let scores: usize = shape.iter().product();
            if scores != labels.len() {
                return Err(DetectError::ShapeMismatch(format!(
                    "graph emits {scores} scores but {} labels are configured",
                    labels.len()
                )));
            }
        }

        let plan = typed
            .into_runnable()
            .map_err(|e| DetectError::ArtifactCorrupt(format!("planning graph: {e}")))?;

        tracing::info!(
            model = %config.model_path.display(),
            labels = ?labels,
            input_size = config.input_size,
            "model artifact loaded"
        );

        Ok(ModelArtifact {
            plan,
            labels,
            input_size: config.input_size,
        })
    }

    pub fn is_ready(&self) -> bool {
        // Construction only succeeds on a fully validated graph.
        true
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }
}

impl ForwardModel for ModelArtifact {
    fn forward(&self, input: NormalizedTensor) -> Result<Vec<f32>, DetectError> {
        let outputs = self
            .plan
            .run(tvec!(input.into_inner().into()))
            .map_err(|e| DetectError::InferenceError(format!("forward pass: {e}")))?;
        let scores = outputs[0]
            .to_array_view::<f32>()
            .map_err(|e| DetectError::InferenceError(format!("reading output tensor: {e}")))?;
        Ok(scores.iter().copied().collect())
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

fn read_labels(path: &Path) -> Result<Vec<String>, DetectError> {
    let bytes = std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DetectError::ArtifactNotFound(path.display().to_string())
        } else {
            DetectError::ArtifactCorrupt(format!("reading label file: {e}"))
        }
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DetectError::ArtifactCorrupt(format!("label file is not a JSON array: {e}")))
}
