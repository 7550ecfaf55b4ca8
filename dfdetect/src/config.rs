//! Runtime configuration for the detection pipeline.

use std::{path::PathBuf, time::Duration};

/// Everything the pipeline needs to know, resolved once at startup.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Path to the serialized ONNX graph.
    pub model_path: PathBuf,

    /// Optional JSON file holding the ordered label list. The authentic
    /// class must come first. Falls back to `["real", "fake"]`.
    pub labels_path: Option<PathBuf>,

    /// Square resolution the model expects, in pixels.
    pub input_size: u32,

    /// Probability of a non-authentic class above which the input is
    /// flagged.
    pub threshold: f32,

    /// Size of the inference slot pool.
    pub max_concurrent: usize,

    /// Wall-clock budget for a single forward pass.
    pub inference_timeout: Duration,

    /// How long a request may wait for a slot before being shed.
    pub admission_timeout: Duration,

    /// Hard cap on accepted image payloads, checked before any decode.
    pub max_payload_bytes: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            model_path: PathBuf::from("model/resnet18.onnx"),
            labels_path: None,
            input_size: 224,
            threshold: 0.5,
            max_concurrent: 4,
            inference_timeout: Duration::from_secs(10),
            admission_timeout: Duration::from_secs(2),
            max_payload_bytes: 10 * 1024 * 1024,
        }
    }
}
