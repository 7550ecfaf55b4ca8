//! Image decoding and normalization into the tensor layout the model
//! expects.
//!
//! The transform is deterministic: identical input bytes always produce
//! an identical tensor. Validation happens strictly before decoding so a
//! hostile payload is rejected as cheaply as possible.

use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::{config::DetectorConfig, error::DetectError};

/// Per-channel statistics of the training distribution (ImageNet).
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Upper bound on decoded dimensions. Anything larger is a decompression
/// bomb, not a photograph.
const MAX_DIMENSION: u32 = 8192;

/// A `1×3×S×S` float32 tensor in NCHW layout, normalized and ready for
/// the forward pass. Owned by exactly one in-flight request.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    tensor: Tensor,
}

impl NormalizedTensor {
    pub fn shape(&self) -> &[usize] {
        self.tensor.shape()
    }

    pub fn into_inner(self) -> Tensor {
        self.tensor
    }
}

/// Decodes and normalizes raw image bytes.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    input_size: u32,
    max_payload_bytes: usize,
}

impl Preprocessor {
    pub fn new(config: &DetectorConfig) -> Self {
        Preprocessor {
            input_size: config.input_size,
            max_payload_bytes: config.max_payload_bytes,
        }
    }

    /// Validates and transforms `bytes` into the model input tensor.
    ///
    /// Resizes with bilinear interpolation, center-cropping when the
    /// aspect ratio differs, then scales to `[0, 1]` and applies
    /// per-channel mean/std normalization in RGB order.
    pub fn prepare(&self, bytes: &[u8]) -> Result<NormalizedTensor, DetectError> {
        if bytes.len() > self.max_payload_bytes {
            return Err(DetectError::PayloadTooLarge {
                limit_bytes: self.max_payload_bytes,
            });
        }

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| DetectError::UnsupportedFormat(e.to_string()))?;

        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(DetectError::UnsupportedFormat(format!(
                "decoded dimensions {width}x{height} outside accepted bounds"
            )));
        }

        let size = self.input_size;
        let rgb = if (width, height) == (size, size) {
            decoded.to_rgb8()
        } else {
            decoded
                .resize_to_fill(size, size, FilterType::Triangle)
                .to_rgb8()
        };

        let side = size as usize;
        let tensor: Tensor =
            tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
                let value = rgb[(x as u32, y as u32)][c] as f32 / 255.0;
                (value - CHANNEL_MEAN[c]) / CHANNEL_STD[c]
            })
            .into();

        Ok(NormalizedTensor { tensor })
    }
}
