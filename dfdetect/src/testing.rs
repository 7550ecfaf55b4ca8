//! Helpers for exercising the pipeline without an ONNX file on disk.
//!
//! Used by this crate's unit tests and by the service crate's
//! integration suite.

use std::{
    io::Cursor,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use crate::{artifact::ForwardModel, error::DetectError, preprocess::NormalizedTensor};

/// A [`ForwardModel`] with canned scores, optional simulated latency,
/// and in-flight accounting for concurrency assertions.
pub struct StubModel {
    scores: Vec<f32>,
    labels: Vec<String>,
    latency: Duration,
    fail: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl StubModel {
    pub fn new(scores: Vec<f32>) -> Self {
        StubModel {
            scores,
            labels: vec!["real".to_string(), "fake".to_string()],
            latency: Duration::ZERO,
            fail: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// A stub whose forward pass always faults.
    pub fn failing() -> Self {
        StubModel {
            fail: true,
            ..StubModel::new(vec![])
        }
    }

    /// Makes every forward pass sleep for `latency` first.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Highest number of concurrently running forward passes observed.
    pub fn max_observed_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ForwardModel for StubModel {
    fn forward(&self, _input: NormalizedTensor) -> Result<Vec<f32>, DetectError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(DetectError::InferenceError(
                "stub forward pass fault".to_string(),
            ));
        }
        Ok(self.scores.clone())
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// A solid-color PNG encoded in memory.
pub fn png_image(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    encode(width, height, rgb, image::ImageFormat::Png)
}

/// A solid-color JPEG encoded in memory.
pub fn jpeg_image(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    encode(width, height, rgb, image::ImageFormat::Jpeg)
}

fn encode(width: u32, height: u32, rgb: [u8; 3], format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .expect("encoding in-memory test image");
    buf.into_inner()
}
