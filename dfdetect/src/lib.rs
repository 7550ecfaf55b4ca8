//! Inference serving core for deepfake image classification.
//!
//! The pipeline is assembled from explicit stages, leaves first: a
//! [`ModelArtifact`] loaded once at startup, a deterministic
//! [`Preprocessor`] turning raw image bytes into a normalized tensor, an
//! [`InferenceExecutor`] bounding concurrent forward passes with a slot
//! pool, and a pure verdict builder. [`Detector`] wires the stages
//! together and drives the per-request state machine the HTTP gateway
//! observes.

pub mod artifact;
pub mod config;
pub mod detector;
pub mod error;
pub mod executor;
pub mod preprocess;
pub mod testing;
pub mod verdict;

pub use artifact::{ForwardModel, ModelArtifact};
pub use config::DetectorConfig;
pub use detector::{DetectRequest, Detector, RequestPhase};
pub use error::DetectError;
pub use executor::InferenceExecutor;
pub use preprocess::{NormalizedTensor, Preprocessor};
pub use verdict::{Verdict, build_verdict};
