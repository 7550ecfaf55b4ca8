//! Score postprocessing and verdict construction.
//!
//! `build_verdict` is a pure function: the same scores, labels, and
//! threshold always produce the same verdict.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DetectError;

/// The structured classification result returned per request. Immutable
/// once built; never persisted by this component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Label with the highest probability.
    pub label: String,
    /// Probability of `label`, in `[0, 1]`.
    pub confidence: f32,
    /// Whether the combined non-authentic probability reached the
    /// decision threshold.
    pub flagged: bool,
    /// The threshold the decision was made against.
    pub threshold: f32,
    /// Wall-clock time from request receipt to verdict.
    pub processing_time_ms: u64,
}

/// Builds a [`Verdict`] from raw model scores.
///
/// Logits are passed through a numerically stable softmax; scores that
/// already form a probability distribution are used as-is. The first
/// label is the authentic class by convention, so the flag compares the
/// remaining probability mass against the threshold.
pub fn build_verdict(
    raw_scores: &[f32],
    labels: &[String],
    threshold: f32,
    elapsed: Duration,
) -> Result<Verdict, DetectError> {
    if raw_scores.len() != labels.len() || raw_scores.is_empty() {
        return Err(DetectError::InferenceError(format!(
            "model returned {} scores for {} labels",
            raw_scores.len(),
            labels.len()
        )));
    }
    if raw_scores.iter().any(|s| !s.is_finite()) {
        return Err(DetectError::InferenceError(
            "model returned non-finite scores".to_string(),
        ));
    }

    let probabilities = if is_probability_vector(raw_scores) {
        raw_scores.to_vec()
    } else {
        softmax(raw_scores)
    };

    let mut best = 0;
    for (i, p) in probabilities.iter().enumerate() {
        if *p > probabilities[best] {
            best = i;
        }
    }

    let flagged = 1.0 - probabilities[0] >= threshold;

    Ok(Verdict {
        label: labels[best].clone(),
        confidence: probabilities[best],
        flagged,
        threshold,
        processing_time_ms: elapsed.as_millis() as u64,
    })
}

fn is_probability_vector(scores: &[f32]) -> bool {
    let sum: f32 = scores.iter().sum();
    scores.iter().all(|s| (0.0..=1.0).contains(s)) && (sum - 1.0).abs() <= 1e-3
}

// Max is subtracted first so large logits cannot overflow the exponent.
fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
