//! Face embedding vectors and the threshold comparator.
//!
//! One metric is fixed per deployment: ArcFace-style backends produce
//! L2-normalised vectors compared by cosine similarity, dlib-style backends
//! compare by Euclidean distance. Confidence is normalised to [0, 1] and is
//! monotonic in match quality under both metrics; the raw score is surfaced
//! alongside it for threshold tuning.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Fixed-length face embedding (128 or 512 dimensions depending on backend).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    /// True for vectors that cannot be meaningfully compared: empty,
    /// containing non-finite components, or with zero norm.
    pub fn is_degenerate(&self) -> bool {
        if self.values.is_empty() {
            return true;
        }
        let mut norm_sq = 0.0f32;
        for v in &self.values {
            if !v.is_finite() {
                return true;
            }
            norm_sq += v * v;
        }
        norm_sq == 0.0
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Always processes all dimensions; a zero denominator yields 0.0.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Euclidean distance. Lower = more similar.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Which similarity metric a deployment compares embeddings with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Match when `similarity > threshold` (typical threshold 0.40–0.42).
    Cosine,
    /// Match when `distance <= threshold` (typical threshold 0.6).
    Euclidean,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown metric {0:?} (expected \"cosine\" or \"euclidean\")")]
pub struct ParseMetricError(String);

impl FromStr for Metric {
    type Err = ParseMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" => Ok(Metric::Euclidean),
            other => Err(ParseMetricError(other.to_string())),
        }
    }
}

/// Probe and reference vectors have different lengths. Fatal input error:
/// no comparison is attempted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("embedding dimension mismatch: probe {probe}, reference {reference}")]
pub struct DimensionMismatch {
    pub probe: usize,
    pub reference: usize,
}

/// Outcome of one probe-vs-reference comparison.
#[derive(Debug, Clone, Copy)]
pub struct Match {
    pub is_match: bool,
    /// Normalised confidence in [0, 1]; 0.0 for degenerate inputs.
    pub confidence: f32,
    /// Raw metric value (similarity or distance) for threshold tuning.
    pub score: f32,
}

impl Match {
    fn rejected() -> Self {
        Match {
            is_match: false,
            confidence: 0.0,
            score: 0.0,
        }
    }
}

/// Threshold comparator with a deployment-fixed metric.
#[derive(Debug, Clone, Copy)]
pub struct Comparator {
    metric: Metric,
    threshold: f32,
}

impl Comparator {
    pub fn new(metric: Metric, threshold: f32) -> Self {
        Self { metric, threshold }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Compare a probe against a stored reference.
    ///
    /// Degenerate inputs (all-zero, NaN) never error and never match: they
    /// produce `is_match = false` with confidence 0.
    pub fn compare(
        &self,
        probe: &Embedding,
        reference: &Embedding,
    ) -> Result<Match, DimensionMismatch> {
        if probe.dim() != reference.dim() {
            return Err(DimensionMismatch {
                probe: probe.dim(),
                reference: reference.dim(),
            });
        }
        if probe.is_degenerate() || reference.is_degenerate() {
            return Ok(Match::rejected());
        }

        let m = match self.metric {
            Metric::Cosine => {
                let similarity = probe.cosine_similarity(reference);
                if !similarity.is_finite() {
                    return Ok(Match::rejected());
                }
                Match {
                    is_match: similarity > self.threshold,
                    confidence: similarity.clamp(0.0, 1.0),
                    score: similarity,
                }
            }
            Metric::Euclidean => {
                let distance = probe.euclidean_distance(reference);
                if !distance.is_finite() || self.threshold <= 0.0 {
                    return Ok(Match::rejected());
                }
                Match {
                    is_match: distance <= self.threshold,
                    confidence: (1.0 - distance / self.threshold).clamp(0.0, 1.0),
                    score: distance,
                }
            }
        };

        Ok(m)
    }
}
