//! The embedding-extraction contract consumed by the decision engine.
//!
//! The engine never touches pixels: it hands image bytes to an
//! [`EmbeddingExtractor`] and receives one embedding per detected face.
//! The production implementation lives in `rollcall-extract`; the daemon
//! wraps it in a worker thread that enforces a bounded timeout.

use std::future::Future;

use thiserror::Error;

use crate::embedding::Embedding;

/// Infrastructure failures of the extractor itself.
///
/// "No face" and "multiple faces" are *recognition* outcomes, not extractor
/// failures — the extractor reports every face it found (possibly none) and
/// the engine decides what that means for the operation at hand.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// The bytes did not decode as an image.
    #[error("could not decode image")]
    DecodeFailed,
    /// Extraction exceeded the configured deadline. Safe to retry.
    #[error("face extraction timed out")]
    Timeout,
    /// The extractor backend failed (model inference, worker gone).
    /// Safe to retry; never collapsed into a "no match".
    #[error("extractor backend failed: {0}")]
    Backend(String),
}

/// Produces one embedding per face detected in a single image.
pub trait EmbeddingExtractor: Send + Sync {
    fn extract<'a>(
        &'a self,
        image: &'a [u8],
    ) -> impl Future<Output = Result<Vec<Embedding>, ExtractionError>> + Send + 'a;
}
