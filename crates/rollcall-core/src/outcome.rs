//! Outcomes the engine hands back to its callers.
//!
//! Every accepted code path maps onto exactly one of these; rejections are
//! the error side ([`crate::engine::MarkError`]) and serialize at the
//! boundary with their class and message. Confidence is always surfaced;
//! embeddings never are.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::model::AttendanceStatus;

/// Result of a 1:1 `mark_live` request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkOutcome {
    /// A record was created by this call.
    Marked {
        status: AttendanceStatus,
        confidence: f32,
        timestamp: DateTime<Utc>,
    },
    /// A record already existed; its status and timestamp are untouched.
    /// Idempotent success, not an error.
    AlreadyMarked {
        status: AttendanceStatus,
        timestamp: DateTime<Utc>,
    },
    /// The face did not match the enrolled reference.
    NotRecognized { confidence: f32 },
}

/// One accepted identity in a 1:N batch pass.
#[derive(Debug, Clone, Serialize)]
pub struct BatchMatch {
    pub identity_id: Uuid,
    pub status: AttendanceStatus,
    pub confidence: f32,
    /// False when the identity was already marked before this call.
    pub newly_marked: bool,
    pub timestamp: DateTime<Utc>,
}

/// Result of a 1:N `batch_recognize` request. Zero faces or zero matches is
/// a valid empty outcome, not an error.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub faces_detected: usize,
    pub matches: Vec<BatchMatch>,
}
