//! rollcall-core — the attendance-marking decision engine.
//!
//! Matches live face embeddings against enrolled references, classifies the
//! moment against an event's temporal window, and creates attendance records
//! idempotently. Extraction, storage and time are all injected behind traits
//! so the engine is pure decision logic.

pub mod embedding;
pub mod engine;
pub mod extract;
pub mod model;
pub mod outcome;
pub mod store;
pub mod window;

pub use embedding::{Comparator, DimensionMismatch, Embedding, Match, Metric};
pub use engine::{DecisionEngine, ErrorClass, MarkError};
pub use extract::{EmbeddingExtractor, ExtractionError};
pub use model::{
    AttendanceRecord, AttendanceStatus, Enrollment, Event, EventStatus, NewAttendanceRecord,
};
pub use outcome::{BatchMatch, BatchOutcome, MarkOutcome};
pub use store::{AttendanceStore, EnrollmentStore, EventStore, StoreError};
pub use window::{classify_window, Clock, SystemClock, WindowState};
