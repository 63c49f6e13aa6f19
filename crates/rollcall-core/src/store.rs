//! Storage traits the decision engine depends on.
//!
//! Implemented by `rollcall-store` (SQLite); the engine and its tests only
//! ever see these seams. All methods return `Send` futures so the traits
//! work on multi-threaded runtimes.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::embedding::Embedding;
use crate::model::{
    AttendanceRecord, AttendanceStatus, Enrollment, Event, EventStatus, NewAttendanceRecord,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A persisted row could not be decoded back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("record not found")]
    NotFound,

    /// Guarded status update found the event in a different state.
    #[error("invalid status transition: event is not {expected}")]
    InvalidTransition { expected: EventStatus },
}

/// Read/transition access to events.
pub trait EventStore: Send + Sync {
    fn get_event(
        &self,
        event_id: Uuid,
    ) -> impl Future<Output = Result<Option<Event>, StoreError>> + Send + '_;

    /// Atomically move an event from `from` to `to`, stamping `at` into
    /// `started_at` or `ended_at` as appropriate. Fails with
    /// [`StoreError::InvalidTransition`] when the event is not in `from` —
    /// transitions are monotonic and never retried blindly.
    fn transition_event(
        &self,
        event_id: Uuid,
        from: EventStatus,
        to: EventStatus,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Event, StoreError>> + Send + '_;
}

/// Access to reference enrollments.
pub trait EnrollmentStore: Send + Sync {
    /// The enrollment row for (scope, identity) in any state, or `None` if
    /// the identity never joined the scope.
    fn get_enrollment(
        &self,
        scope_id: Uuid,
        identity_id: Uuid,
    ) -> impl Future<Output = Result<Option<Enrollment>, StoreError>> + Send + '_;

    /// Active enrollments of a scope that carry an embedding — the 1:N
    /// candidate gallery. Ordered by identity id so candidate enumeration
    /// is deterministic.
    fn list_candidates(
        &self,
        scope_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Enrollment>, StoreError>> + Send + '_;

    /// Replace-or-create the (scope, identity) enrollment with a fresh
    /// embedding, reactivating it. Update-or-create in one statement;
    /// re-enrollment never appends a second row.
    fn upsert_enrollment(
        &self,
        scope_id: Uuid,
        identity_id: Uuid,
        embedding: Embedding,
    ) -> impl Future<Output = Result<Enrollment, StoreError>> + Send + '_;

    /// Clear embedding bytes and deactivate every enrollment of the
    /// identity, across scopes. Idempotent; returns how many rows changed
    /// (zero is success, not an error).
    fn erase_identity(
        &self,
        identity_id: Uuid,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send + '_;
}

/// Access to attendance records.
pub trait AttendanceStore: Send + Sync {
    /// Insert-if-absent keyed on (event, identity, day); returns the record
    /// and whether this call created it. Must be atomic at the storage
    /// layer (uniqueness constraint + insert-or-fetch), never
    /// check-then-insert: concurrent duplicate submissions yield exactly
    /// one row.
    fn get_or_create_record(
        &self,
        new: NewAttendanceRecord,
    ) -> impl Future<Output = Result<(AttendanceRecord, bool), StoreError>> + Send + '_;

    /// Host manual override: set the status, flag the record manual, stamp
    /// who did it. The only mutation a record ever sees after creation.
    fn override_record(
        &self,
        event_id: Uuid,
        record_id: Uuid,
        status: AttendanceStatus,
        recorded_by: Uuid,
    ) -> impl Future<Output = Result<AttendanceRecord, StoreError>> + Send + '_;

    fn list_records(
        &self,
        event_id: Uuid,
    ) -> impl Future<Output = Result<Vec<AttendanceRecord>, StoreError>> + Send + '_;
}
