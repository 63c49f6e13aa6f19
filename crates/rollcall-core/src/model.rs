//! Domain records: events, enrollments, attendance.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Host-driven event lifecycle. Transitions are monotonic:
/// Scheduled → Ongoing → Completed. Only Ongoing accepts attendance marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Scheduled,
    Ongoing,
    Completed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Scheduled => "scheduled",
            EventStatus::Ongoing => "ongoing",
            EventStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(EventStatus::Scheduled),
            "ongoing" => Some(EventStatus::Ongoing),
            "completed" => Some(EventStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scheduled session that attendance is marked against.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: Uuid,
    /// Subject / event-group the event belongs to. Enrollments are scoped
    /// to this, not to the individual event.
    pub scope_id: Uuid,
    pub host_id: Uuid,
    pub title: String,
    /// Scheduled start; the window evaluator works from this, not from the
    /// moment the host pressed "start".
    pub start_at: DateTime<Utc>,
    pub duration: Duration,
    pub grace: Duration,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// One identity's reference embedding within a scope.
///
/// At most one row per (scope, identity); re-enrollment replaces the
/// embedding in place. Privacy erasure clears the embedding bytes and
/// deactivates the row but keeps it, so attendance history stays intact.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub enrollment_id: Uuid,
    pub scope_id: Uuid,
    pub identity_id: Uuid,
    pub embedding: Option<crate::embedding::Embedding>,
    pub active: bool,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(AttendanceStatus::Present),
            "late" => Some(AttendanceStatus::Late),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted outcome of one accepted match for one (event, identity, day).
///
/// Carries no biometric data: erasing an enrollment never touches history.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub record_id: Uuid,
    pub event_id: Uuid,
    pub identity_id: Uuid,
    /// Calendar day of the mark; scopes the uniqueness constraint for
    /// recurring events that reuse one event row.
    pub day: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_at: DateTime<Utc>,
    pub confidence: f32,
    /// Set by a host manual override, never by the engine.
    pub manual: bool,
    pub recorded_by: Option<Uuid>,
}

/// Defaults for an idempotent record insert. Applied only when no record
/// exists yet for the (event, identity, day) key.
#[derive(Debug, Clone)]
pub struct NewAttendanceRecord {
    pub event_id: Uuid,
    pub identity_id: Uuid,
    pub day: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_at: DateTime<Utc>,
    pub confidence: f32,
}
