//! SQL schema for the Rollcall SQLite store.
//!
//! Executed once at connection startup; idempotent thanks to
//! `CREATE TABLE IF NOT EXISTS`. Future migrations will be gated on
//! `PRAGMA user_version`.
//!
//! The uniqueness constraints carry the engine's core invariants:
//! one enrollment per (scope, identity), at most one attendance record per
//! (event, identity, day). Attendance rows hold no biometric data.

pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS events (
    event_id      TEXT PRIMARY KEY,
    scope_id      TEXT NOT NULL,
    host_id       TEXT NOT NULL,
    title         TEXT NOT NULL,
    start_at      TEXT NOT NULL,     -- ISO 8601 UTC, scheduled start
    duration_secs INTEGER NOT NULL,
    grace_secs    INTEGER NOT NULL,
    status        TEXT NOT NULL DEFAULT 'scheduled',
    created_at    TEXT NOT NULL,
    started_at    TEXT,
    ended_at      TEXT
);

CREATE TABLE IF NOT EXISTS enrollments (
    enrollment_id TEXT PRIMARY KEY,
    scope_id      TEXT NOT NULL,
    identity_id   TEXT NOT NULL,
    embedding     BLOB,              -- AES-256-GCM nonce||ciphertext; NULL after erasure
    active        INTEGER NOT NULL DEFAULT 1,
    enrolled_at   TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE (scope_id, identity_id)
);

CREATE TABLE IF NOT EXISTS attendance (
    record_id   TEXT PRIMARY KEY,
    event_id    TEXT NOT NULL REFERENCES events(event_id) ON DELETE CASCADE,
    identity_id TEXT NOT NULL,
    day         TEXT NOT NULL,       -- calendar day scoping recurring events
    status      TEXT NOT NULL,
    marked_at   TEXT NOT NULL,
    confidence  REAL NOT NULL,
    manual      INTEGER NOT NULL DEFAULT 0,
    recorded_by TEXT,
    UNIQUE (event_id, identity_id, day)
);

CREATE INDEX IF NOT EXISTS enrollments_scope_idx    ON enrollments(scope_id);
CREATE INDEX IF NOT EXISTS enrollments_identity_idx ON enrollments(identity_id);
CREATE INDEX IF NOT EXISTS attendance_event_idx     ON attendance(event_id);

PRAGMA user_version = 1;
";
