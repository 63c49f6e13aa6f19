//! [`SqliteStore`] — the SQLite implementation of the core store traits.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::OptionalExtension as _;
use thiserror::Error;
use uuid::Uuid;

use rollcall_core::{
    AttendanceRecord, AttendanceStatus, AttendanceStore, Embedding, Enrollment, EnrollmentStore,
    Event, EventStatus, EventStore, NewAttendanceRecord, StoreError,
};

use crate::crypto::{CryptoError, EmbeddingCipher};
use crate::schema::SCHEMA;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("uuid parse error: {0}")]
    Uuid(#[from] uuid::Error),

    #[error("malformed timestamp {0:?}")]
    Timestamp(String),

    #[error("malformed day {0:?}")]
    Day(String),

    #[error("unknown status {0:?}")]
    Status(String),
}

impl From<Error> for StoreError {
    fn from(e: Error) -> Self {
        match e {
            Error::Database(db) => StoreError::Backend(Box::new(db)),
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

// ─── Row encoding ────────────────────────────────────────────────────────────

fn encode_dt(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn decode_dt(s: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| Error::Timestamp(s.to_string()))
}

fn decode_day(s: &str) -> Result<NaiveDate, Error> {
    s.parse().map_err(|_| Error::Day(s.to_string()))
}

fn decode_uuid(s: &str) -> Result<Uuid, Error> {
    Uuid::parse_str(s).map_err(Error::Uuid)
}

const EVENT_COLS: &str = "event_id, scope_id, host_id, title, start_at, duration_secs, \
                          grace_secs, status, created_at, started_at, ended_at";

struct RawEvent {
    event_id: String,
    scope_id: String,
    host_id: String,
    title: String,
    start_at: String,
    duration_secs: i64,
    grace_secs: i64,
    status: String,
    created_at: String,
    started_at: Option<String>,
    ended_at: Option<String>,
}

fn raw_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEvent> {
    Ok(RawEvent {
        event_id: row.get(0)?,
        scope_id: row.get(1)?,
        host_id: row.get(2)?,
        title: row.get(3)?,
        start_at: row.get(4)?,
        duration_secs: row.get(5)?,
        grace_secs: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
        started_at: row.get(9)?,
        ended_at: row.get(10)?,
    })
}

impl RawEvent {
    fn into_event(self) -> Result<Event, Error> {
        Ok(Event {
            event_id: decode_uuid(&self.event_id)?,
            scope_id: decode_uuid(&self.scope_id)?,
            host_id: decode_uuid(&self.host_id)?,
            title: self.title,
            start_at: decode_dt(&self.start_at)?,
            duration: chrono::Duration::seconds(self.duration_secs),
            grace: chrono::Duration::seconds(self.grace_secs),
            status: EventStatus::parse(&self.status).ok_or(Error::Status(self.status))?,
            created_at: decode_dt(&self.created_at)?,
            started_at: self.started_at.as_deref().map(decode_dt).transpose()?,
            ended_at: self.ended_at.as_deref().map(decode_dt).transpose()?,
        })
    }
}

const ENROLLMENT_COLS: &str =
    "enrollment_id, scope_id, identity_id, embedding, active, enrolled_at, updated_at";

struct RawEnrollment {
    enrollment_id: String,
    scope_id: String,
    identity_id: String,
    embedding: Option<Vec<u8>>,
    active: bool,
    enrolled_at: String,
    updated_at: String,
}

fn raw_enrollment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEnrollment> {
    Ok(RawEnrollment {
        enrollment_id: row.get(0)?,
        scope_id: row.get(1)?,
        identity_id: row.get(2)?,
        embedding: row.get(3)?,
        active: row.get(4)?,
        enrolled_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl RawEnrollment {
    fn into_enrollment(self, cipher: &EmbeddingCipher) -> Result<Enrollment, Error> {
        let embedding = self
            .embedding
            .as_deref()
            .map(|blob| cipher.open(blob))
            .transpose()?;
        Ok(Enrollment {
            enrollment_id: decode_uuid(&self.enrollment_id)?,
            scope_id: decode_uuid(&self.scope_id)?,
            identity_id: decode_uuid(&self.identity_id)?,
            embedding,
            active: self.active,
            enrolled_at: decode_dt(&self.enrolled_at)?,
            updated_at: decode_dt(&self.updated_at)?,
        })
    }
}

const RECORD_COLS: &str =
    "record_id, event_id, identity_id, day, status, marked_at, confidence, manual, recorded_by";

struct RawRecord {
    record_id: String,
    event_id: String,
    identity_id: String,
    day: String,
    status: String,
    marked_at: String,
    confidence: f64,
    manual: bool,
    recorded_by: Option<String>,
}

fn raw_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        record_id: row.get(0)?,
        event_id: row.get(1)?,
        identity_id: row.get(2)?,
        day: row.get(3)?,
        status: row.get(4)?,
        marked_at: row.get(5)?,
        confidence: row.get(6)?,
        manual: row.get(7)?,
        recorded_by: row.get(8)?,
    })
}

impl RawRecord {
    fn into_record(self) -> Result<AttendanceRecord, Error> {
        Ok(AttendanceRecord {
            record_id: decode_uuid(&self.record_id)?,
            event_id: decode_uuid(&self.event_id)?,
            identity_id: decode_uuid(&self.identity_id)?,
            day: decode_day(&self.day)?,
            status: AttendanceStatus::parse(&self.status).ok_or(Error::Status(self.status))?,
            marked_at: decode_dt(&self.marked_at)?,
            confidence: self.confidence as f32,
            manual: self.manual,
            recorded_by: self.recorded_by.as_deref().map(decode_uuid).transpose()?,
        })
    }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// Rollcall's persistence, backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted. Embeddings
/// are sealed with the supplied cipher before they hit disk and opened on
/// the way back out; nothing outside this crate ever sees a ciphertext.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
    cipher: EmbeddingCipher,
}

impl SqliteStore {
    /// Open (or create) a store at `path` and run schema initialisation.
    pub async fn open(path: impl AsRef<Path>, cipher: EmbeddingCipher) -> Result<Self, Error> {
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn, cipher };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory store — useful for testing.
    pub async fn open_in_memory(cipher: EmbeddingCipher) -> Result<Self, Error> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn, cipher };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn fetch_event(&self, event_id: Uuid) -> Result<Option<Event>, Error> {
        let id_str = event_id.to_string();
        let raw: Option<RawEvent> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {EVENT_COLS} FROM events WHERE event_id = ?1"),
                        rusqlite::params![id_str],
                        raw_event_row,
                    )
                    .optional()?)
            })
            .await?;
        raw.map(RawEvent::into_event).transpose()
    }

    /// Persist a fully-built event. Event CRUD proper is an external
    /// collaborator's job; this seam exists for deployment seeding and
    /// tests.
    pub async fn insert_event(&self, event: &Event) -> Result<(), Error> {
        let event_id = event.event_id.to_string();
        let scope_id = event.scope_id.to_string();
        let host_id = event.host_id.to_string();
        let title = event.title.clone();
        let start_at = encode_dt(event.start_at);
        let duration_secs = event.duration.num_seconds();
        let grace_secs = event.grace.num_seconds();
        let status = event.status.as_str();
        let created_at = encode_dt(event.created_at);
        let started_at = event.started_at.map(encode_dt);
        let ended_at = event.ended_at.map(encode_dt);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO events (
                         event_id, scope_id, host_id, title, start_at, duration_secs,
                         grace_secs, status, created_at, started_at, ended_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    rusqlite::params![
                        event_id,
                        scope_id,
                        host_id,
                        title,
                        start_at,
                        duration_secs,
                        grace_secs,
                        status,
                        created_at,
                        started_at,
                        ended_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Delete an event; its attendance records go with it (cascade).
    pub async fn delete_event(&self, event_id: Uuid) -> Result<bool, Error> {
        let id_str = event_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM events WHERE event_id = ?1", rusqlite::params![id_str])?)
            })
            .await?;
        Ok(changed > 0)
    }
}

// ─── EventStore ──────────────────────────────────────────────────────────────

impl EventStore for SqliteStore {
    async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.fetch_event(event_id).await?)
    }

    async fn transition_event(
        &self,
        event_id: Uuid,
        from: EventStatus,
        to: EventStatus,
        at: DateTime<Utc>,
    ) -> Result<Event, StoreError> {
        let id_str = event_id.to_string();
        let from_str = from.as_str();
        let to_str = to.as_str();
        let at_str = encode_dt(at);

        // Guarded single-statement update: the WHERE clause carries the
        // monotonicity check, so a lost race is a typed error, not a
        // corrupt state. Events never move back to scheduled.
        let stamp_col = match to {
            EventStatus::Ongoing => "started_at",
            EventStatus::Completed => "ended_at",
            EventStatus::Scheduled => {
                return Err(StoreError::InvalidTransition { expected: from });
            }
        };
        let sql = format!(
            "UPDATE events SET status = ?1, {stamp_col} = ?2 \
             WHERE event_id = ?3 AND status = ?4"
        );

        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(&sql, rusqlite::params![to_str, at_str, id_str, from_str])?)
            })
            .await
            .map_err(Error::Database)?;

        if changed == 0 {
            return match self.fetch_event(event_id).await? {
                None => Err(StoreError::NotFound),
                Some(_) => Err(StoreError::InvalidTransition { expected: from }),
            };
        }

        self.fetch_event(event_id)
            .await?
            .ok_or(StoreError::NotFound)
    }
}

// ─── EnrollmentStore ─────────────────────────────────────────────────────────

impl EnrollmentStore for SqliteStore {
    async fn get_enrollment(
        &self,
        scope_id: Uuid,
        identity_id: Uuid,
    ) -> Result<Option<Enrollment>, StoreError> {
        let scope_str = scope_id.to_string();
        let identity_str = identity_id.to_string();
        let raw: Option<RawEnrollment> = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "SELECT {ENROLLMENT_COLS} FROM enrollments \
                             WHERE scope_id = ?1 AND identity_id = ?2"
                        ),
                        rusqlite::params![scope_str, identity_str],
                        raw_enrollment_row,
                    )
                    .optional()?)
            })
            .await
            .map_err(Error::Database)?;

        Ok(raw
            .map(|r| r.into_enrollment(&self.cipher))
            .transpose()
            .map_err(StoreError::from)?)
    }

    async fn list_candidates(&self, scope_id: Uuid) -> Result<Vec<Enrollment>, StoreError> {
        let scope_str = scope_id.to_string();
        let raws: Vec<RawEnrollment> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ENROLLMENT_COLS} FROM enrollments \
                     WHERE scope_id = ?1 AND active = 1 AND embedding IS NOT NULL \
                     ORDER BY identity_id"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![scope_str], raw_enrollment_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::Database)?;

        raws.into_iter()
            .map(|r| r.into_enrollment(&self.cipher).map_err(StoreError::from))
            .collect()
    }

    async fn upsert_enrollment(
        &self,
        scope_id: Uuid,
        identity_id: Uuid,
        embedding: Embedding,
    ) -> Result<Enrollment, StoreError> {
        let blob = self.cipher.seal(&embedding).map_err(Error::Crypto)?;
        let new_id = Uuid::new_v4().to_string();
        let scope_str = scope_id.to_string();
        let identity_str = identity_id.to_string();
        let now_str = encode_dt(Utc::now());

        // Update-or-create in one statement; enrolled_at survives
        // re-enrollment, updated_at and the embedding do not.
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO enrollments (
                         enrollment_id, scope_id, identity_id, embedding, active,
                         enrolled_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
                     ON CONFLICT(scope_id, identity_id) DO UPDATE SET
                         embedding = excluded.embedding,
                         active = 1,
                         updated_at = excluded.updated_at",
                    rusqlite::params![new_id, scope_str, identity_str, blob, now_str],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::Database)?;

        self.get_enrollment(scope_id, identity_id)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn erase_identity(&self, identity_id: Uuid) -> Result<u64, StoreError> {
        let identity_str = identity_id.to_string();
        let now_str = encode_dt(Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE enrollments SET embedding = NULL, active = 0, updated_at = ?2 \
                     WHERE identity_id = ?1 AND (active = 1 OR embedding IS NOT NULL)",
                    rusqlite::params![identity_str, now_str],
                )?)
            })
            .await
            .map_err(Error::Database)?;

        if changed > 0 {
            tracing::info!(identity = %identity_id, rows = changed, "embedding bytes cleared");
        }
        Ok(changed as u64)
    }
}

// ─── AttendanceStore ─────────────────────────────────────────────────────────

impl AttendanceStore for SqliteStore {
    async fn get_or_create_record(
        &self,
        new: NewAttendanceRecord,
    ) -> Result<(AttendanceRecord, bool), StoreError> {
        let record_id = Uuid::new_v4().to_string();
        let event_str = new.event_id.to_string();
        let identity_str = new.identity_id.to_string();
        let day_str = new.day.to_string();
        let status_str = new.status.as_str();
        let marked_str = encode_dt(new.marked_at);
        let confidence = new.confidence as f64;

        // Insert-if-absent and read-back in one transaction on one
        // connection: the UNIQUE(event, identity, day) constraint decides
        // the winner under concurrent duplicates.
        let (raw, created) = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO attendance (
                         record_id, event_id, identity_id, day, status, marked_at,
                         confidence, manual, recorded_by
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL)
                     ON CONFLICT(event_id, identity_id, day) DO NOTHING",
                    rusqlite::params![
                        record_id,
                        event_str,
                        identity_str,
                        day_str,
                        status_str,
                        marked_str,
                        confidence,
                    ],
                )?;
                let created = tx.changes() > 0;
                let raw = tx.query_row(
                    &format!(
                        "SELECT {RECORD_COLS} FROM attendance \
                         WHERE event_id = ?1 AND identity_id = ?2 AND day = ?3"
                    ),
                    rusqlite::params![event_str, identity_str, day_str],
                    raw_record_row,
                )?;
                tx.commit()?;
                Ok((raw, created))
            })
            .await
            .map_err(Error::Database)?;

        Ok((raw.into_record().map_err(StoreError::from)?, created))
    }

    async fn override_record(
        &self,
        event_id: Uuid,
        record_id: Uuid,
        status: AttendanceStatus,
        recorded_by: Uuid,
    ) -> Result<AttendanceRecord, StoreError> {
        let record_str = record_id.to_string();
        let event_str = event_id.to_string();
        let status_str = status.as_str();
        let recorder_str = recorded_by.to_string();

        let raw = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let changed = tx.execute(
                    "UPDATE attendance SET status = ?1, manual = 1, recorded_by = ?2 \
                     WHERE record_id = ?3 AND event_id = ?4",
                    rusqlite::params![status_str, recorder_str, record_str, event_str],
                )?;
                if changed == 0 {
                    tx.commit()?;
                    return Ok(None);
                }
                let raw = tx.query_row(
                    &format!("SELECT {RECORD_COLS} FROM attendance WHERE record_id = ?1"),
                    rusqlite::params![record_str],
                    raw_record_row,
                )?;
                tx.commit()?;
                Ok(Some(raw))
            })
            .await
            .map_err(Error::Database)?;

        match raw {
            None => Err(StoreError::NotFound),
            Some(raw) => Ok(raw.into_record().map_err(StoreError::from)?),
        }
    }

    async fn list_records(&self, event_id: Uuid) -> Result<Vec<AttendanceRecord>, StoreError> {
        let event_str = event_id.to_string();
        let raws: Vec<RawRecord> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RECORD_COLS} FROM attendance \
                     WHERE event_id = ?1 ORDER BY marked_at"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![event_str], raw_record_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::Database)?;

        raws.into_iter()
            .map(|r| r.into_record().map_err(StoreError::from))
            .collect()
    }
}
