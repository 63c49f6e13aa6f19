//! The attendance decision engine.
//!
//! Orchestrates extractor, comparator, window evaluator and stores to
//! process a single mark request: 1:1 verification (`mark_live`), 1:N
//! identification (`batch_recognize`), enrollment and privacy erasure.
//! Embeddings and comparisons are computed *before* the atomic record
//! upsert; no storage lock is ever held across extraction.

use std::collections::BTreeMap;

use thiserror::Error;
use uuid::Uuid;

use crate::embedding::{Comparator, DimensionMismatch, Match};
use crate::extract::{EmbeddingExtractor, ExtractionError};
use crate::model::{
    AttendanceRecord, AttendanceStatus, Enrollment, Event, EventStatus, NewAttendanceRecord,
};
use crate::outcome::{BatchMatch, BatchOutcome, MarkOutcome};
use crate::store::{AttendanceStore, EnrollmentStore, EventStore, StoreError};
use crate::window::{classify_window, Clock, SystemClock, WindowState};

/// How a rejection should be treated at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or missing input; never retried automatically.
    Validation,
    /// Caller lacks the required relationship or role.
    Authorization,
    /// The window is not open; the caller corrects by waiting or was too late.
    Temporal,
    /// The image did not yield a usable face; the caller retries with a
    /// better image.
    Recognition,
    /// Infrastructure failure; safe to retry, surfaced as such.
    Transient,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Authorization => "authorization",
            ErrorClass::Temporal => "temporal",
            ErrorClass::Recognition => "recognition",
            ErrorClass::Transient => "transient",
        }
    }
}

/// Rejection reasons for engine operations.
#[derive(Debug, Error)]
pub enum MarkError {
    #[error("event not found")]
    EventNotFound,

    #[error("not enrolled in this event; join it before marking attendance")]
    NotEnrolled,

    #[error("face not enrolled; capture a reference image first")]
    FaceNotEnrolled,

    #[error("only the event host may do this")]
    NotHost,

    #[error("session is {0}; attendance is only accepted while it is ongoing")]
    SessionNotOpen(EventStatus),

    #[error("event has not started yet")]
    NotStarted,

    #[error("event has ended; the grace period has expired")]
    Expired,

    #[error("no face detected in image")]
    NoFaceDetected,

    #[error("multiple faces detected; enrollment needs exactly one")]
    MultipleFaces,

    #[error(transparent)]
    Dimension(#[from] DimensionMismatch),

    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MarkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MarkError::EventNotFound => ErrorClass::Validation,
            MarkError::NotEnrolled | MarkError::NotHost => ErrorClass::Authorization,
            MarkError::FaceNotEnrolled => ErrorClass::Validation,
            MarkError::SessionNotOpen(_) | MarkError::NotStarted | MarkError::Expired => {
                ErrorClass::Temporal
            }
            MarkError::NoFaceDetected | MarkError::MultipleFaces => ErrorClass::Recognition,
            MarkError::Dimension(_) => ErrorClass::Validation,
            MarkError::Extraction(ExtractionError::DecodeFailed) => ErrorClass::Validation,
            MarkError::Extraction(_) => ErrorClass::Transient,
            MarkError::Store(StoreError::NotFound) => ErrorClass::Validation,
            MarkError::Store(StoreError::InvalidTransition { .. }) => ErrorClass::Validation,
            MarkError::Store(_) => ErrorClass::Transient,
        }
    }
}

/// The decision engine. Generic over extractor, store backend and clock so
/// every collaborator is injectable in tests.
pub struct DecisionEngine<X, S, C = SystemClock> {
    extractor: X,
    store: S,
    comparator: Comparator,
    clock: C,
}

impl<X, S> DecisionEngine<X, S, SystemClock>
where
    X: EmbeddingExtractor,
    S: EventStore + EnrollmentStore + AttendanceStore,
{
    pub fn new(extractor: X, store: S, comparator: Comparator) -> Self {
        Self::with_clock(extractor, store, comparator, SystemClock)
    }
}

impl<X, S, C> DecisionEngine<X, S, C>
where
    X: EmbeddingExtractor,
    S: EventStore + EnrollmentStore + AttendanceStore,
    C: Clock,
{
    pub fn with_clock(extractor: X, store: S, comparator: Comparator, clock: C) -> Self {
        Self {
            extractor,
            store,
            comparator,
            clock,
        }
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    /// Gate shared by mark_live and batch_recognize: the session must be
    /// ongoing and "now" inside the window. Returns the status an accepted
    /// mark receives.
    fn open_window(
        &self,
        event: &Event,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<AttendanceStatus, MarkError> {
        if event.status != EventStatus::Ongoing {
            return Err(MarkError::SessionNotOpen(event.status));
        }
        match classify_window(now, event.start_at, event.duration, event.grace) {
            WindowState::NotStarted => Err(MarkError::NotStarted),
            WindowState::Expired => Err(MarkError::Expired),
            WindowState::Active => Ok(AttendanceStatus::Present),
            WindowState::Grace => Ok(AttendanceStatus::Late),
        }
    }

    /// 1:1 verification: the authenticated caller claims an identity, the
    /// image must match that identity's enrolled reference.
    pub async fn mark_live(
        &self,
        identity_id: Uuid,
        event_id: Uuid,
        image: &[u8],
    ) -> Result<MarkOutcome, MarkError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(MarkError::EventNotFound)?;

        let enrollment = self
            .store
            .get_enrollment(event.scope_id, identity_id)
            .await?
            .ok_or(MarkError::NotEnrolled)?;

        let reference = match &enrollment.embedding {
            Some(e) if enrollment.active => e,
            _ => return Err(MarkError::FaceNotEnrolled),
        };

        let now = self.clock.now();
        let status = self.open_window(&event, now)?;

        let probes = self.extractor.extract(image).await?;
        if probes.is_empty() {
            return Err(MarkError::NoFaceDetected);
        }

        // Several faces in frame: the best score against the claimed
        // reference decides.
        let mut best: Option<Match> = None;
        for probe in &probes {
            let m = self.comparator.compare(probe, reference)?;
            if best.map_or(true, |b| m.confidence > b.confidence) {
                best = Some(m);
            }
        }
        let best = best.ok_or(MarkError::NoFaceDetected)?;

        tracing::info!(
            identity = %identity_id,
            event = %event_id,
            matched = best.is_match,
            confidence = best.confidence,
            score = best.score,
            "live verification compared"
        );

        if !best.is_match {
            return Ok(MarkOutcome::NotRecognized {
                confidence: best.confidence,
            });
        }

        let (record, created) = self
            .store
            .get_or_create_record(NewAttendanceRecord {
                event_id,
                identity_id,
                day: now.date_naive(),
                status,
                marked_at: now,
                confidence: best.confidence,
            })
            .await?;

        if created {
            Ok(MarkOutcome::Marked {
                status: record.status,
                confidence: best.confidence,
                timestamp: record.marked_at,
            })
        } else {
            Ok(MarkOutcome::AlreadyMarked {
                status: record.status,
                timestamp: record.marked_at,
            })
        }
    }

    /// 1:N identification over one image, host-only: every detected face is
    /// scored against every candidate enrollment of the event's scope.
    pub async fn batch_recognize(
        &self,
        host_id: Uuid,
        event_id: Uuid,
        image: &[u8],
    ) -> Result<BatchOutcome, MarkError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(MarkError::EventNotFound)?;

        if event.host_id != host_id {
            return Err(MarkError::NotHost);
        }

        let now = self.clock.now();
        let status = self.open_window(&event, now)?;

        // Candidate order is fixed (sorted by identity id) so equal-score
        // ties resolve the same way on every backend.
        let mut candidates = self.store.list_candidates(event.scope_id).await?;
        candidates.sort_by_key(|e| e.identity_id);

        let probes = self.extractor.extract(image).await?;
        let faces_detected = probes.len();

        // Best accepted confidence per identity; one identity is never
        // counted twice even if several faces match it.
        let mut hits: BTreeMap<Uuid, f32> = BTreeMap::new();
        for probe in &probes {
            let mut best: Option<(Uuid, f32)> = None;
            for candidate in &candidates {
                let Some(reference) = candidate.embedding.as_ref() else {
                    continue;
                };
                let m = match self.comparator.compare(probe, reference) {
                    Ok(m) => m,
                    Err(mismatch) => {
                        // A stale enrollment from another extractor backend
                        // must not sink the whole batch.
                        tracing::warn!(
                            identity = %candidate.identity_id,
                            %mismatch,
                            "skipping candidate with inconsistent embedding dimension"
                        );
                        continue;
                    }
                };
                if !m.is_match {
                    continue;
                }
                if best.map_or(true, |(_, c)| m.confidence > c) {
                    best = Some((candidate.identity_id, m.confidence));
                }
            }
            if let Some((identity_id, confidence)) = best {
                let entry = hits.entry(identity_id).or_insert(confidence);
                if confidence > *entry {
                    *entry = confidence;
                }
            }
        }

        let mut matches = Vec::with_capacity(hits.len());
        for (identity_id, confidence) in hits {
            let (record, created) = self
                .store
                .get_or_create_record(NewAttendanceRecord {
                    event_id,
                    identity_id,
                    day: now.date_naive(),
                    status,
                    marked_at: now,
                    confidence,
                })
                .await?;
            matches.push(BatchMatch {
                identity_id,
                status: record.status,
                confidence,
                newly_marked: created,
                timestamp: record.marked_at,
            });
        }

        tracing::info!(
            event = %event_id,
            faces = faces_detected,
            matched = matches.len(),
            "batch recognition complete"
        );

        Ok(BatchOutcome {
            faces_detected,
            matches,
        })
    }

    /// Enroll (or re-enroll) a reference embedding for (identity, scope).
    /// The image must contain exactly one face.
    pub async fn enroll(
        &self,
        identity_id: Uuid,
        scope_id: Uuid,
        image: &[u8],
    ) -> Result<Enrollment, MarkError> {
        let mut probes = self.extractor.extract(image).await?;
        let embedding = match probes.len() {
            0 => return Err(MarkError::NoFaceDetected),
            1 => probes.remove(0),
            _ => return Err(MarkError::MultipleFaces),
        };

        let dim = embedding.dim();
        let enrollment = self
            .store
            .upsert_enrollment(scope_id, identity_id, embedding)
            .await?;

        tracing::info!(
            identity = %identity_id,
            scope = %scope_id,
            dim,
            "reference embedding enrolled"
        );
        Ok(enrollment)
    }

    /// Privacy erasure: clear embedding bytes and deactivate all of the
    /// identity's enrollments. Idempotent — erasing nothing succeeds.
    pub async fn erase(&self, identity_id: Uuid) -> Result<u64, MarkError> {
        let cleared = self.store.erase_identity(identity_id).await?;
        tracing::info!(identity = %identity_id, enrollments = cleared, "biometric data erased");
        Ok(cleared)
    }

    /// Host transition: Scheduled → Ongoing.
    pub async fn start_session(&self, host_id: Uuid, event_id: Uuid) -> Result<Event, MarkError> {
        self.transition(host_id, event_id, EventStatus::Scheduled, EventStatus::Ongoing)
            .await
    }

    /// Host transition: Ongoing → Completed.
    pub async fn end_session(&self, host_id: Uuid, event_id: Uuid) -> Result<Event, MarkError> {
        self.transition(host_id, event_id, EventStatus::Ongoing, EventStatus::Completed)
            .await
    }

    async fn transition(
        &self,
        host_id: Uuid,
        event_id: Uuid,
        from: EventStatus,
        to: EventStatus,
    ) -> Result<Event, MarkError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(MarkError::EventNotFound)?;
        if event.host_id != host_id {
            return Err(MarkError::NotHost);
        }
        let updated = self
            .store
            .transition_event(event_id, from, to, self.clock.now())
            .await?;
        tracing::info!(event = %event_id, %from, %to, "session transition");
        Ok(updated)
    }

    /// Host manual override of an existing record's status.
    pub async fn override_record(
        &self,
        host_id: Uuid,
        event_id: Uuid,
        record_id: Uuid,
        status: AttendanceStatus,
    ) -> Result<AttendanceRecord, MarkError> {
        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or(MarkError::EventNotFound)?;
        if event.host_id != host_id {
            return Err(MarkError::NotHost);
        }
        let record = self
            .store
            .override_record(event_id, record_id, status, host_id)
            .await?;
        tracing::info!(
            event = %event_id,
            record = %record_id,
            %status,
            "attendance manually overridden"
        );
        Ok(record)
    }

    /// Records of an event, ordered by mark time.
    pub async fn list_records(&self, event_id: Uuid) -> Result<Vec<AttendanceRecord>, MarkError> {
        Ok(self.store.list_records(event_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedding, Metric};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    // ── test doubles ─────────────────────────────────────────────────────

    struct FixtureExtractor {
        result: Result<Vec<Embedding>, ExtractionError>,
    }

    impl FixtureExtractor {
        fn faces(faces: Vec<Embedding>) -> Self {
            Self { result: Ok(faces) }
        }

        fn failing(err: ExtractionError) -> Self {
            Self { result: Err(err) }
        }
    }

    impl EmbeddingExtractor for FixtureExtractor {
        async fn extract(&self, _image: &[u8]) -> Result<Vec<Embedding>, ExtractionError> {
            self.result.clone()
        }
    }

    #[derive(Default)]
    struct Inner {
        events: Mutex<HashMap<Uuid, Event>>,
        enrollments: Mutex<Vec<Enrollment>>,
        records: Mutex<Vec<AttendanceRecord>>,
    }

    #[derive(Clone, Default)]
    struct MemoryStore(Arc<Inner>);

    impl EventStore for MemoryStore {
        async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
            Ok(self.0.events.lock().unwrap().get(&event_id).cloned())
        }

        async fn transition_event(
            &self,
            event_id: Uuid,
            from: EventStatus,
            to: EventStatus,
            at: DateTime<Utc>,
        ) -> Result<Event, StoreError> {
            let mut events = self.0.events.lock().unwrap();
            let event = events.get_mut(&event_id).ok_or(StoreError::NotFound)?;
            if event.status != from {
                return Err(StoreError::InvalidTransition { expected: from });
            }
            event.status = to;
            match to {
                EventStatus::Ongoing => event.started_at = Some(at),
                EventStatus::Completed => event.ended_at = Some(at),
                EventStatus::Scheduled => {}
            }
            Ok(event.clone())
        }
    }

    impl EnrollmentStore for MemoryStore {
        async fn get_enrollment(
            &self,
            scope_id: Uuid,
            identity_id: Uuid,
        ) -> Result<Option<Enrollment>, StoreError> {
            Ok(self
                .0
                .enrollments
                .lock()
                .unwrap()
                .iter()
                .find(|e| e.scope_id == scope_id && e.identity_id == identity_id)
                .cloned())
        }

        async fn list_candidates(&self, scope_id: Uuid) -> Result<Vec<Enrollment>, StoreError> {
            let mut out: Vec<Enrollment> = self
                .0
                .enrollments
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.scope_id == scope_id && e.active && e.embedding.is_some())
                .cloned()
                .collect();
            out.sort_by_key(|e| e.identity_id);
            Ok(out)
        }

        async fn upsert_enrollment(
            &self,
            scope_id: Uuid,
            identity_id: Uuid,
            embedding: Embedding,
        ) -> Result<Enrollment, StoreError> {
            let mut enrollments = self.0.enrollments.lock().unwrap();
            let now = Utc::now();
            if let Some(e) = enrollments
                .iter_mut()
                .find(|e| e.scope_id == scope_id && e.identity_id == identity_id)
            {
                e.embedding = Some(embedding);
                e.active = true;
                e.updated_at = now;
                return Ok(e.clone());
            }
            let enrollment = Enrollment {
                enrollment_id: Uuid::new_v4(),
                scope_id,
                identity_id,
                embedding: Some(embedding),
                active: true,
                enrolled_at: now,
                updated_at: now,
            };
            enrollments.push(enrollment.clone());
            Ok(enrollment)
        }

        async fn erase_identity(&self, identity_id: Uuid) -> Result<u64, StoreError> {
            let mut cleared = 0;
            for e in self.0.enrollments.lock().unwrap().iter_mut() {
                if e.identity_id == identity_id && (e.active || e.embedding.is_some()) {
                    e.embedding = None;
                    e.active = false;
                    cleared += 1;
                }
            }
            Ok(cleared)
        }
    }

    impl AttendanceStore for MemoryStore {
        async fn get_or_create_record(
            &self,
            new: NewAttendanceRecord,
        ) -> Result<(AttendanceRecord, bool), StoreError> {
            let mut records = self.0.records.lock().unwrap();
            if let Some(existing) = records.iter().find(|r| {
                r.event_id == new.event_id && r.identity_id == new.identity_id && r.day == new.day
            }) {
                return Ok((existing.clone(), false));
            }
            let record = AttendanceRecord {
                record_id: Uuid::new_v4(),
                event_id: new.event_id,
                identity_id: new.identity_id,
                day: new.day,
                status: new.status,
                marked_at: new.marked_at,
                confidence: new.confidence,
                manual: false,
                recorded_by: None,
            };
            records.push(record.clone());
            Ok((record, true))
        }

        async fn override_record(
            &self,
            event_id: Uuid,
            record_id: Uuid,
            status: AttendanceStatus,
            recorded_by: Uuid,
        ) -> Result<AttendanceRecord, StoreError> {
            let mut records = self.0.records.lock().unwrap();
            let record = records
                .iter_mut()
                .find(|r| r.record_id == record_id && r.event_id == event_id)
                .ok_or(StoreError::NotFound)?;
            record.status = status;
            record.manual = true;
            record.recorded_by = Some(recorded_by);
            Ok(record.clone())
        }

        async fn list_records(&self, event_id: Uuid) -> Result<Vec<AttendanceRecord>, StoreError> {
            let mut out: Vec<AttendanceRecord> = self
                .0
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.event_id == event_id)
                .cloned()
                .collect();
            out.sort_by_key(|r| r.marked_at);
            Ok(out)
        }
    }

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    // ── fixtures ─────────────────────────────────────────────────────────

    fn ts(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, min, 0).unwrap()
    }

    fn unit(axis: usize) -> Embedding {
        let mut v = vec![0.0f32; 8];
        v[axis] = 1.0;
        Embedding::new(v)
    }

    /// Starts 10:00, 60 minutes, 15 minutes grace, already Ongoing.
    fn ongoing_event(scope_id: Uuid, host_id: Uuid) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            scope_id,
            host_id,
            title: "Linear Algebra II".to_string(),
            start_at: ts(10, 0),
            duration: Duration::minutes(60),
            grace: Duration::minutes(15),
            status: EventStatus::Ongoing,
            created_at: ts(8, 0),
            started_at: Some(ts(10, 0)),
            ended_at: None,
        }
    }

    struct Fixture {
        store: MemoryStore,
        event_id: Uuid,
        host_id: Uuid,
        identity_id: Uuid,
    }

    fn fixture_with_reference(reference: Embedding) -> Fixture {
        let store = MemoryStore::default();
        let scope_id = Uuid::new_v4();
        let host_id = Uuid::new_v4();
        let identity_id = Uuid::new_v4();
        let event = ongoing_event(scope_id, host_id);
        let event_id = event.event_id;
        store.0.events.lock().unwrap().insert(event_id, event);
        store.0.enrollments.lock().unwrap().push(Enrollment {
            enrollment_id: Uuid::new_v4(),
            scope_id,
            identity_id,
            embedding: Some(reference),
            active: true,
            enrolled_at: ts(9, 0),
            updated_at: ts(9, 0),
        });
        Fixture {
            store,
            event_id,
            host_id,
            identity_id,
        }
    }

    fn engine_at(
        fixture: &Fixture,
        faces: Vec<Embedding>,
        now: DateTime<Utc>,
    ) -> DecisionEngine<FixtureExtractor, MemoryStore, FixedClock> {
        DecisionEngine::with_clock(
            FixtureExtractor::faces(faces),
            fixture.store.clone(),
            Comparator::new(Metric::Cosine, 0.4),
            FixedClock(now),
        )
    }

    // ── mark_live ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn marks_present_within_duration() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(0)], ts(10, 5));
        let outcome = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap();
        match outcome {
            MarkOutcome::Marked {
                status, confidence, ..
            } => {
                assert_eq!(status, AttendanceStatus::Present);
                assert!(confidence > 0.99);
            }
            other => panic!("expected Marked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn marks_late_in_grace_period() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(0)], ts(11, 5));
        let outcome = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap();
        assert!(matches!(
            outcome,
            MarkOutcome::Marked {
                status: AttendanceStatus::Late,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn rejects_before_start() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(0)], ts(9, 30));
        let err = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap_err();
        assert!(matches!(err, MarkError::NotStarted));
        assert_eq!(err.class(), ErrorClass::Temporal);
    }

    #[tokio::test]
    async fn rejects_after_grace_expired() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(0)], ts(11, 20));
        let err = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap_err();
        assert!(matches!(err, MarkError::Expired));
    }

    #[tokio::test]
    async fn rejects_when_session_not_started_by_host() {
        let fx = fixture_with_reference(unit(0));
        fx.store
            .0
            .events
            .lock()
            .unwrap()
            .get_mut(&fx.event_id)
            .unwrap()
            .status = EventStatus::Scheduled;
        let engine = engine_at(&fx, vec![unit(0)], ts(10, 5));
        let err = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap_err();
        assert!(matches!(
            err,
            MarkError::SessionNotOpen(EventStatus::Scheduled)
        ));
    }

    #[tokio::test]
    async fn rejects_unknown_event() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(0)], ts(10, 5));
        let err = engine
            .mark_live(fx.identity_id, Uuid::new_v4(), b"jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, MarkError::EventNotFound));
    }

    #[tokio::test]
    async fn rejects_identity_without_enrollment() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(0)], ts(10, 5));
        let err = engine
            .mark_live(Uuid::new_v4(), fx.event_id, b"jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, MarkError::NotEnrolled));
        assert_eq!(err.class(), ErrorClass::Authorization);
    }

    #[tokio::test]
    async fn second_mark_is_idempotent_and_keeps_original_timestamp() {
        let fx = fixture_with_reference(unit(0));

        let first = engine_at(&fx, vec![unit(0)], ts(10, 5));
        let outcome = first.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap();
        let original_ts = match outcome {
            MarkOutcome::Marked { timestamp, .. } => timestamp,
            other => panic!("expected Marked, got {other:?}"),
        };

        // Same day, 40 minutes later, separate request.
        let second = engine_at(&fx, vec![unit(0)], ts(10, 45));
        let outcome = second.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap();
        match outcome {
            MarkOutcome::AlreadyMarked { status, timestamp } => {
                assert_eq!(status, AttendanceStatus::Present);
                assert_eq!(timestamp, original_ts);
            }
            other => panic!("expected AlreadyMarked, got {other:?}"),
        }

        assert_eq!(fx.store.0.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mismatching_face_is_not_recognized() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(1)], ts(10, 5));
        let outcome = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap();
        match outcome {
            MarkOutcome::NotRecognized { confidence } => assert!(confidence < 0.4),
            other => panic!("expected NotRecognized, got {other:?}"),
        }
        assert!(fx.store.0.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn best_face_in_frame_wins_verification() {
        let fx = fixture_with_reference(unit(0));
        // A stranger's face plus the claimant's own.
        let engine = engine_at(&fx, vec![unit(1), unit(0)], ts(10, 5));
        let outcome = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap();
        assert!(matches!(outcome, MarkOutcome::Marked { .. }));
    }

    #[tokio::test]
    async fn empty_extraction_is_no_face_detected() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![], ts(10, 5));
        let err = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap_err();
        assert!(matches!(err, MarkError::NoFaceDetected));
        assert_eq!(err.class(), ErrorClass::Recognition);
    }

    #[tokio::test]
    async fn extractor_timeout_is_transient() {
        let fx = fixture_with_reference(unit(0));
        let engine = DecisionEngine::with_clock(
            FixtureExtractor::failing(ExtractionError::Timeout),
            fx.store.clone(),
            Comparator::new(Metric::Cosine, 0.4),
            FixedClock(ts(10, 5)),
        );
        let err = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap_err();
        assert!(matches!(err, MarkError::Extraction(ExtractionError::Timeout)));
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[tokio::test]
    async fn dimension_mismatch_rejects_the_request() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![Embedding::new(vec![1.0, 0.0])], ts(10, 5));
        let err = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap_err();
        assert!(matches!(err, MarkError::Dimension(_)));
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    // ── enrollment & erasure ─────────────────────────────────────────────

    #[tokio::test]
    async fn erased_identity_gets_face_not_enrolled_not_a_crash() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(0)], ts(10, 5));

        assert_eq!(engine.erase(fx.identity_id).await.unwrap(), 1);
        // Second erase is a no-op, not an error.
        assert_eq!(engine.erase(fx.identity_id).await.unwrap(), 0);

        let err = engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap_err();
        assert!(matches!(err, MarkError::FaceNotEnrolled));
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[tokio::test]
    async fn enroll_requires_exactly_one_face() {
        let fx = fixture_with_reference(unit(0));
        let scope_id = Uuid::new_v4();

        let none = engine_at(&fx, vec![], ts(9, 0));
        assert!(matches!(
            none.enroll(Uuid::new_v4(), scope_id, b"jpg").await.unwrap_err(),
            MarkError::NoFaceDetected
        ));

        let crowd = engine_at(&fx, vec![unit(0), unit(1)], ts(9, 0));
        assert!(matches!(
            crowd.enroll(Uuid::new_v4(), scope_id, b"jpg").await.unwrap_err(),
            MarkError::MultipleFaces
        ));

        let single = engine_at(&fx, vec![unit(2)], ts(9, 0));
        let enrollment = single.enroll(Uuid::new_v4(), scope_id, b"jpg").await.unwrap();
        assert!(enrollment.active);
        assert_eq!(enrollment.embedding.unwrap(), unit(2));
    }

    #[tokio::test]
    async fn reenrollment_replaces_rather_than_appends() {
        let fx = fixture_with_reference(unit(0));
        let identity = Uuid::new_v4();
        let scope = Uuid::new_v4();

        engine_at(&fx, vec![unit(1)], ts(9, 0))
            .enroll(identity, scope, b"jpg")
            .await
            .unwrap();
        engine_at(&fx, vec![unit(2)], ts(9, 5))
            .enroll(identity, scope, b"jpg")
            .await
            .unwrap();

        let rows: Vec<Enrollment> = fx
            .store
            .0
            .enrollments
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.identity_id == identity)
            .cloned()
            .collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].embedding.as_ref().unwrap(), &unit(2));
    }

    // ── batch_recognize ──────────────────────────────────────────────────

    fn add_candidate(fx: &Fixture, identity_id: Uuid, embedding: Embedding) {
        let scope_id = fx
            .store
            .0
            .events
            .lock()
            .unwrap()
            .get(&fx.event_id)
            .unwrap()
            .scope_id;
        fx.store.0.enrollments.lock().unwrap().push(Enrollment {
            enrollment_id: Uuid::new_v4(),
            scope_id,
            identity_id,
            embedding: Some(embedding),
            active: true,
            enrolled_at: ts(9, 0),
            updated_at: ts(9, 0),
        });
    }

    #[tokio::test]
    async fn batch_marks_each_matched_identity_once() {
        let fx = fixture_with_reference(unit(0));
        let second = Uuid::new_v4();
        add_candidate(&fx, second, unit(1));

        let engine = engine_at(&fx, vec![unit(0), unit(1)], ts(10, 5));
        let outcome = engine.batch_recognize(fx.host_id, fx.event_id, b"jpg").await.unwrap();

        assert_eq!(outcome.faces_detected, 2);
        assert_eq!(outcome.matches.len(), 2);
        assert!(outcome.matches.iter().all(|m| m.newly_marked));
        assert_eq!(fx.store.0.records.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn batch_never_returns_one_identity_twice() {
        let fx = fixture_with_reference(unit(0));
        // Two detected faces that both resemble the same enrollee, one more
        // strongly than the other.
        let close = Embedding::new(vec![0.95, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let engine = engine_at(&fx, vec![close, unit(0)], ts(10, 5));
        let outcome = engine.batch_recognize(fx.host_id, fx.event_id, b"jpg").await.unwrap();

        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].identity_id, fx.identity_id);
        // The stronger hit is the one kept.
        assert!(outcome.matches[0].confidence > 0.99);
        assert_eq!(fx.store.0.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_tie_breaks_by_lowest_identity_id() {
        let fx = fixture_with_reference(unit(0));
        // Two enrollees with identical embeddings: an exact tie.
        let twin = Uuid::new_v4();
        add_candidate(&fx, twin, unit(0));
        let expected = fx.identity_id.min(twin);

        let engine = engine_at(&fx, vec![unit(0)], ts(10, 5));
        let outcome = engine.batch_recognize(fx.host_id, fx.event_id, b"jpg").await.unwrap();

        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].identity_id, expected);
    }

    #[tokio::test]
    async fn batch_is_host_only() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(0)], ts(10, 5));
        let err = engine
            .batch_recognize(Uuid::new_v4(), fx.event_id, b"jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, MarkError::NotHost));
        assert_eq!(err.class(), ErrorClass::Authorization);
    }

    #[tokio::test]
    async fn batch_with_no_faces_is_an_empty_outcome() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![], ts(10, 5));
        let outcome = engine.batch_recognize(fx.host_id, fx.event_id, b"jpg").await.unwrap();
        assert_eq!(outcome.faces_detected, 0);
        assert!(outcome.matches.is_empty());
    }

    #[tokio::test]
    async fn batch_reports_already_marked_identities() {
        let fx = fixture_with_reference(unit(0));

        let live = engine_at(&fx, vec![unit(0)], ts(10, 5));
        live.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap();

        let batch = engine_at(&fx, vec![unit(0)], ts(10, 30));
        let outcome = batch.batch_recognize(fx.host_id, fx.event_id, b"jpg").await.unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert!(!outcome.matches[0].newly_marked);
        assert_eq!(outcome.matches[0].timestamp, ts(10, 5));
        assert_eq!(fx.store.0.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn batch_skips_candidates_with_foreign_dimension() {
        let fx = fixture_with_reference(unit(0));
        let stale = Uuid::new_v4();
        add_candidate(&fx, stale, Embedding::new(vec![1.0, 0.0]));

        let engine = engine_at(&fx, vec![unit(0)], ts(10, 5));
        let outcome = engine.batch_recognize(fx.host_id, fx.event_id, b"jpg").await.unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].identity_id, fx.identity_id);
    }

    // ── sessions & overrides ─────────────────────────────────────────────

    #[tokio::test]
    async fn session_transitions_are_monotonic() {
        let fx = fixture_with_reference(unit(0));
        fx.store
            .0
            .events
            .lock()
            .unwrap()
            .get_mut(&fx.event_id)
            .unwrap()
            .status = EventStatus::Scheduled;
        let engine = engine_at(&fx, vec![], ts(9, 55));

        let started = engine.start_session(fx.host_id, fx.event_id).await.unwrap();
        assert_eq!(started.status, EventStatus::Ongoing);
        assert_eq!(started.started_at, Some(ts(9, 55)));

        // Starting twice is an invalid transition.
        let err = engine.start_session(fx.host_id, fx.event_id).await.unwrap_err();
        assert!(matches!(
            err,
            MarkError::Store(StoreError::InvalidTransition { .. })
        ));

        let ended = engine.end_session(fx.host_id, fx.event_id).await.unwrap();
        assert_eq!(ended.status, EventStatus::Completed);

        // Completed never reopens.
        let err = engine.start_session(fx.host_id, fx.event_id).await.unwrap_err();
        assert!(matches!(
            err,
            MarkError::Store(StoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn session_transitions_are_host_only() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![], ts(10, 0));
        let err = engine
            .end_session(Uuid::new_v4(), fx.event_id)
            .await
            .unwrap_err();
        assert!(matches!(err, MarkError::NotHost));
    }

    #[tokio::test]
    async fn manual_override_stamps_recorder() {
        let fx = fixture_with_reference(unit(0));
        let engine = engine_at(&fx, vec![unit(0)], ts(10, 5));
        engine.mark_live(fx.identity_id, fx.event_id, b"jpg").await.unwrap();
        let record_id = fx.store.0.records.lock().unwrap()[0].record_id;

        let overridden = engine
            .override_record(fx.host_id, fx.event_id, record_id, AttendanceStatus::Absent)
            .await
            .unwrap();
        assert_eq!(overridden.status, AttendanceStatus::Absent);
        assert!(overridden.manual);
        assert_eq!(overridden.recorded_by, Some(fx.host_id));

        let err = engine
            .override_record(Uuid::new_v4(), fx.event_id, record_id, AttendanceStatus::Late)
            .await
            .unwrap_err();
        assert!(matches!(err, MarkError::NotHost));
    }
}
