//! D-Bus interface for the Rollcall attendance daemon.
//!
//! Bus name: org.rollcall.Attendance1
//! Object path: /org/rollcall/Attendance1
//!
//! Domain rejections are serialized as JSON payloads alongside the success
//! outcomes (`kind: rejected` with the error class and message); D-Bus
//! errors are reserved for malformed arguments.

use serde::Serialize;
use uuid::Uuid;
use zbus::interface;

use rollcall_core::{AttendanceStatus, DecisionEngine, Event, MarkError};
use rollcall_store::SqliteStore;

use crate::worker::ExtractorHandle;

pub struct AttendanceService {
    engine: DecisionEngine<ExtractorHandle, SqliteStore>,
    db_path: String,
}

impl AttendanceService {
    pub fn new(engine: DecisionEngine<ExtractorHandle, SqliteStore>, db_path: String) -> Self {
        Self { engine, db_path }
    }
}

fn parse_uuid(value: &str, what: &str) -> zbus::fdo::Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("{what} is not a UUID: {value}")))
}

fn rejection(err: &MarkError) -> String {
    serde_json::json!({
        "kind": "rejected",
        "class": err.class().as_str(),
        "message": err.to_string(),
    })
    .to_string()
}

fn respond<T: Serialize>(result: Result<T, MarkError>) -> zbus::fdo::Result<String> {
    match result {
        Ok(value) => serde_json::to_string(&value)
            .map_err(|e| zbus::fdo::Error::Failed(format!("serializing response: {e}"))),
        Err(err) => Ok(rejection(&err)),
    }
}

fn event_json(event: &Event) -> String {
    serde_json::json!({
        "kind": "session",
        "event_id": event.event_id.to_string(),
        "status": event.status.as_str(),
        "started_at": event.started_at.map(|t| t.to_rfc3339()),
        "ended_at": event.ended_at.map(|t| t.to_rfc3339()),
    })
    .to_string()
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// 1:1 verification: mark the claimed identity's attendance from a
    /// live-captured image.
    async fn mark_live(
        &self,
        identity: &str,
        event: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        let identity = parse_uuid(identity, "identity")?;
        let event = parse_uuid(event, "event")?;
        tracing::info!(%identity, %event, bytes = image.len(), "mark_live requested");
        respond(self.engine.mark_live(identity, event, &image).await)
    }

    /// 1:N identification over one host-submitted image.
    async fn batch_recognize(
        &self,
        host: &str,
        event: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        let host = parse_uuid(host, "host")?;
        let event = parse_uuid(event, "event")?;
        tracing::info!(%host, %event, bytes = image.len(), "batch_recognize requested");
        respond(self.engine.batch_recognize(host, event, &image).await)
    }

    /// Enroll (or replace) a reference embedding for (identity, scope).
    async fn enroll(
        &self,
        identity: &str,
        scope: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        let identity = parse_uuid(identity, "identity")?;
        let scope = parse_uuid(scope, "scope")?;
        tracing::info!(%identity, %scope, bytes = image.len(), "enroll requested");

        match self.engine.enroll(identity, scope, &image).await {
            Ok(enrollment) => Ok(serde_json::json!({
                "kind": "enrolled",
                "enrollment_id": enrollment.enrollment_id.to_string(),
                "scope_id": enrollment.scope_id.to_string(),
                "identity_id": enrollment.identity_id.to_string(),
                "active": enrollment.active,
                "dim": enrollment.embedding.as_ref().map(|e| e.dim()),
            })
            .to_string()),
            Err(err) => Ok(rejection(&err)),
        }
    }

    /// Privacy erasure of an identity's biometric data. Idempotent.
    async fn erase(&self, identity: &str) -> zbus::fdo::Result<String> {
        let identity = parse_uuid(identity, "identity")?;
        match self.engine.erase(identity).await {
            Ok(cleared) => {
                Ok(serde_json::json!({ "kind": "erased", "enrollments": cleared }).to_string())
            }
            Err(err) => Ok(rejection(&err)),
        }
    }

    /// Host transition: Scheduled → Ongoing.
    async fn start_session(&self, host: &str, event: &str) -> zbus::fdo::Result<String> {
        let host = parse_uuid(host, "host")?;
        let event = parse_uuid(event, "event")?;
        match self.engine.start_session(host, event).await {
            Ok(updated) => Ok(event_json(&updated)),
            Err(err) => Ok(rejection(&err)),
        }
    }

    /// Host transition: Ongoing → Completed.
    async fn end_session(&self, host: &str, event: &str) -> zbus::fdo::Result<String> {
        let host = parse_uuid(host, "host")?;
        let event = parse_uuid(event, "event")?;
        match self.engine.end_session(host, event).await {
            Ok(updated) => Ok(event_json(&updated)),
            Err(err) => Ok(rejection(&err)),
        }
    }

    /// Host manual override of an existing record's status.
    async fn override_record(
        &self,
        host: &str,
        event: &str,
        record: &str,
        status: &str,
    ) -> zbus::fdo::Result<String> {
        let host = parse_uuid(host, "host")?;
        let event = parse_uuid(event, "event")?;
        let record = parse_uuid(record, "record")?;
        let status = AttendanceStatus::parse(status).ok_or_else(|| {
            zbus::fdo::Error::InvalidArgs(format!("unknown attendance status: {status}"))
        })?;
        respond(
            self.engine
                .override_record(host, event, record, status)
                .await,
        )
    }

    /// Attendance records of an event, ordered by mark time.
    async fn list_records(&self, event: &str) -> zbus::fdo::Result<String> {
        let event = parse_uuid(event, "event")?;
        respond(self.engine.list_records(event).await)
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let comparator = self.engine.comparator();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "db_path": self.db_path,
            "metric": comparator.metric().as_str(),
            "threshold": comparator.threshold(),
        })
        .to_string())
    }
}
