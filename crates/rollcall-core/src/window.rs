//! Attendance window evaluation.
//!
//! A pure function of `(now, start, duration, grace)` — no wall-clock access.
//! Production code injects [`SystemClock`]; tests inject a fixed instant.

use chrono::{DateTime, Duration, Utc};

use crate::model::AttendanceStatus;

/// Where "now" falls relative to an event's temporal window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Strictly before the scheduled start. Marks are rejected.
    NotStarted,
    /// Within `[start, start + duration]`. Marks are accepted as Present.
    Active,
    /// Within `(start + duration, start + duration + grace]`. Marks are
    /// accepted as Late.
    Grace,
    /// Past the grace period. Marks are rejected.
    Expired,
}

impl WindowState {
    pub fn accepts_marks(self) -> bool {
        matches!(self, WindowState::Active | WindowState::Grace)
    }

    /// The status an accepted mark receives in this window, if any.
    pub fn mark_status(self) -> Option<AttendanceStatus> {
        match self {
            WindowState::Active => Some(AttendanceStatus::Present),
            WindowState::Grace => Some(AttendanceStatus::Late),
            WindowState::NotStarted | WindowState::Expired => None,
        }
    }
}

/// Classify `now` against an event window.
///
/// `now == start` counts as Active; `now == start + duration` still yields
/// Present; `now == start + duration + grace` still yields Late.
pub fn classify_window(
    now: DateTime<Utc>,
    start: DateTime<Utc>,
    duration: Duration,
    grace: Duration,
) -> WindowState {
    if now < start {
        return WindowState::NotStarted;
    }
    let end = start + duration;
    if now <= end {
        return WindowState::Active;
    }
    if now <= end + grace {
        return WindowState::Grace;
    }
    WindowState::Expired
}

/// Injectable time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock [`Clock`] used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
