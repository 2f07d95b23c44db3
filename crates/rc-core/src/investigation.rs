//! Single-slot investigation tracker.
//!
//! The tracker is the only admission-control point: at most one
//! investigation may be `Running` per tracker. The slot is guarded by a
//! mutex so the check-and-transition in [`InvestigationTracker::accept`]
//! is atomic with respect to concurrent callers. Clones share the slot.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::IncidentDescriptor;

// ---------------------------------------------------------------------------
// InvestigationStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

impl InvestigationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the tracker slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestigationSnapshot {
    pub status: InvestigationStatus,
    /// Final report on `completed`, error text on `failed`, otherwise the
    /// previous investigation's result (or `None`).
    pub result: Option<String>,
    pub investigation_id: Option<Uuid>,
    pub incident: Option<IncidentDescriptor>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl InvestigationSnapshot {
    fn idle() -> Self {
        Self {
            status: InvestigationStatus::Idle,
            result: None,
            investigation_id: None,
            incident: None,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Returned by a successful [`InvestigationTracker::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub investigation_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// A new investigation was requested while one is running.
    #[error("investigation {running} is already running")]
    Conflict { running: Uuid },

    /// A completion or failure was reported with nothing running.
    #[error("no investigation is running (state is {state})")]
    NotRunning { state: InvestigationStatus },
}

// ---------------------------------------------------------------------------
// InvestigationTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InvestigationTracker {
    slot: Arc<Mutex<InvestigationSnapshot>>,
}

impl InvestigationTracker {
    /// Create a tracker in the `Idle` state.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(InvestigationSnapshot::idle())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, InvestigationSnapshot> {
        // A panic while holding the lock cannot leave the snapshot half
        // written: every mutation below assigns whole fields.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit `incident` unless an investigation is already running.
    pub fn accept(&self, incident: &IncidentDescriptor) -> Result<Admission, TrackerError> {
        let mut slot = self.lock();
        if slot.status == InvestigationStatus::Running {
            let running = slot.investigation_id.unwrap_or_default();
            tracing::warn!(running = %running, "rejecting investigation: one is already running");
            return Err(TrackerError::Conflict { running });
        }

        let admission = Admission {
            investigation_id: Uuid::new_v4(),
            accepted_at: Utc::now(),
        };
        let from = slot.status;
        slot.status = InvestigationStatus::Running;
        slot.investigation_id = Some(admission.investigation_id);
        slot.incident = Some(incident.clone());
        slot.started_at = Some(admission.accepted_at);
        slot.finished_at = None;
        tracing::info!(
            investigation_id = %admission.investigation_id,
            from = %from,
            to = %slot.status,
            "investigation accepted"
        );
        Ok(admission)
    }

    /// Transition `running -> completed`, storing the final report.
    pub fn report_completion(&self, result: impl Into<String>) -> Result<(), TrackerError> {
        self.finish(InvestigationStatus::Completed, result.into())
    }

    /// Transition `running -> failed`, storing the error text.
    pub fn report_failure(&self, error: impl Into<String>) -> Result<(), TrackerError> {
        self.finish(InvestigationStatus::Failed, error.into())
    }

    fn finish(&self, to: InvestigationStatus, text: String) -> Result<(), TrackerError> {
        let mut slot = self.lock();
        if slot.status != InvestigationStatus::Running {
            return Err(TrackerError::NotRunning { state: slot.status });
        }
        slot.status = to;
        slot.result = Some(text);
        slot.finished_at = Some(Utc::now());
        tracing::info!(
            investigation_id = ?slot.investigation_id,
            to = %to,
            "investigation finished"
        );
        Ok(())
    }

    /// Current state and stored result. Never blocks on a running pipeline.
    pub fn read(&self) -> InvestigationSnapshot {
        self.lock().clone()
    }

    pub fn status(&self) -> InvestigationStatus {
        self.lock().status
    }
}

impl Default for InvestigationTracker {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn incident() -> IncidentDescriptor {
        IncidentDescriptor::new("/aws/lambda/foo", "AWS/Lambda", "Errors", "FunctionName", "foo")
    }

    #[test]
    fn starts_idle_without_result() {
        let tracker = InvestigationTracker::new();
        let snap = tracker.read();
        assert_eq!(snap.status, InvestigationStatus::Idle);
        assert!(snap.result.is_none());
        assert!(snap.investigation_id.is_none());
    }

    #[test]
    fn accept_then_complete() {
        let tracker = InvestigationTracker::new();
        let admission = tracker.accept(&incident()).unwrap();
        assert_eq!(tracker.status(), InvestigationStatus::Running);

        tracker.report_completion("all good").unwrap();
        let snap = tracker.read();
        assert_eq!(snap.status, InvestigationStatus::Completed);
        assert_eq!(snap.result.as_deref(), Some("all good"));
        assert_eq!(snap.investigation_id, Some(admission.investigation_id));
        assert!(snap.finished_at.is_some());
    }

    #[test]
    fn second_accept_conflicts_without_state_change() {
        let tracker = InvestigationTracker::new();
        let first = tracker.accept(&incident()).unwrap();
        let before = tracker.read();

        let err = tracker.accept(&incident()).unwrap_err();
        assert_eq!(
            err,
            TrackerError::Conflict {
                running: first.investigation_id
            }
        );
        assert_eq!(tracker.read(), before);
    }

    #[test]
    fn terminal_state_allows_new_investigation() {
        let tracker = InvestigationTracker::new();
        tracker.accept(&incident()).unwrap();
        tracker.report_failure("oracle down").unwrap();
        assert_eq!(tracker.status(), InvestigationStatus::Failed);

        let next = tracker.accept(&incident()).unwrap();
        let snap = tracker.read();
        assert_eq!(snap.status, InvestigationStatus::Running);
        assert_eq!(snap.investigation_id, Some(next.investigation_id));
        assert!(snap.finished_at.is_none());
    }

    #[test]
    fn reporting_while_idle_is_rejected() {
        let tracker = InvestigationTracker::new();
        let err = tracker.report_completion("x").unwrap_err();
        assert_eq!(
            err,
            TrackerError::NotRunning {
                state: InvestigationStatus::Idle
            }
        );
        assert_eq!(tracker.status(), InvestigationStatus::Idle);
    }

    #[test]
    fn read_is_idempotent() {
        let tracker = InvestigationTracker::new();
        tracker.accept(&incident()).unwrap();
        tracker.report_completion("done").unwrap();
        assert_eq!(tracker.read(), tracker.read());
    }

    #[test]
    fn status_display_is_lowercase() {
        assert_eq!(InvestigationStatus::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_string(&InvestigationStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
