//! Background execution of admitted investigations.

use std::sync::Arc;

use rc_core::investigation::{Admission, InvestigationTracker, TrackerError};
use rc_core::types::{IncidentDescriptor, IncidentError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::pipeline::InvestigationPipeline;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid incident: {0}")]
    Invalid(#[from] IncidentError),

    #[error("investigation {running} is already running")]
    Conflict { running: Uuid },

    #[error(transparent)]
    Tracker(TrackerError),
}

impl From<TrackerError> for SubmitError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Conflict { running } => SubmitError::Conflict { running },
            other => SubmitError::Tracker(other),
        }
    }
}

/// An admitted investigation running in the background.
#[derive(Debug)]
pub struct Submission {
    pub admission: Admission,
    /// Resolves once the tracker holds the terminal state.
    pub handle: JoinHandle<()>,
}

/// Owns the pipeline and the tracker handle; hands each admitted
/// investigation to a tokio task.
#[derive(Clone)]
pub struct InvestigationRunner {
    pipeline: Arc<InvestigationPipeline>,
    tracker: InvestigationTracker,
}

impl InvestigationRunner {
    pub fn new(pipeline: Arc<InvestigationPipeline>, tracker: InvestigationTracker) -> Self {
        Self { pipeline, tracker }
    }

    pub fn tracker(&self) -> &InvestigationTracker {
        &self.tracker
    }

    /// Validate, admit and start `incident`. Returns as soon as the
    /// investigation is running; a second submission while one runs is
    /// rejected, not queued.
    pub fn submit(&self, incident: IncidentDescriptor) -> Result<Submission, SubmitError> {
        incident.validate()?;
        let admission = self.tracker.accept(&incident)?;
        let investigation_id = admission.investigation_id;

        let pipeline = Arc::clone(&self.pipeline);
        let tracker = self.tracker.clone();
        let span = info_span!("investigation", %investigation_id);

        let handle = tokio::spawn(
            async move {
                info!(log_group = %incident.log_group_name, "investigation started");
                // Run the pipeline in its own task so a panic still lands
                // the tracker in a terminal state.
                let run = tokio::spawn(
                    async move { pipeline.run(&incident).await }.in_current_span(),
                )
                .await;

                let reported = match run {
                    Ok(Ok(report)) => {
                        info!(
                            duration_ms = report.total_duration_ms,
                            "investigation completed"
                        );
                        tracker.report_completion(report.result)
                    }
                    Ok(Err(e)) => {
                        let stage = e.stage().map(|s| s.to_string());
                        error!(error = %e, stage = ?stage, "investigation failed");
                        tracker.report_failure(e.raised_message())
                    }
                    Err(join_err) => {
                        error!(error = %join_err, "investigation task aborted");
                        tracker.report_failure(format!("investigation aborted: {join_err}"))
                    }
                };
                if let Err(e) = reported {
                    warn!(error = %e, "could not record investigation outcome");
                }
            }
            .instrument(span),
        );

        Ok(Submission { admission, handle })
    }
}
