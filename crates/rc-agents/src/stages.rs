//! The four investigation stages and the plan that orders them.

use std::fmt;

use rc_core::types::IncidentDescriptor;
use serde::{Deserialize, Serialize};

use crate::roles::RoleKind;

// ---------------------------------------------------------------------------
// StageId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    EvidenceGathering,
    ConfigurationAudit,
    RootCauseAnalysis,
    RemediationPlanning,
}

impl StageId {
    /// Execution order.
    pub const ALL: [StageId; 4] = [
        StageId::EvidenceGathering,
        StageId::ConfigurationAudit,
        StageId::RootCauseAnalysis,
        StageId::RemediationPlanning,
    ];

    /// 1-based position in the execution order.
    pub fn number(self) -> usize {
        self as usize + 1
    }

    pub fn next(self) -> Option<StageId> {
        Self::ALL.get(self as usize + 1).copied()
    }

    pub fn first() -> StageId {
        StageId::EvidenceGathering
    }

    pub fn is_last(self) -> bool {
        self.next().is_none()
    }

    pub fn label(self) -> &'static str {
        match self {
            StageId::EvidenceGathering => "evidence gathering",
            StageId::ConfigurationAudit => "configuration audit",
            StageId::RootCauseAnalysis => "root cause analysis",
            StageId::RemediationPlanning => "remediation planning",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({})", self.number(), self.label())
    }
}

// ---------------------------------------------------------------------------
// StageDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub id: StageId,
    pub role: RoleKind,
    pub instructions: String,
    pub expected_output: String,
    /// Stages whose outputs this stage receives, in order.
    pub upstream: Vec<StageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("plan has no stages")]
    Empty,

    #[error("{0} appears more than once")]
    DuplicateStage(StageId),

    #[error("{stage} depends on {upstream}, which does not run before it")]
    ForwardReference { stage: StageId, upstream: StageId },
}

// ---------------------------------------------------------------------------
// StagePlan
// ---------------------------------------------------------------------------

/// An ordered, validated list of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    stages: Vec<StageDefinition>,
}

impl StagePlan {
    /// Validate that every upstream reference points at a stage scheduled
    /// earlier in the list.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self, PlanError> {
        if stages.is_empty() {
            return Err(PlanError::Empty);
        }
        for (i, stage) in stages.iter().enumerate() {
            let earlier = &stages[..i];
            if earlier.iter().any(|s| s.id == stage.id) {
                return Err(PlanError::DuplicateStage(stage.id));
            }
            if let Some(upstream) = stage
                .upstream
                .iter()
                .find(|up| !earlier.iter().any(|s| s.id == **up))
            {
                return Err(PlanError::ForwardReference {
                    stage: stage.id,
                    upstream: *upstream,
                });
            }
        }
        Ok(Self { stages })
    }

    /// The standard four-stage plan with the incident rendered into the
    /// first two stages' instructions.
    pub fn for_incident(incident: &IncidentDescriptor) -> Result<Self, PlanError> {
        Self::new(vec![
            StageDefinition {
                id: StageId::EvidenceGathering,
                role: RoleKind::Detective,
                instructions: format!(
                    "Analyze the CloudWatch Logs and Metrics for the following resources/time window:\n\
                     {}\n\n\
                     1. Fetch logs for the specified log group. Look for ERROR, EXCEPTION, or WARNING patterns.\n\
                     2. Fetch key metrics (like CPU, Memory, ErrorCount) if applicable.\n\
                     3. Summarize any anomalies found.",
                    incident.describe()
                ),
                expected_output: "A list of suspicious log lines and abnormal metric datapoints."
                    .into(),
                upstream: Vec::new(),
            },
            StageDefinition {
                id: StageId::ConfigurationAudit,
                role: RoleKind::Auditor,
                instructions: format!(
                    "Check CloudTrail for any 'Write' events or configuration changes in the last {} minutes.\n\
                     Focus on events related to the resources involved in the incident.",
                    incident.minutes_ago
                ),
                expected_output: "A list of recent configuration changes or API calls that might be relevant."
                    .into(),
                upstream: Vec::new(),
            },
            StageDefinition {
                id: StageId::RootCauseAnalysis,
                role: RoleKind::Sre,
                instructions: "Review the findings from the Log Analysis and the CloudTrail Audit.\n\
                               Correlate the timestamps of errors with configuration changes.\n\
                               Determine the most likely root cause of the incident.\n\
                               Provide a confidence score (0-100%) for your conclusion."
                    .into(),
                expected_output: "A detailed Root Cause Analysis report explaining what happened, why, and the evidence supporting it."
                    .into(),
                upstream: vec![StageId::EvidenceGathering, StageId::ConfigurationAudit],
            },
            StageDefinition {
                id: StageId::RemediationPlanning,
                role: RoleKind::Remediator,
                instructions: "Based on the identified root cause, propose a remediation plan.\n\
                               The plan should include:\n\
                               1. Immediate actions to mitigate impact.\n\
                               2. Long-term fixes to prevent recurrence.\n\
                               3. CLI commands or steps to execute the fix if possible."
                    .into(),
                expected_output: "A structured remediation plan with actionable steps.".into(),
                upstream: vec![StageId::RootCauseAnalysis],
            },
        ])
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn get(&self, id: StageId) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.id == id)
    }
}
