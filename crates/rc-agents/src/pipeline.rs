//! InvestigationPipeline -- runs the four stages strictly in order, feeding
//! each stage the verbatim outputs of its upstream stages.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rc_core::types::{IncidentDescriptor, IncidentError};
use rc_harness::tools::{EvidenceToolkit, MissingTool, ToolBelt, ToolId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::oracle::{OracleError, OracleRequest, ReasoningOracle};
use crate::roles::{InvestigatorRole, RoleKind};
use crate::stages::{PlanError, StageId, StagePlan};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("role {role} needs tool '{tool}', which the toolkit does not provide")]
    MissingCapability { role: RoleKind, tool: ToolId },

    #[error("no investigator is bound to role {0}")]
    MissingRole(RoleKind),

    #[error("invalid stage plan: {0}")]
    Plan(#[from] PlanError),

    #[error("invalid incident: {0}")]
    InvalidIncident(#[from] IncidentError),

    #[error("{stage} failed: {source}")]
    StageFailed {
        stage: StageId,
        #[source]
        source: OracleError,
    },

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl PipelineError {
    /// The stage that raised the error, if one did.
    pub fn stage(&self) -> Option<StageId> {
        match self {
            PipelineError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The message as raised, without the stage prefix. This is the text
    /// recorded as a failed investigation's result.
    pub fn raised_message(&self) -> String {
        match self {
            PipelineError::StageFailed { source, .. } => source.to_string(),
            other => other.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "stage")]
pub enum PipelineState {
    NotStarted,
    Running(StageId),
    Done(StageId),
    Completed,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::NotStarted => write!(f, "NotStarted"),
            PipelineState::Running(s) => write!(f, "Running({})", s.number()),
            PipelineState::Done(s) => write!(f, "Done({})", s.number()),
            PipelineState::Completed => write!(f, "Completed"),
            PipelineState::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event", content = "stage")]
pub enum PipelineEvent {
    Start(StageId),
    Finish(StageId),
    Fail,
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::Start(s) => write!(f, "Start({})", s.number()),
            PipelineEvent::Finish(s) => write!(f, "Finish({})", s.number()),
            PipelineEvent::Fail => write!(f, "Fail"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: cannot apply {event} in state {state}")]
pub struct TransitionError {
    pub state: PipelineState,
    pub event: PipelineEvent,
}

/// Enforces the stage sequence:
/// `NotStarted -> Running(1) -> Done(1) -> ... -> Running(4) -> Completed`,
/// with `Failed` reachable from any `Running` state.
#[derive(Debug, Clone)]
pub struct PipelineStateMachine {
    current: PipelineState,
    history: Vec<(PipelineState, PipelineEvent, PipelineState)>,
}

impl PipelineStateMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineState::NotStarted,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.current
    }

    pub fn history(&self) -> &[(PipelineState, PipelineEvent, PipelineState)] {
        &self.history
    }

    pub fn transition(&mut self, event: PipelineEvent) -> Result<PipelineState, TransitionError> {
        let next = match (self.current, event) {
            (PipelineState::NotStarted, PipelineEvent::Start(s)) if s == StageId::first() => {
                PipelineState::Running(s)
            }
            (PipelineState::Done(prev), PipelineEvent::Start(s)) if prev.next() == Some(s) => {
                PipelineState::Running(s)
            }
            (PipelineState::Running(r), PipelineEvent::Finish(s)) if r == s => {
                if s.is_last() {
                    PipelineState::Completed
                } else {
                    PipelineState::Done(s)
                }
            }
            (PipelineState::Running(_), PipelineEvent::Fail) => PipelineState::Failed,
            _ => {
                return Err(TransitionError {
                    state: self.current,
                    event,
                });
            }
        };

        let from = self.current;
        self.current = next;
        self.history.push((from, event, next));
        tracing::debug!(from = %from, event = %event, to = %next, "pipeline state transition");
        Ok(next)
    }
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub stage: StageId,
    pub role: RoleKind,
    pub output: String,
    pub duration_ms: u64,
}

/// Result of a completed pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    /// Exactly the last stage's output.
    pub result: String,
    pub stages: Vec<StageOutput>,
    pub total_duration_ms: u64,
}

// ---------------------------------------------------------------------------
// InvestigationPipeline
// ---------------------------------------------------------------------------

struct BoundRole {
    role: InvestigatorRole,
    belt: ToolBelt,
}

/// The four investigators bound to their tool belts and a reasoning oracle.
pub struct InvestigationPipeline {
    oracle: Arc<dyn ReasoningOracle>,
    crew: HashMap<RoleKind, BoundRole>,
}

impl InvestigationPipeline {
    /// Bind `roles` to `toolkit`. Fails if a role names a tool the toolkit
    /// does not provide or if a standard stage has no investigator.
    pub fn build(
        oracle: Arc<dyn ReasoningOracle>,
        toolkit: Arc<EvidenceToolkit>,
        roles: Vec<InvestigatorRole>,
    ) -> Result<Self, PipelineError> {
        let mut crew = HashMap::new();
        for role in roles {
            let belt = toolkit
                .belt(&role.tools)
                .map_err(|MissingTool(tool)| PipelineError::MissingCapability {
                    role: role.kind,
                    tool,
                })?;
            crew.insert(role.kind, BoundRole { role, belt });
        }
        if let Some(missing) = RoleKind::ALL.into_iter().find(|k| !crew.contains_key(k)) {
            return Err(PipelineError::MissingRole(missing));
        }
        Ok(Self { oracle, crew })
    }

    /// The standard four-investigator crew.
    pub fn standard(
        oracle: Arc<dyn ReasoningOracle>,
        toolkit: Arc<EvidenceToolkit>,
    ) -> Result<Self, PipelineError> {
        Self::build(oracle, toolkit, InvestigatorRole::standard_crew())
    }

    pub fn role(&self, kind: RoleKind) -> Option<&InvestigatorRole> {
        self.crew.get(&kind).map(|b| &b.role)
    }

    /// Run every stage in order. The first stage error aborts the rest.
    pub async fn run(&self, incident: &IncidentDescriptor) -> Result<PipelineReport, PipelineError> {
        incident.validate()?;
        let plan = StagePlan::for_incident(incident)?;
        let mut machine = PipelineStateMachine::new();
        let mut outputs: HashMap<StageId, String> = HashMap::new();
        let mut stages = Vec::with_capacity(plan.stages().len());
        let started = Instant::now();

        for stage in plan.stages() {
            let bound = self
                .crew
                .get(&stage.role)
                .ok_or(PipelineError::MissingRole(stage.role))?;
            machine.transition(PipelineEvent::Start(stage.id))?;

            // Plan validation guarantees every upstream output exists.
            let context = stage
                .upstream
                .iter()
                .filter_map(|id| outputs.get(id).map(String::as_str))
                .collect::<Vec<_>>()
                .join("\n\n");

            let request = OracleRequest {
                stage: stage.id,
                role: bound.role.clone(),
                instructions: stage.instructions.clone(),
                expected_output: stage.expected_output.clone(),
                context,
                tools: bound.belt.clone(),
            };

            info!(stage = %stage.id, role = %stage.role, "stage started");
            let stage_started = Instant::now();
            let result = self.oracle.generate(&request).await;
            let duration_ms = stage_started.elapsed().as_millis() as u64;

            match result {
                Ok(output) => {
                    machine.transition(PipelineEvent::Finish(stage.id))?;
                    info!(stage = %stage.id, role = %stage.role, duration_ms, "stage finished");
                    outputs.insert(stage.id, output.clone());
                    stages.push(StageOutput {
                        stage: stage.id,
                        role: stage.role,
                        output,
                        duration_ms,
                    });
                }
                Err(source) => {
                    machine.transition(PipelineEvent::Fail)?;
                    error!(
                        stage = %stage.id,
                        role = %stage.role,
                        duration_ms,
                        error = %source,
                        "stage failed, aborting investigation"
                    );
                    return Err(PipelineError::StageFailed {
                        stage: stage.id,
                        source,
                    });
                }
            }
        }

        let result = stages
            .last()
            .map(|s| s.output.clone())
            .unwrap_or_default();
        Ok(PipelineReport {
            result,
            stages,
            total_duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sequence_reaches_completed() {
        let mut sm = PipelineStateMachine::new();
        for stage in StageId::ALL {
            sm.transition(PipelineEvent::Start(stage)).unwrap();
            sm.transition(PipelineEvent::Finish(stage)).unwrap();
        }
        assert_eq!(sm.state(), PipelineState::Completed);
        assert_eq!(sm.history().len(), 8);
        assert_eq!(
            sm.history()[6],
            (
                PipelineState::Done(StageId::RootCauseAnalysis),
                PipelineEvent::Start(StageId::RemediationPlanning),
                PipelineState::Running(StageId::RemediationPlanning),
            )
        );
    }

    #[test]
    fn stages_cannot_be_skipped_or_reordered() {
        let mut sm = PipelineStateMachine::new();
        assert!(sm
            .transition(PipelineEvent::Start(StageId::ConfigurationAudit))
            .is_err());
        sm.transition(PipelineEvent::Start(StageId::EvidenceGathering))
            .unwrap();
        assert!(sm
            .transition(PipelineEvent::Finish(StageId::ConfigurationAudit))
            .is_err());
        sm.transition(PipelineEvent::Finish(StageId::EvidenceGathering))
            .unwrap();
        let err = sm
            .transition(PipelineEvent::Start(StageId::RootCauseAnalysis))
            .unwrap_err();
        assert_eq!(err.state, PipelineState::Done(StageId::EvidenceGathering));
        assert_eq!(
            err.to_string(),
            "invalid transition: cannot apply Start(3) in state Done(1)"
        );
    }

    #[test]
    fn fail_only_from_running() {
        let mut sm = PipelineStateMachine::new();
        assert!(sm.transition(PipelineEvent::Fail).is_err());
        sm.transition(PipelineEvent::Start(StageId::EvidenceGathering))
            .unwrap();
        assert_eq!(
            sm.transition(PipelineEvent::Fail).unwrap(),
            PipelineState::Failed
        );
        assert!(sm.transition(PipelineEvent::Fail).is_err());
        assert!(sm
            .transition(PipelineEvent::Start(StageId::EvidenceGathering))
            .is_err());
    }
}
