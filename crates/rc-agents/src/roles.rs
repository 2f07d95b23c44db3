use std::fmt;

use rc_harness::tools::ToolId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RoleKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Detective,
    Auditor,
    Sre,
    Remediator,
}

impl RoleKind {
    pub const ALL: [RoleKind; 4] = [
        RoleKind::Detective,
        RoleKind::Auditor,
        RoleKind::Sre,
        RoleKind::Remediator,
    ];
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RoleKind::Detective => "detective",
            RoleKind::Auditor => "auditor",
            RoleKind::Sre => "sre",
            RoleKind::Remediator => "remediator",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// InvestigatorRole
// ---------------------------------------------------------------------------

/// A persona bound to a pipeline stage, with the evidence tools it may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestigatorRole {
    pub kind: RoleKind,
    pub name: String,
    pub goal: String,
    pub backstory: String,
    pub tools: Vec<ToolId>,
    /// Advisory: the role may hand questions to other investigators.
    pub allow_delegation: bool,
    /// Advisory: the role should build on what it already retrieved.
    pub memory: bool,
}

impl InvestigatorRole {
    pub fn detective() -> Self {
        Self {
            kind: RoleKind::Detective,
            name: "Cloud Detective".into(),
            goal: "Investigate anomalies in logs and metrics to find evidence of failure.".into(),
            backstory: "You are an expert Cloud Log Analyst. Your job is to sift through \
                        mountains of logs and metrics to find the needle in the haystack that \
                        explains a failure."
                .into(),
            tools: vec![ToolId::CloudwatchLogs, ToolId::CloudwatchMetrics],
            allow_delegation: false,
            memory: true,
        }
    }

    pub fn auditor() -> Self {
        Self {
            kind: RoleKind::Auditor,
            name: "Cloud Auditor".into(),
            goal: "Identify configuration changes or security events that could have caused \
                   the issue."
                .into(),
            backstory: "You are a meticulous Cloud Auditor. You track every change in the \
                        environment. You believe that \"it was working yesterday, so someone \
                        must have changed something\"."
                .into(),
            tools: vec![ToolId::CloudtrailLookup],
            allow_delegation: false,
            memory: true,
        }
    }

    pub fn sre() -> Self {
        Self {
            kind: RoleKind::Sre,
            name: "Site Reliability Engineer (SRE)".into(),
            goal: "Synthesize findings from the Detective and Auditor to determine the Root \
                   Cause."
                .into(),
            backstory: "You are a seasoned SRE. You take raw data from investigations and \
                        correlate it to form a coherent theory of what went wrong and why."
                .into(),
            tools: Vec::new(),
            allow_delegation: true,
            memory: true,
        }
    }

    pub fn remediation_specialist() -> Self {
        Self {
            kind: RoleKind::Remediator,
            name: "Remediation Specialist".into(),
            goal: "Propose a safe and effective plan to fix the root cause.".into(),
            backstory: "You are a cautious engineer who focuses on fixing systems without \
                        causing further damage. You provide step-by-step remediation plans."
                .into(),
            tools: Vec::new(),
            allow_delegation: false,
            memory: true,
        }
    }

    pub fn for_kind(kind: RoleKind) -> Self {
        match kind {
            RoleKind::Detective => Self::detective(),
            RoleKind::Auditor => Self::auditor(),
            RoleKind::Sre => Self::sre(),
            RoleKind::Remediator => Self::remediation_specialist(),
        }
    }

    /// The four standard investigators, in stage order.
    pub fn standard_crew() -> Vec<Self> {
        RoleKind::ALL.into_iter().map(Self::for_kind).collect()
    }

    /// System prompt for the reasoning oracle.
    pub fn persona(&self) -> String {
        let mut prompt = format!(
            "You are {}.\nGoal: {}\nBackstory: {}",
            self.name, self.goal, self.backstory
        );
        if self.memory {
            prompt.push_str(
                "\nKeep track of the evidence you have already retrieved and build on it \
                 instead of fetching it again.",
            );
        }
        if self.allow_delegation {
            prompt.push_str(
                "\nIf the findings you were given are insufficient, say which investigator \
                 should look further and what they should check.",
            );
        }
        if self.tools.is_empty() {
            prompt.push_str("\nYou have no tools; work only from the context you are given.");
        }
        prompt
    }
}
