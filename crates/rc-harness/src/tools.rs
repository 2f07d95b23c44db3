//! Evidence tools: the provider operations exposed to the reasoning oracle
//! with declared input schemas and text results.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::evidence::EvidenceProviders;
use crate::schema::{FieldSpec, SchemaValidationError, ToolSchema};

/// Lookback applied when a tool call omits `minutes_ago`.
pub const DEFAULT_TOOL_LOOKBACK_MINUTES: i64 = 30;

// ---------------------------------------------------------------------------
// ToolId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolId {
    CloudwatchLogs,
    CloudwatchMetrics,
    CloudtrailLookup,
}

impl ToolId {
    pub const ALL: [ToolId; 3] = [
        ToolId::CloudwatchLogs,
        ToolId::CloudwatchMetrics,
        ToolId::CloudtrailLookup,
    ];

    /// Function name offered to the model.
    pub fn as_str(self) -> &'static str {
        match self {
            ToolId::CloudwatchLogs => "cloudwatch_logs",
            ToolId::CloudwatchMetrics => "cloudwatch_metrics",
            ToolId::CloudtrailLookup => "cloudtrail_lookup",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.as_str() == name)
    }

    pub fn title(self) -> &'static str {
        match self {
            ToolId::CloudwatchLogs => "CloudWatch Logs Fetcher",
            ToolId::CloudwatchMetrics => "CloudWatch Metrics Fetcher",
            ToolId::CloudtrailLookup => "CloudTrail Event Lookup",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolId::CloudwatchLogs => {
                "Fetches recent log events from a CloudWatch log group, oldest first."
            }
            ToolId::CloudwatchMetrics => {
                "Fetches Average and Maximum datapoints for a CloudWatch metric at a 5 minute period."
            }
            ToolId::CloudtrailLookup => {
                "Looks up recent CloudTrail management events (configuration changes, deployments)."
            }
        }
    }

    pub fn schema(self) -> ToolSchema {
        let minutes = FieldSpec::integer(
            "minutes_ago",
            "How many minutes back to search",
            DEFAULT_TOOL_LOOKBACK_MINUTES,
            1,
        );
        match self {
            ToolId::CloudwatchLogs => ToolSchema::new(vec![
                FieldSpec::string("log_group_name", "CloudWatch log group name"),
                minutes,
            ]),
            ToolId::CloudwatchMetrics => ToolSchema::new(vec![
                FieldSpec::string("namespace", "Metric namespace, e.g. AWS/Lambda"),
                FieldSpec::string("metric_name", "Metric name, e.g. Errors"),
                FieldSpec::string("dimension_name", "Dimension name, e.g. FunctionName"),
                FieldSpec::string("dimension_value", "Dimension value"),
                minutes,
            ]),
            ToolId::CloudtrailLookup => ToolSchema::new(vec![minutes]),
        }
    }

    pub fn definition(self) -> ToolDefinition {
        ToolDefinition {
            name: self.as_str().to_string(),
            title: self.title().to_string(),
            description: self.description().to_string(),
            input_schema: self.schema().to_json_schema(),
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub text: String,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            is_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// EvidenceToolkit
// ---------------------------------------------------------------------------

/// A role asked for a tool the toolkit does not offer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tool '{0}' is not provided by the toolkit")]
pub struct MissingTool(pub ToolId);

/// The set of evidence tools available to an investigation.
pub struct EvidenceToolkit {
    providers: EvidenceProviders,
    enabled: Vec<ToolId>,
}

impl EvidenceToolkit {
    /// A toolkit offering every evidence tool.
    pub fn new(providers: EvidenceProviders) -> Self {
        Self::with_tools(providers, &ToolId::ALL)
    }

    pub fn with_tools(providers: EvidenceProviders, tools: &[ToolId]) -> Self {
        let mut enabled = Vec::with_capacity(tools.len());
        for id in tools {
            if !enabled.contains(id) {
                enabled.push(*id);
            }
        }
        Self { providers, enabled }
    }

    pub fn provides(&self, id: ToolId) -> bool {
        self.enabled.contains(&id)
    }

    pub fn tools(&self) -> &[ToolId] {
        &self.enabled
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.enabled.iter().map(|id| id.definition()).collect()
    }

    /// Validate `arguments`, run the provider and serialize its records as
    /// a JSON array. Provider failures arrive as error records, so only
    /// argument validation can fail here.
    pub async fn invoke(&self, id: ToolId, arguments: &Value) -> Result<String, SchemaValidationError> {
        let args = id.schema().validate(arguments)?;
        let minutes = args.minutes("minutes_ago");
        let records = match id {
            ToolId::CloudwatchLogs => {
                self.providers
                    .fetch_recent_logs(args.str("log_group_name"), minutes)
                    .await
            }
            ToolId::CloudwatchMetrics => {
                self.providers
                    .fetch_metrics(
                        args.str("namespace"),
                        args.str("metric_name"),
                        args.str("dimension_name"),
                        args.str("dimension_value"),
                        minutes,
                    )
                    .await
            }
            ToolId::CloudtrailLookup => self.providers.lookup_events(minutes).await,
        };
        // A Vec of JSON maps always serializes.
        Ok(serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string()))
    }

    /// The subset of tools one role may call. Fails if any is not provided.
    pub fn belt(self: &Arc<Self>, tools: &[ToolId]) -> Result<ToolBelt, MissingTool> {
        if let Some(missing) = tools.iter().find(|id| !self.provides(**id)) {
            return Err(MissingTool(*missing));
        }
        Ok(ToolBelt {
            toolkit: Arc::clone(self),
            tools: tools.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// ToolBelt
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ToolBelt {
    toolkit: Arc<EvidenceToolkit>,
    tools: Vec<ToolId>,
}

impl fmt::Debug for ToolBelt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolBelt").field("tools", &self.tools).finish()
    }
}

impl ToolBelt {
    pub fn tools(&self) -> &[ToolId] {
        &self.tools
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|id| id.definition()).collect()
    }

    /// Execute one model tool call. Never fails: unknown tools and invalid
    /// arguments come back as error results the model can react to.
    pub async fn call(&self, request: &ToolCallRequest) -> ToolCallResult {
        let Some(id) = ToolId::from_name(&request.name).filter(|id| self.tools.contains(id)) else {
            warn!(tool = %request.name, "model requested a tool outside its belt");
            return ToolCallResult::error(format!(
                "tool '{}' is not available; available tools: {}",
                request.name,
                self.tools
                    .iter()
                    .map(|t| t.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        };

        debug!(tool = %id, arguments = %request.arguments, "invoking tool");
        let started = Instant::now();
        let result = self.toolkit.invoke(id, &request.arguments).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(text) => {
                info!(tool = %id, duration_ms, "tool call finished");
                ToolCallResult::text(text)
            }
            Err(e) => {
                warn!(tool = %id, duration_ms, error = %e, "tool arguments rejected");
                ToolCallResult::error(format!("invalid arguments for {id}: {e}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
