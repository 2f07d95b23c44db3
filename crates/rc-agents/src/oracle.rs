//! The reasoning capability each stage calls, and its LLM-backed
//! implementation with a tool-calling loop.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use rc_harness::tools::{ToolBelt, ToolCallRequest};
use rc_intelligence::llm::{
    LlmConfig, LlmError, LlmMessage, LlmProvider, LlmTool, LlmToolCall,
};

use crate::roles::InvestigatorRole;
use crate::stages::StageId;

// ---------------------------------------------------------------------------
// Request / error
// ---------------------------------------------------------------------------

/// Everything a stage hands to the oracle.
#[derive(Debug, Clone)]
pub struct OracleRequest {
    pub stage: StageId,
    pub role: InvestigatorRole,
    pub instructions: String,
    pub expected_output: String,
    /// Upstream stage outputs, verbatim. Empty for stages without upstream.
    pub context: String,
    pub tools: ToolBelt,
}

impl OracleRequest {
    /// The user-turn prompt: instructions, expected output and context.
    pub fn prompt(&self) -> String {
        let mut prompt = format!(
            "{}\n\nExpected output: {}",
            self.instructions, self.expected_output
        );
        if !self.context.is_empty() {
            prompt.push_str("\n\nFindings from earlier stages:\n");
            prompt.push_str(&self.context);
        }
        prompt
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("model returned an empty answer")]
    EmptyResponse,

    #[error("model was still calling tools after {0} rounds")]
    ToolRoundsExhausted(u32),
}

// ---------------------------------------------------------------------------
// ReasoningOracle
// ---------------------------------------------------------------------------

/// Produces a stage's finding from its persona, instructions and context.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn generate(&self, request: &OracleRequest) -> Result<String, OracleError>;
}

// ---------------------------------------------------------------------------
// LlmOracle
// ---------------------------------------------------------------------------

pub struct LlmOracle {
    provider: Arc<dyn LlmProvider>,
    config: LlmConfig,
    max_tool_rounds: u32,
}

impl LlmOracle {
    pub fn new(provider: Arc<dyn LlmProvider>, config: LlmConfig, max_tool_rounds: u32) -> Self {
        Self {
            provider,
            config,
            max_tool_rounds,
        }
    }
}

fn llm_tools(belt: &ToolBelt) -> Vec<LlmTool> {
    belt.definitions()
        .into_iter()
        .map(|d| LlmTool {
            name: d.name,
            description: format!("{}: {}", d.title, d.description),
            parameters: d.input_schema,
        })
        .collect()
}

#[async_trait]
impl ReasoningOracle for LlmOracle {
    async fn generate(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let tools = llm_tools(&request.tools);
        let mut messages = vec![
            LlmMessage::system(request.role.persona()),
            LlmMessage::user(request.prompt()),
        ];

        let mut round = 0u32;
        loop {
            let response = self
                .provider
                .complete(&messages, &tools, &self.config)
                .await?;
            debug!(
                provider = self.provider.name(),
                stage = %request.stage,
                input_tokens = response.input_tokens,
                output_tokens = response.output_tokens,
                tool_calls = response.tool_calls.len(),
                "model turn"
            );

            if response.tool_calls.is_empty() {
                let answer = response.content.trim();
                if answer.is_empty() {
                    return Err(OracleError::EmptyResponse);
                }
                return Ok(answer.to_string());
            }

            if round >= self.max_tool_rounds {
                warn!(stage = %request.stage, rounds = round, "tool round limit reached");
                return Err(OracleError::ToolRoundsExhausted(self.max_tool_rounds));
            }
            round += 1;

            let calls: Vec<LlmToolCall> = response.tool_calls;
            messages.push(LlmMessage::assistant_tool_calls(
                response.content,
                calls.clone(),
            ));
            for call in &calls {
                let result = request
                    .tools
                    .call(&ToolCallRequest {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;
                info!(
                    stage = %request.stage,
                    role = %request.role.kind,
                    tool = %call.name,
                    is_error = result.is_error,
                    "tool result returned to model"
                );
                messages.push(LlmMessage::tool_result(call, result.text, result.is_error));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
