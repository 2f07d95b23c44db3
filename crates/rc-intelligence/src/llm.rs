//! LLM provider abstraction layer.
//!
//! One async trait for chat completions with tool calling, implemented for
//! the Anthropic Messages API, OpenAI Chat Completions (and compatible local
//! servers) and Gemini `generateContent`, along with a mock provider for
//! testing.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use rc_core::config::{LlmProviderKind, LlmSettings};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when interacting with an LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// An HTTP-level error (connection failure, DNS, TLS, etc.).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The API returned a non-success status with a message.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse the API response body.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The API indicated rate limiting (HTTP 429).
    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// Required settings (usually the API key) are missing.
    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::HttpError(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Core data types
// ---------------------------------------------------------------------------

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for LlmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmRole::System => write!(f, "system"),
            LlmRole::User => write!(f, "user"),
            LlmRole::Assistant => write!(f, "assistant"),
            LlmRole::Tool => write!(f, "tool"),
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmTool {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// A function call emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
    /// Calls requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<LlmToolCall>,
    /// For `Tool` messages: the call this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For `Tool` messages: the function that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl LlmMessage {
    pub fn new(role: LlmRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            is_error: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LlmRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(LlmRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(LlmRole::Assistant, content)
    }

    /// An assistant turn that requested tool calls.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<LlmToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::assistant(content)
        }
    }

    /// The result of executing `call`.
    pub fn tool_result(call: &LlmToolCall, content: impl Into<String>, is_error: bool) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            name: Some(call.name.clone()),
            is_error,
            ..Self::new(LlmRole::Tool, content)
        }
    }
}

/// Configuration for an LLM completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-pro".to_string(),
            max_tokens: 4096,
            temperature: 0.5,
            system_prompt: None,
        }
    }
}

impl LlmConfig {
    pub fn from_settings(settings: &LlmSettings) -> Self {
        Self {
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            system_prompt: None,
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<LlmToolCall>,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub finish_reason: String,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            model: "mock".to_string(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: "stop".to_string(),
        }
    }

    pub fn with_tool_calls(calls: Vec<LlmToolCall>) -> Self {
        Self {
            tool_calls: calls,
            finish_reason: "tool_calls".to_string(),
            ..Self::text("")
        }
    }
}

// ---------------------------------------------------------------------------
// LlmProvider trait
// ---------------------------------------------------------------------------

/// Async trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Send a completion request and return the full response. `tools` may
    /// be empty, in which case no tool definitions are sent.
    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[LlmTool],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError>;
}

/// Build the provider selected in `settings`.
///
/// `api_key` is the resolved secret; it is required for every hosted
/// provider and optional for `local`.
pub fn build_provider(
    settings: &LlmSettings,
    api_key: Option<String>,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let base_url = settings.resolved_base_url().trim_end_matches('/').to_string();
    let require_key = |key: Option<String>| {
        key.ok_or_else(|| {
            LlmError::NotConfigured(format!(
                "environment variable {} is not set",
                settings.resolved_api_key_env()
            ))
        })
    };

    let provider: Arc<dyn LlmProvider> = match settings.provider {
        LlmProviderKind::Anthropic => Arc::new(
            AnthropicProvider::new(require_key(api_key)?)
                .with_base_url(base_url)
                .with_timeout(timeout),
        ),
        LlmProviderKind::Openai => Arc::new(
            OpenAiProvider::new(Some(require_key(api_key)?))
                .with_base_url(base_url)
                .with_timeout(timeout),
        ),
        LlmProviderKind::Local => Arc::new(
            OpenAiProvider::new(api_key)
                .with_base_url(base_url)
                .with_timeout(timeout)
                .named("local"),
        ),
        LlmProviderKind::Gemini => Arc::new(
            GeminiProvider::new(require_key(api_key)?)
                .with_base_url(base_url)
                .with_timeout(timeout),
        ),
    };
    Ok(provider)
}

fn http_client(timeout: Option<Duration>) -> reqwest::Client {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().unwrap_or_else(|_| reqwest::Client::new())
}

/// Map 429 and other non-success statuses to [`LlmError`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status().as_u16();

    if status == 429 {
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        return Err(LlmError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if !resp.status().is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(LlmError::ApiError {
            status,
            message: text,
        });
    }

    Ok(resp)
}

/// Tool output is JSON text; providers that want structured results get the
/// parsed value, anything else is passed as a string.
fn tool_output_value(content: &str) -> Value {
    serde_json::from_str(content).unwrap_or_else(|_| Value::String(content.to_string()))
}

// ---------------------------------------------------------------------------
// AnthropicProvider
// ---------------------------------------------------------------------------

/// LLM provider for the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    ///
    /// `api_key` is the Anthropic API key (x-api-key header).
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(None),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    /// Override the base URL (useful for testing with a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(Some(timeout));
        self
    }

    /// Build the JSON request body for the Anthropic Messages API.
    pub fn build_request_body(
        messages: &[LlmMessage],
        tools: &[LlmTool],
        config: &LlmConfig,
    ) -> Value {
        // System prompt goes in the top-level `system` field, and
        // consecutive tool results share one user turn.
        let mut system_text: Option<String> = config.system_prompt.clone();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in messages {
            match msg.role {
                LlmRole::System => match system_text {
                    Some(ref mut s) => {
                        s.push('\n');
                        s.push_str(&msg.content);
                    }
                    None => system_text = Some(msg.content.clone()),
                },
                LlmRole::User => api_messages.push(json!({
                    "role": "user",
                    "content": msg.content,
                })),
                LlmRole::Assistant => {
                    let mut blocks = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    api_messages.push(json!({"role": "assistant", "content": blocks}));
                }
                LlmRole::Tool => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id,
                        "content": msg.content,
                        "is_error": msg.is_error,
                    });
                    let follows_results = api_messages.last().is_some_and(|last| {
                        last["role"] == "user"
                            && last["content"]
                                .as_array()
                                .is_some_and(|c| c.iter().all(|b| b["type"] == "tool_result"))
                    });
                    let open_turn = if follows_results {
                        api_messages
                            .last_mut()
                            .and_then(|last| last["content"].as_array_mut())
                    } else {
                        None
                    };
                    match open_turn {
                        Some(blocks) => blocks.push(block),
                        None => api_messages.push(json!({"role": "user", "content": [block]})),
                    }
                }
            }
        }

        let mut body = json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": api_messages,
        });

        if let Some(system) = system_text {
            body["system"] = Value::String(system);
        }
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
        }

        body
    }
}

/// Deserialize helpers for Anthropic API response.
#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[LlmTool],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, tools, config);
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let api_resp: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = api_resp
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let tool_calls = api_resp
            .content
            .into_iter()
            .filter(|block| block.kind == "tool_use")
            .map(|block| LlmToolCall {
                id: block.id.unwrap_or_default(),
                name: block.name.unwrap_or_default(),
                arguments: block.input.unwrap_or(Value::Null),
            })
            .collect();

        Ok(LlmResponse {
            content,
            tool_calls,
            model: api_resp.model,
            input_tokens: api_resp.usage.input_tokens,
            output_tokens: api_resp.usage.output_tokens,
            finish_reason: api_resp.stop_reason.unwrap_or_else(|| "unknown".into()),
        })
    }
}

// ---------------------------------------------------------------------------
// OpenAiProvider
// ---------------------------------------------------------------------------

/// LLM provider for the OpenAI Chat Completions API.
///
/// Also serves local inference servers that expose an OpenAI-compatible
/// `/v1/chat/completions` endpoint (Ollama, llama.cpp, vllm); for those the
/// API key is optional.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    name: &'static str,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: http_client(None),
            api_key: api_key.filter(|k| !k.is_empty() && k != "none"),
            base_url: "https://api.openai.com".to_string(),
            name: "openai",
        }
    }

    /// Override the base URL (useful for testing or local servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(Some(timeout));
        self
    }

    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Build the JSON request body for the OpenAI Chat Completions API.
    pub fn build_request_body(
        messages: &[LlmMessage],
        tools: &[LlmTool],
        config: &LlmConfig,
    ) -> Value {
        // OpenAI format: system messages go inline in the messages array.
        let mut api_messages: Vec<Value> = Vec::new();

        if let Some(ref system) = config.system_prompt {
            api_messages.push(json!({
                "role": "system",
                "content": system,
            }));
        }

        for msg in messages {
            let value = match msg.role {
                LlmRole::Tool => json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id,
                    "content": msg.content,
                }),
                LlmRole::Assistant if !msg.tool_calls.is_empty() => {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                    let content = if msg.content.is_empty() {
                        Value::Null
                    } else {
                        Value::String(msg.content.clone())
                    };
                    json!({"role": "assistant", "content": content, "tool_calls": calls})
                }
                role => json!({
                    "role": role.to_string(),
                    "content": msg.content,
                }),
            };
            api_messages.push(value);
        }

        let mut body = json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": api_messages,
        });
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
        }
        body
    }
}

/// Deserialize helpers for OpenAI API response.
#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    model: Option<String>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageResp,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessageResp {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCall>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[LlmTool],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, tools, config);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_connect() {
                LlmError::HttpError(format!("cannot connect to {}: {}", self.base_url, e))
            } else {
                LlmError::from(e)
            }
        })?;
        let resp = check_status(resp).await?;

        let api_resp: OpenAiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let usage = api_resp.usage.as_ref();
        let input_tokens = usage.and_then(|u| u.prompt_tokens).unwrap_or(0);
        let output_tokens = usage.and_then(|u| u.completion_tokens).unwrap_or(0);
        let choice = api_resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("no choices in response".into()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| LlmToolCall {
                id: call.id,
                name: call.function.name,
                // Malformed argument JSON is passed on as a string so the
                // schema check can report it back to the model.
                arguments: serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments)),
            })
            .collect();

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            model: api_resp.model.unwrap_or_else(|| config.model.clone()),
            input_tokens,
            output_tokens,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".into()),
        })
    }
}

// ---------------------------------------------------------------------------
// GeminiProvider
// ---------------------------------------------------------------------------

/// LLM provider for the Gemini `generateContent` API.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: http_client(None),
            api_key: api_key.into(),
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(Some(timeout));
        self
    }

    /// Build the JSON request body for `models/{model}:generateContent`.
    pub fn build_request_body(
        messages: &[LlmMessage],
        tools: &[LlmTool],
        config: &LlmConfig,
    ) -> Value {
        let mut system_parts: Vec<Value> = config
            .system_prompt
            .iter()
            .map(|s| json!({"text": s}))
            .collect();
        let mut contents: Vec<Value> = Vec::new();

        for msg in messages {
            let (role, parts): (&str, Vec<Value>) = match msg.role {
                LlmRole::System => {
                    system_parts.push(json!({"text": msg.content}));
                    continue;
                }
                LlmRole::User => ("user", vec![json!({"text": msg.content})]),
                LlmRole::Assistant => {
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() {
                        parts.push(json!({"text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        parts.push(json!({
                            "functionCall": {"name": call.name, "args": call.arguments},
                        }));
                    }
                    ("model", parts)
                }
                LlmRole::Tool => (
                    "user",
                    vec![json!({
                        "functionResponse": {
                            "name": msg.name.clone().unwrap_or_default(),
                            "response": {"content": tool_output_value(&msg.content)},
                        },
                    })],
                ),
            };

            // Gemini wants alternating turns; fold same-role neighbours.
            let same_role = contents.last().is_some_and(|last| last["role"] == role);
            if same_role {
                if let Some(existing) = contents
                    .last_mut()
                    .and_then(|last| last["parts"].as_array_mut())
                {
                    existing.extend(parts);
                }
            } else {
                contents.push(json!({"role": role, "parts": parts}));
            }
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": config.temperature,
                "maxOutputTokens": config.max_tokens,
            },
        });
        if !system_parts.is_empty() {
            body["systemInstruction"] = json!({"parts": system_parts});
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": gemini_schema(&t.parameters),
                    })
                })
                .collect();
            body["tools"] = json!([{"functionDeclarations": declarations}]);
        }
        body
    }
}

/// Gemini accepts an OpenAPI subset; drop the keywords it rejects.
fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != "default")
                .map(|(k, v)| (k.clone(), gemini_schema(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[LlmTool],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, tools, config);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, config.model
        );

        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let api_resp: GeminiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let candidate = api_resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("no candidates in response".into()))?;
        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for part in parts {
            if let Some(text) = part.text {
                content.push_str(&text);
            }
            if let Some(call) = part.function_call {
                // Gemini does not assign call ids.
                tool_calls.push(LlmToolCall {
                    id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                    name: call.name,
                    arguments: call.args,
                });
            }
        }

        let usage = api_resp.usage_metadata.as_ref();
        Ok(LlmResponse {
            content,
            tool_calls,
            model: api_resp
                .model_version
                .unwrap_or_else(|| config.model.clone()),
            input_tokens: usage.and_then(|u| u.prompt_token_count).unwrap_or(0),
            output_tokens: usage.and_then(|u| u.candidates_token_count).unwrap_or(0),
            finish_reason: candidate
                .finish_reason
                .unwrap_or_else(|| "STOP".into()),
        })
    }
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// A request captured by [`MockProvider`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub messages: Vec<LlmMessage>,
    pub tools: Vec<LlmTool>,
    pub config: LlmConfig,
}

/// A mock LLM provider for testing.
///
/// Returns pre-configured responses. Each call to `complete` pops the next
/// response from the queue. If the queue is empty, returns a default response.
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<Result<LlmResponse, LlmError>>>>,
    /// Captured requests for test assertions.
    captured_requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockProvider {
    /// Create a mock provider with no pre-configured responses (returns defaults).
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            captured_requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a successful response.
    pub fn with_response(self, response: LlmResponse) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Ok(response));
        self
    }

    /// Queue a plain text answer.
    pub fn with_text(self, content: impl Into<String>) -> Self {
        self.with_response(LlmResponse::text(content))
    }

    /// Queue a single tool call.
    pub fn with_tool_call(self, name: impl Into<String>, arguments: Value) -> Self {
        let n = self.responses.lock().unwrap_or_else(|p| p.into_inner()).len();
        self.with_response(LlmResponse::with_tool_calls(vec![LlmToolCall {
            id: format!("mock_call_{n}"),
            name: name.into(),
            arguments,
        }]))
    }

    /// Queue an error response.
    pub fn with_error(self, error: LlmError) -> Self {
        self.responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(Err(error));
        self
    }

    /// Get captured requests for assertions.
    pub fn captured_requests(&self) -> Vec<CapturedRequest> {
        self.captured_requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn default_response(model: &str) -> LlmResponse {
        LlmResponse {
            content: "Mock response".to_string(),
            tool_calls: Vec::new(),
            model: model.to_string(),
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: "end_turn".to_string(),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(
        &self,
        messages: &[LlmMessage],
        tools: &[LlmTool],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        debug!(messages = messages.len(), tools = tools.len(), "mock completion");
        self.captured_requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(CapturedRequest {
                messages: messages.to_vec(),
                tools: tools.to_vec(),
                config: config.clone(),
            });

        let next = self
            .responses
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        next.unwrap_or_else(|| Ok(Self::default_response(&config.model)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> LlmConfig {
        LlmConfig {
            model: "test-model".to_string(),
            max_tokens: 512,
            temperature: 0.5,
            system_prompt: None,
        }
    }

    fn logs_tool() -> LlmTool {
        LlmTool {
            name: "cloudwatch_logs".to_string(),
            description: "Fetch logs".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "log_group_name": {"type": "string"},
                    "minutes_ago": {"type": "integer", "default": 30, "minimum": 1}
                },
                "required": ["log_group_name"]
            }),
        }
    }

    fn tool_exchange() -> Vec<LlmMessage> {
        let call = LlmToolCall {
            id: "call_1".into(),
            name: "cloudwatch_logs".into(),
            arguments: json!({"log_group_name": "/aws/lambda/foo"}),
        };
        vec![
            LlmMessage::system("You are a detective"),
            LlmMessage::user("Investigate"),
            LlmMessage::assistant_tool_calls("", vec![call.clone()]),
            LlmMessage::tool_result(&call, r#"[{"message":"ERROR"}]"#, false),
        ]
    }

    // -- MockProvider tests --------------------------------------------------

    #[tokio::test]
    async fn mock_provider_returns_default_response() {
        let provider = MockProvider::new();
        let resp = provider
            .complete(&[LlmMessage::user("Hello")], &[], &default_config())
            .await
            .unwrap();
        assert_eq!(resp.content, "Mock response");
        assert_eq!(resp.model, "test-model");
        assert!(resp.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn mock_provider_pops_queue_in_order() {
        let provider = MockProvider::new()
            .with_tool_call("cloudwatch_logs", json!({"log_group_name": "g"}))
            .with_text("done")
            .with_error(LlmError::Timeout);
        let config = default_config();

        let first = provider.complete(&[], &[], &config).await.unwrap();
        assert_eq!(first.tool_calls[0].name, "cloudwatch_logs");
        let second = provider.complete(&[], &[], &config).await.unwrap();
        assert_eq!(second.content, "done");
        assert!(matches!(
            provider.complete(&[], &[], &config).await,
            Err(LlmError::Timeout)
        ));
        assert_eq!(provider.captured_requests().len(), 3);
    }

    #[tokio::test]
    async fn mock_provider_captures_tools() {
        let provider = MockProvider::new();
        provider
            .complete(&[LlmMessage::user("Hi")], &[logs_tool()], &default_config())
            .await
            .unwrap();
        let captured = provider.captured_requests();
        assert_eq!(captured[0].tools[0].name, "cloudwatch_logs");
        assert_eq!(captured[0].messages[0].role, LlmRole::User);
    }

    #[test]
    fn llm_role_serialization() {
        assert_eq!(serde_json::to_string(&LlmRole::Tool).unwrap(), "\"tool\"");
        assert_eq!(serde_json::to_string(&LlmRole::Assistant).unwrap(), "\"assistant\"");
    }

    // -- AnthropicProvider request body tests --------------------------------

    #[test]
    fn anthropic_request_body_basic() {
        let body = AnthropicProvider::build_request_body(
            &[LlmMessage::user("What is Rust?")],
            &[],
            &default_config(),
        );
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["max_tokens"], 512);
        assert!(body.get("system").is_none());
        assert!(body.get("tools").is_none());
        assert_eq!(body["messages"][0]["content"], "What is Rust?");
    }

    #[test]
    fn anthropic_request_body_tool_exchange() {
        let body =
            AnthropicProvider::build_request_body(&tool_exchange(), &[logs_tool()], &default_config());
        assert_eq!(body["system"], "You are a detective");
        assert_eq!(body["tools"][0]["input_schema"]["required"][0], "log_group_name");

        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1]["content"][0]["type"], "tool_use");
        assert_eq!(msgs[1]["content"][0]["id"], "call_1");
        assert_eq!(msgs[2]["role"], "user");
        assert_eq!(msgs[2]["content"][0]["type"], "tool_result");
        assert_eq!(msgs[2]["content"][0]["tool_use_id"], "call_1");
    }

    #[test]
    fn anthropic_merges_consecutive_tool_results() {
        let a = LlmToolCall {
            id: "a".into(),
            name: "cloudtrail_lookup".into(),
            arguments: json!({}),
        };
        let b = LlmToolCall {
            id: "b".into(),
            ..a.clone()
        };
        let messages = vec![
            LlmMessage::user("go"),
            LlmMessage::assistant_tool_calls("", vec![a.clone(), b.clone()]),
            LlmMessage::tool_result(&a, "[]", false),
            LlmMessage::tool_result(&b, "bad", true),
        ];
        let body = AnthropicProvider::build_request_body(&messages, &[], &default_config());
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(msgs[2]["content"][1]["is_error"], true);
    }

    // -- OpenAiProvider request body tests -----------------------------------

    #[test]
    fn openai_request_body_tool_exchange() {
        let mut config = default_config();
        config.system_prompt = Some("Base".into());
        let body = OpenAiProvider::build_request_body(&tool_exchange(), &[logs_tool()], &config);

        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs[0]["content"], "Base");
        assert_eq!(msgs[1]["role"], "system");
        assert_eq!(msgs[3]["content"], Value::Null);
        assert_eq!(msgs[3]["tool_calls"][0]["function"]["name"], "cloudwatch_logs");
        let args = msgs[3]["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
        assert!(args.contains("/aws/lambda/foo"));
        assert_eq!(msgs[4]["role"], "tool");
        assert_eq!(msgs[4]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["type"], "function");
    }

    // -- GeminiProvider request body tests -----------------------------------

    #[test]
    fn gemini_request_body_tool_exchange() {
        let body =
            GeminiProvider::build_request_body(&tool_exchange(), &[logs_tool()], &default_config());

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are a detective");
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["functionCall"]["name"], "cloudwatch_logs");
        let response = &contents[2]["parts"][0]["functionResponse"];
        assert_eq!(response["name"], "cloudwatch_logs");
        assert_eq!(response["response"]["content"][0]["message"], "ERROR");

        let params = &body["tools"][0]["functionDeclarations"][0]["parameters"];
        assert!(params["properties"]["minutes_ago"].get("default").is_none());
        assert_eq!(params["properties"]["minutes_ago"]["minimum"], 1);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 512);
    }

    // -- build_provider ------------------------------------------------------

    #[test]
    fn hosted_providers_need_a_key() {
        let settings = LlmSettings::default();
        assert!(matches!(
            build_provider(&settings, None),
            Err(LlmError::NotConfigured(_))
        ));
        let provider = build_provider(&settings, Some("k".into())).unwrap();
        assert_eq!(provider.name(), "gemini");
    }

    #[test]
    fn local_provider_needs_no_key() {
        let settings = LlmSettings {
            provider: LlmProviderKind::Local,
            ..LlmSettings::default()
        };
        let provider = build_provider(&settings, None).unwrap();
        assert_eq!(provider.name(), "local");
    }
}
