//! Language-model providers for rootcause.
//!
//! [`llm::LlmProvider`] is a single async completion call with optional
//! tool definitions. Anthropic, OpenAI-compatible and Gemini backends are
//! provided, plus [`llm::MockProvider`] for tests.

pub mod llm;

pub use llm::{
    build_provider, LlmConfig, LlmError, LlmMessage, LlmProvider, LlmResponse, LlmRole, LlmTool,
    LlmToolCall, MockProvider,
};
