//! Builds a ready-to-run pipeline from [`Config`].

use std::sync::Arc;

use rc_core::config::{Config, CredentialProvider};
use rc_harness::aws::AwsObservabilityBackend;
use rc_harness::evidence::{EvidenceProviders, EvidenceRetrievalError, ObservabilityBackend};
use rc_harness::tools::EvidenceToolkit;
use rc_intelligence::llm::{build_provider, LlmConfig, LlmError, LlmProvider};
use thiserror::Error;
use tracing::info;

use crate::oracle::LlmOracle;
use crate::pipeline::{InvestigationPipeline, PipelineError};

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("evidence backend: {0}")]
    Backend(#[from] EvidenceRetrievalError),

    #[error("language model: {0}")]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// The AWS backend and the configured LLM provider, with credentials and
/// the API key read from the environment.
pub fn pipeline_from_config(config: &Config) -> Result<InvestigationPipeline, WiringError> {
    let backend = AwsObservabilityBackend::from_config(&config.aws)?;
    let provider = build_provider(&config.llm, CredentialProvider::llm_api_key(&config.llm))?;
    info!(
        region = backend.region(),
        provider = provider.name(),
        model = %config.llm.model,
        "investigation pipeline wired"
    );
    pipeline_with(config, Arc::new(backend), provider)
}

/// Wire a pipeline around an explicit backend and provider.
pub fn pipeline_with(
    config: &Config,
    backend: Arc<dyn ObservabilityBackend>,
    provider: Arc<dyn LlmProvider>,
) -> Result<InvestigationPipeline, WiringError> {
    let providers = EvidenceProviders::with_limits(backend, config.evidence.clone());
    let toolkit = Arc::new(EvidenceToolkit::new(providers));
    let oracle = LlmOracle::new(
        provider,
        LlmConfig::from_settings(&config.llm),
        config.llm.max_tool_rounds,
    );
    Ok(InvestigationPipeline::standard(Arc::new(oracle), toolkit)?)
}
