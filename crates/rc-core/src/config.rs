use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Env var that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "ROOTCAUSE_CONFIG";

/// Top-level configuration loaded from `~/.rootcause/config.toml`.
///
/// **Security**: This struct NEVER stores API keys or AWS secrets. It holds
/// the *names* of the environment variables that carry them; see
/// [`CredentialProvider`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub evidence: EvidenceConfig,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub inventory: InventoryConfig,
}

impl Config {
    /// Load config from `$ROOTCAUSE_CONFIG` or `~/.rootcause/config.toml`,
    /// falling back to defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        let cfg = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.daemon.validate()?;
        self.evidence.validate()?;
        self.llm.validate()?;
        self.inventory.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rootcause")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// General
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "general.service_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_service_name() -> String {
    "rootcause".into()
}
fn default_log_level() -> String {
    "info".into()
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed by the CORS layer.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl DaemonConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Validation(
                "daemon.port must be non-zero".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "daemon.host must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}

// ---------------------------------------------------------------------------
// AWS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Send every request here instead of the regional endpoints
    /// (LocalStack, test servers).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_access_key_env")]
    pub access_key_env: String,
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
    #[serde(default = "default_session_token_env")]
    pub session_token_env: String,
    #[serde(default = "default_aws_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint_url: None,
            access_key_env: default_access_key_env(),
            secret_key_env: default_secret_key_env(),
            session_token_env: default_session_token_env(),
            request_timeout_secs: default_aws_timeout(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".into()
}
fn default_access_key_env() -> String {
    "AWS_ACCESS_KEY_ID".into()
}
fn default_secret_key_env() -> String {
    "AWS_SECRET_ACCESS_KEY".into()
}
fn default_session_token_env() -> String {
    "AWS_SESSION_TOKEN".into()
}
fn default_aws_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Evidence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    #[serde(default = "default_log_event_limit")]
    pub log_event_limit: u32,
    #[serde(default = "default_audit_event_limit")]
    pub audit_event_limit: u32,
    #[serde(default = "default_metric_period")]
    pub metric_period_secs: u32,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            log_event_limit: default_log_event_limit(),
            audit_event_limit: default_audit_event_limit(),
            metric_period_secs: default_metric_period(),
        }
    }
}

impl EvidenceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.log_event_limit == 0 || self.audit_event_limit == 0 {
            return Err(ConfigError::Validation(
                "evidence limits must be greater than zero".to_string(),
            ));
        }
        if self.metric_period_secs == 0 || self.metric_period_secs % 60 != 0 {
            return Err(ConfigError::Validation(format!(
                "evidence.metric_period_secs must be a positive multiple of 60, got {}",
                self.metric_period_secs
            )));
        }
        Ok(())
    }
}

fn default_log_event_limit() -> u32 {
    100
}
fn default_audit_event_limit() -> u32 {
    50
}
fn default_metric_period() -> u32 {
    300
}

// ---------------------------------------------------------------------------
// LLM
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    #[default]
    Gemini,
    Anthropic,
    Openai,
    /// OpenAI-compatible local inference server.
    Local,
}

impl LlmProviderKind {
    pub fn default_api_key_env(self) -> &'static str {
        match self {
            Self::Gemini => "GOOGLE_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Openai => "OPENAI_API_KEY",
            Self::Local => "LOCAL_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Gemini => "https://generativelanguage.googleapis.com",
            Self::Anthropic => "https://api.anthropic.com",
            Self::Openai => "https://api.openai.com",
            Self::Local => "http://127.0.0.1:11434",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub provider: LlmProviderKind,
    #[serde(default = "default_model")]
    pub model: String,
    /// Env var holding the API key; defaults per provider.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Base URL override; defaults per provider.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Upper bound on tool-call round trips within one stage.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            model: default_model(),
            api_key_env: None,
            base_url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_tool_rounds: default_max_tool_rounds(),
            request_timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmSettings {
    pub fn resolved_api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider.default_api_key_env())
    }

    pub fn resolved_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "llm.model must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Validation(format!(
                "llm.temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::Validation(
                "llm.max_tool_rounds must be at least 1".to_string(),
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "llm.max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_model() -> String {
    "gemini-1.5-pro".into()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.5
}
fn default_max_tool_rounds() -> u32 {
    8
}
fn default_llm_timeout() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// A monitored resource shown by the inventory endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryResource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_resource_status")]
    pub status: String,
    #[serde(default = "default_region")]
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InventoryConfig {
    #[serde(default)]
    pub resources: Vec<InventoryResource>,
}

impl InventoryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self.resources.iter().find(|r| r.id.trim().is_empty()) {
            return Err(ConfigError::Validation(format!(
                "inventory.resources entry of type '{}' has an empty id",
                bad.kind
            )));
        }
        Ok(())
    }
}

fn default_resource_status() -> String {
    "healthy".into()
}

// ---------------------------------------------------------------------------
// Credential provider: reads secrets from environment at runtime
// ---------------------------------------------------------------------------

/// Resolved AWS credentials.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Reads credentials from environment variables at runtime.
///
/// Config stores env var *names*, this provider resolves them to values on
/// demand.
pub struct CredentialProvider;

impl CredentialProvider {
    /// Read a credential from a named env var. Empty values count as unset.
    pub fn from_env(var_name: &str) -> Option<String> {
        std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
    }

    /// Resolve AWS credentials using the env var names in `aws`.
    pub fn aws(aws: &AwsConfig) -> Option<AwsCredentials> {
        Some(AwsCredentials {
            access_key_id: Self::from_env(&aws.access_key_env)?,
            secret_access_key: Self::from_env(&aws.secret_key_env)?,
            session_token: Self::from_env(&aws.session_token_env),
        })
    }

    /// Resolve the API key for the configured LLM provider.
    pub fn llm_api_key(llm: &LlmSettings) -> Option<String> {
        Self::from_env(llm.resolved_api_key_env())
    }
}
