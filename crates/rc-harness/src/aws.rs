//! AWS JSON-protocol client for CloudWatch Logs, CloudWatch metrics and
//! CloudTrail.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, warn};

use rc_core::config::{AwsConfig, AwsCredentials, CredentialProvider};

use crate::evidence::{
    AuditQuery, EvidenceRetrievalError, LogQuery, MetricQuery, ObservabilityBackend,
};
use crate::sigv4::{self, SigningRequest};

// ---------------------------------------------------------------------------
// AwsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwsService {
    Logs,
    Monitoring,
    CloudTrail,
}

impl AwsService {
    /// Name used in the endpoint host and the credential scope.
    pub fn signing_name(self) -> &'static str {
        match self {
            AwsService::Logs => "logs",
            AwsService::Monitoring => "monitoring",
            AwsService::CloudTrail => "cloudtrail",
        }
    }

    fn target_prefix(self) -> &'static str {
        match self {
            AwsService::Logs => "Logs_20140328",
            AwsService::Monitoring => "GraniteServiceVersion20100801",
            AwsService::CloudTrail => "com.amazonaws.cloudtrail.v20131101.CloudTrail_20131101",
        }
    }

    pub fn target(self, operation: &str) -> String {
        format!("{}.{operation}", self.target_prefix())
    }

    pub fn content_type(self) -> &'static str {
        match self {
            AwsService::Monitoring => "application/x-amz-json-1.0",
            AwsService::Logs | AwsService::CloudTrail => "application/x-amz-json-1.1",
        }
    }

    pub fn regional_endpoint(self, region: &str) -> String {
        format!("https://{}.{region}.amazonaws.com", self.signing_name())
    }
}

// ---------------------------------------------------------------------------
// AwsObservabilityBackend
// ---------------------------------------------------------------------------

pub struct AwsObservabilityBackend {
    client: reqwest::Client,
    region: String,
    endpoint_url: Option<String>,
    credentials: Option<AwsCredentials>,
    credential_source: String,
}

impl AwsObservabilityBackend {
    /// Build a backend from config, resolving credentials from the
    /// environment. Missing credentials are reported per call, not here.
    pub fn from_config(config: &AwsConfig) -> Result<Self, EvidenceRetrievalError> {
        Self::new(config, CredentialProvider::aws(config))
    }

    pub fn new(
        config: &AwsConfig,
        credentials: Option<AwsCredentials>,
    ) -> Result<Self, EvidenceRetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| EvidenceRetrievalError::Transport(e.to_string()))?;
        if credentials.is_none() {
            warn!(
                access_key_env = %config.access_key_env,
                "AWS credentials not found; evidence queries will fail"
            );
        }
        Ok(Self {
            client,
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            credentials,
            credential_source: format!("{}/{}", config.access_key_env, config.secret_key_env),
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    fn endpoint(&self, service: AwsService) -> String {
        match &self.endpoint_url {
            Some(url) => url.clone(),
            None => service.regional_endpoint(&self.region),
        }
    }

    /// POST one signed JSON-protocol call and return the decoded body.
    async fn call(
        &self,
        service: AwsService,
        operation: &str,
        body: &Value,
    ) -> Result<Value, EvidenceRetrievalError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            EvidenceRetrievalError::MissingCredentials(self.credential_source.clone())
        })?;

        let url = reqwest::Url::parse(&self.endpoint(service))
            .map_err(|e| EvidenceRetrievalError::Transport(format!("invalid endpoint: {e}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => {
                return Err(EvidenceRetrievalError::Transport(format!(
                    "endpoint has no host: {url}"
                )))
            }
        };

        let payload = serde_json::to_vec(body)
            .map_err(|e| EvidenceRetrievalError::Decode(e.to_string()))?;
        let target = service.target(operation);
        let content_type = service.content_type();

        let signed = sigv4::sign(
            &SigningRequest {
                method: "POST",
                host: &host,
                path: url.path(),
                query: url.query().unwrap_or(""),
                headers: &[("content-type", content_type), ("x-amz-target", target.as_str())],
                payload: &payload,
                service: service.signing_name(),
                region: &self.region,
                timestamp: Utc::now(),
            },
            credentials,
        );

        debug!(%target, %host, "calling AWS");
        let mut request = self
            .client
            .post(url)
            .header("content-type", content_type)
            .header("x-amz-target", &target)
            .header("x-amz-date", &signed.amz_date)
            .header("authorization", &signed.authorization);
        if let Some(token) = &signed.security_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request.body(payload).send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(service_error(status.as_u16(), &text));
        }
        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        serde_json::from_str(&text).map_err(|e| EvidenceRetrievalError::Decode(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> EvidenceRetrievalError {
    if e.is_timeout() {
        EvidenceRetrievalError::Timeout
    } else {
        EvidenceRetrievalError::Transport(e.to_string())
    }
}

/// Decode a JSON-protocol error body (`__type` plus `message` or `Message`).
fn service_error(status: u16, body: &str) -> EvidenceRetrievalError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let code = parsed
        .get("__type")
        .and_then(Value::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string())
        .unwrap_or_else(|| "UnknownError".to_string());
    let message = parsed
        .get("message")
        .or_else(|| parsed.get("Message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    EvidenceRetrievalError::Service {
        status,
        code,
        message,
    }
}

fn take_array(mut body: Value, field: &str) -> Vec<Value> {
    match body.get_mut(field).map(Value::take) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

#[async_trait]
impl ObservabilityBackend for AwsObservabilityBackend {
    async fn filter_log_events(
        &self,
        query: &LogQuery,
    ) -> Result<Vec<Value>, EvidenceRetrievalError> {
        let body = json!({
            "logGroupName": query.log_group_name,
            "startTime": query.window.start_millis(),
            "endTime": query.window.end_millis(),
            "limit": query.limit,
        });
        let response = self.call(AwsService::Logs, "FilterLogEvents", &body).await?;
        Ok(take_array(response, "events"))
    }

    async fn metric_statistics(
        &self,
        query: &MetricQuery,
    ) -> Result<Vec<Value>, EvidenceRetrievalError> {
        let body = json!({
            "Namespace": query.namespace,
            "MetricName": query.metric_name,
            "Dimensions": [{"Name": query.dimension_name, "Value": query.dimension_value}],
            "StartTime": query.window.start.timestamp(),
            "EndTime": query.window.end.timestamp(),
            "Period": query.period_secs,
            "Statistics": MetricQuery::STATISTICS,
        });
        let response = self
            .call(AwsService::Monitoring, "GetMetricStatistics", &body)
            .await?;
        Ok(take_array(response, "Datapoints"))
    }

    async fn lookup_events(
        &self,
        query: &AuditQuery,
    ) -> Result<Vec<Value>, EvidenceRetrievalError> {
        let body = json!({
            "StartTime": query.window.start.timestamp(),
            "EndTime": query.window.end.timestamp(),
            "MaxResults": query.max_results,
        });
        let response = self
            .call(AwsService::CloudTrail, "LookupEvents", &body)
            .await?;
        Ok(take_array(response, "Events"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
