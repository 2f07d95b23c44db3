use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use rc_agents::oracle::{OracleError, OracleRequest, ReasoningOracle};
use rc_agents::pipeline::InvestigationPipeline;
use rc_agents::runner::InvestigationRunner;
use rc_agents::stages::StageId;
use rc_bridge::http_api::{api_router, ApiState};
use rc_core::config::{DaemonConfig, InventoryResource};
use rc_core::investigation::InvestigationTracker;
use rc_harness::evidence::{EvidenceProviders, StaticBackend};
use rc_harness::tools::EvidenceToolkit;
use rc_intelligence::llm::LlmError;

/// Answers every stage with a fixed string; stage 1 optionally waits for a
/// gate so tests can observe the `running` state.
struct StubOracle {
    gate: Option<Arc<Notify>>,
    fail: bool,
}

#[async_trait]
impl ReasoningOracle for StubOracle {
    async fn generate(&self, request: &OracleRequest) -> Result<String, OracleError> {
        if request.stage == StageId::EvidenceGathering {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }
        if self.fail {
            return Err(OracleError::Llm(LlmError::Timeout));
        }
        Ok(match request.stage {
            StageId::RemediationPlanning => "no action needed".into(),
            other => format!("{other} done"),
        })
    }
}

fn incident_json() -> Value {
    json!({
        "log_group_name": "/aws/lambda/production-api-service",
        "namespace": "AWS/Lambda",
        "metric_name": "Errors",
        "dimension_name": "FunctionName",
        "dimension_value": "production-api-service"
    })
}

fn inventory() -> Vec<InventoryResource> {
    vec![InventoryResource {
        id: "production-api-service".into(),
        kind: "Lambda".into(),
        status: "warning".into(),
        region: "us-east-1".into(),
    }]
}

/// Spin up an API server on a random port, return the base URL.
async fn start_test_server(oracle: StubOracle) -> (String, Arc<ApiState>) {
    let toolkit = Arc::new(EvidenceToolkit::new(EvidenceProviders::new(Arc::new(
        StaticBackend::new(),
    ))));
    let pipeline = Arc::new(InvestigationPipeline::standard(Arc::new(oracle), toolkit).unwrap());
    let runner = InvestigationRunner::new(pipeline, InvestigationTracker::new());
    let state = Arc::new(ApiState::new(runner, inventory()));
    let router = api_router(state.clone(), &DaemonConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to ephemeral port");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

fn quiet() -> StubOracle {
    StubOracle {
        gate: None,
        fail: false,
    }
}

/// Poll `/status` until the investigation leaves `running`.
async fn wait_for_terminal(base: &str) -> Value {
    for _ in 0..200 {
        let body: Value = reqwest::get(format!("{base}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if body["status"] != "running" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("investigation never finished");
}

#[tokio::test]
async fn test_health() {
    let (base, _state) = start_test_server(quiet()).await;

    let resp = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.headers().contains_key("x-request-id"));

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": "Active", "service": "RCA-Agent"}));
}

#[tokio::test]
async fn test_status_starts_idle() {
    let (base, _state) = start_test_server(quiet()).await;

    let body: Value = reqwest::get(format!("{base}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "idle");
    assert!(body["result"].is_null());
    assert!(body["investigation_id"].is_null());
}

#[tokio::test]
async fn test_investigate_then_complete() {
    let (base, _state) = start_test_server(quiet()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/investigate"))
        .json(&incident_json())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let started: Value = resp.json().await.unwrap();
    assert_eq!(started["message"], "Investigation started");
    assert_eq!(started["status"], "running");
    let id = started["investigation_id"].as_str().unwrap().to_string();

    let status = wait_for_terminal(&base).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(status["result"], "no action needed");
    assert_eq!(status["investigation_id"], id.as_str());
    assert!(status["finished_at"].is_string());
}

#[tokio::test]
async fn test_failed_investigation_reports_error() {
    let (base, _state) = start_test_server(StubOracle {
        gate: None,
        fail: true,
    })
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/investigate"))
        .json(&incident_json())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let status = wait_for_terminal(&base).await;
    assert_eq!(status["status"], "failed");
    assert_eq!(status["result"], "request timed out");
}

#[tokio::test]
async fn test_second_investigation_conflicts() {
    let gate = Arc::new(Notify::new());
    let (base, state) = start_test_server(StubOracle {
        gate: Some(gate.clone()),
        fail: false,
    })
    .await;
    let client = reqwest::Client::new();

    let first = client
        .post(format!("{base}/investigate"))
        .json(&incident_json())
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 202);

    let second = client
        .post(format!("{base}/investigate"))
        .json(&incident_json())
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body, json!({"error": "Analysis already running"}));

    let running: Value = reqwest::get(format!("{base}/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(running["status"], "running");

    gate.notify_one();
    let status = wait_for_terminal(&base).await;
    assert_eq!(status["status"], "completed");
    assert_eq!(state.tracker().read().result.as_deref(), Some("no action needed"));
}

#[tokio::test]
async fn test_invalid_descriptor_is_bad_request() {
    let (base, state) = start_test_server(quiet()).await;
    let client = reqwest::Client::new();

    let mut blank = incident_json();
    blank["namespace"] = json!("  ");
    let resp = client
        .post(format!("{base}/investigate"))
        .json(&blank)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("namespace"));

    let resp = client
        .post(format!("{base}/investigate"))
        .json(&json!({"log_group_name": "/aws/lambda/foo"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let mut zero = incident_json();
    zero["minutes_ago"] = json!(0);
    let resp = client
        .post(format!("{base}/investigate"))
        .json(&zero)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    assert_eq!(state.tracker().read().investigation_id, None);
}

#[tokio::test]
async fn test_inventory_lists_configured_resources() {
    let (base, _state) = start_test_server(quiet()).await;

    let body: Value = reqwest::get(format!("{base}/inventory"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body,
        json!({"resources": [{
            "id": "production-api-service",
            "type": "Lambda",
            "status": "warning",
            "region": "us-east-1"
        }]})
    );
}

#[tokio::test]
async fn test_cors_allows_only_configured_origins() {
    let (base, _state) = start_test_server(quiet()).await;
    let client = reqwest::Client::new();

    let allowed = client
        .get(format!("{base}/status"))
        .header("origin", "http://localhost:3000")
        .send()
        .await
        .unwrap();
    assert_eq!(
        allowed.headers().get("access-control-allow-origin").unwrap(),
        "http://localhost:3000"
    );

    let denied = client
        .get(format!("{base}/status"))
        .header("origin", "http://evil.example")
        .send()
        .await
        .unwrap();
    assert!(denied.headers().get("access-control-allow-origin").is_none());
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (base, _state) = start_test_server(quiet()).await;
    let client = reqwest::Client::new();

    let mut big = incident_json();
    big["padding"] = json!("x".repeat(128 * 1024));
    let resp = client
        .post(format!("{base}/investigate"))
        .json(&big)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);
}
