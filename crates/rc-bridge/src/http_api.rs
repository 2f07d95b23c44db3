use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;
use uuid::Uuid;

use rc_agents::runner::InvestigationRunner;
use rc_core::config::{DaemonConfig, InventoryResource};
use rc_core::investigation::{InvestigationStatus, InvestigationTracker};
use rc_core::types::IncidentDescriptor;
use rc_telemetry::tracing_setup::request_id_middleware;

use crate::api_error::ApiError;

/// Incident descriptors are a handful of short strings.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state for all HTTP handlers.
pub struct ApiState {
    pub runner: InvestigationRunner,
    pub inventory: Vec<InventoryResource>,
}

impl ApiState {
    pub fn new(runner: InvestigationRunner, inventory: Vec<InventoryResource>) -> Self {
        Self { runner, inventory }
    }

    pub fn tracker(&self) -> &InvestigationTracker {
        self.runner.tracker()
    }
}

/// Build the API router.
///
/// Cross-origin requests are allowed only from `daemon.allowed_origins`.
pub fn api_router(state: Arc<ApiState>, daemon: &DaemonConfig) -> Router {
    let allowed_origins = daemon.allowed_origins.clone();

    Router::new()
        .route("/", get(health))
        .route("/investigate", post(start_investigation))
        .route("/status", get(get_status))
        .route("/inventory", get(get_inventory))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(
                    move |origin: &HeaderValue, _parts: &axum::http::request::Parts| {
                        origin
                            .to_str()
                            .map(|o| allowed_origins.iter().any(|allowed| allowed == o))
                            .unwrap_or(false)
                    },
                ))
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_credentials(true),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvestigationStarted {
    pub message: String,
    pub status: InvestigationStatus,
    pub investigation_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: InvestigationStatus,
    pub result: Option<String>,
    pub investigation_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InventoryResponse {
    pub resources: Vec<InventoryResource>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Active".into(),
        service: "RCA-Agent".into(),
    })
}

async fn start_investigation(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<IncidentDescriptor>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(incident) = body.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    // The handle is dropped: the task keeps running detached and reports
    // to the tracker on its own.
    let submission = state.runner.submit(incident)?;
    let investigation_id = submission.admission.investigation_id;
    info!(%investigation_id, "investigation submitted over http");

    Ok((
        StatusCode::ACCEPTED,
        Json(InvestigationStarted {
            message: "Investigation started".into(),
            status: InvestigationStatus::Running,
            investigation_id,
        }),
    ))
}

async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let snapshot = state.tracker().read();
    Json(StatusResponse {
        status: snapshot.status,
        result: snapshot.result,
        investigation_id: snapshot.investigation_id,
        started_at: snapshot.started_at,
        finished_at: snapshot.finished_at,
    })
}

async fn get_inventory(State(state): State<Arc<ApiState>>) -> Json<InventoryResponse> {
    Json(InventoryResponse {
        resources: state.inventory.clone(),
    })
}
