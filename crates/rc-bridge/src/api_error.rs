//! HTTP API error types.
//!
//! Every handler error becomes a JSON body of the form `{"error": "..."}`
//! with a matching status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use rc_agents::runner::SubmitError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed JSON or an invalid incident descriptor.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An investigation is already running.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Invalid(e) => ApiError::BadRequest(e.to_string()),
            SubmitError::Conflict { .. } => ApiError::Conflict("Analysis already running".into()),
            SubmitError::Tracker(e) => ApiError::Internal(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// IntoResponse implementation
// ---------------------------------------------------------------------------

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::BadRequest(msg) | ApiError::Conflict(msg) | ApiError::Internal(msg) => msg,
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rc_core::types::IncidentError;
    use uuid::Uuid;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn conflict_uses_fixed_message() {
        let err: ApiError = SubmitError::Conflict {
            running: Uuid::new_v4(),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await,
            json!({"error": "Analysis already running"})
        );
    }

    #[tokio::test]
    async fn invalid_incident_is_bad_request() {
        let err: ApiError = SubmitError::Invalid(IncidentError::ZeroLookback).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("minutes_ago"));
    }

    #[tokio::test]
    async fn internal_error_response() {
        let response = ApiError::Internal("tracker unavailable".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
