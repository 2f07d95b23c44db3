use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::Router;
use tower::ServiceExt;

use rc_telemetry::tracing_setup::{request_id_middleware, REQUEST_ID_HEADER};

/// Echoes the request id the handler saw so tests can compare it with the
/// response header.
fn app() -> Router {
    Router::new()
        .route(
            "/echo",
            get(|req: Request<Body>| async move {
                req.headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        )
        .layer(axum::middleware::from_fn(request_id_middleware))
}

async fn body_string(resp: axum::http::Response<Body>) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn generates_request_id_when_absent() {
    let resp = app()
        .oneshot(Request::builder().uri("/echo").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let header = resp
        .headers()
        .get(REQUEST_ID_HEADER)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(header.len(), 32);
    assert_eq!(body_string(resp).await, header);
}

#[tokio::test]
async fn reuses_incoming_request_id() {
    let resp = app()
        .oneshot(
            Request::builder()
                .uri("/echo")
                .header(REQUEST_ID_HEADER, "abc-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.headers().get(REQUEST_ID_HEADER).unwrap(), "abc-123");
    assert_eq!(body_string(resp).await, "abc-123");
}
