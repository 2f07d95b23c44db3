use axum::{
    body::Body,
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a request/trace id (32 hex characters).
pub fn generate_request_id() -> String {
    Uuid::new_v4().as_simple().to_string()
}

/// Axum middleware that injects `X-Request-Id` headers and runs the request
/// inside an `http_request` span.
///
/// An incoming `X-Request-Id` is reused when it is a valid header value;
/// otherwise a new id is generated. The response always carries the id.
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let request_id = incoming.unwrap_or_else(generate_request_id);
    let header = HeaderValue::from_str(&request_id)
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"));

    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, header.clone());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = async move {
        tracing::debug!("processing request");
        let response = next.run(request).await;
        tracing::debug!(status = response.status().as_u16(), "request finished");
        response
    }
    .instrument(span)
    .await;

    response.headers_mut().insert(REQUEST_ID_HEADER, header);
    response
}

/// Create a named span for a long-running operation, returning the span and
/// its trace id for log correlation.
pub fn create_operation_span(operation: &str) -> (tracing::Span, String) {
    let trace_id = generate_request_id();
    let span = tracing::info_span!(
        "operation",
        trace_id = %trace_id,
        operation = %operation,
    );
    (span, trace_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_request_id());
    }

    #[test]
    fn operation_span_creation() {
        let (span, trace_id) = create_operation_span("investigation");
        assert_eq!(trace_id.len(), 32);
        let _guard = span.enter();
    }
}
