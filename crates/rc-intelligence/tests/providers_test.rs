//! Providers against in-process HTTP servers speaking each vendor's wire
//! format.

use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use rc_intelligence::llm::{
    AnthropicProvider, GeminiProvider, LlmConfig, LlmError, LlmMessage, LlmProvider, LlmTool,
    OpenAiProvider,
};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn config(model: &str) -> LlmConfig {
    LlmConfig {
        model: model.to_string(),
        max_tokens: 256,
        temperature: 0.5,
        system_prompt: None,
    }
}

fn trail_tool() -> LlmTool {
    LlmTool {
        name: "cloudtrail_lookup".into(),
        description: "Look up audit events".into(),
        parameters: json!({"type": "object", "properties": {}, "required": []}),
    }
}

#[tokio::test]
async fn anthropic_parses_text_and_tool_use() {
    async fn messages(headers: HeaderMap, Json(body): Json<Value>) -> impl IntoResponse {
        if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("sk-test") {
            return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
        }
        assert_eq!(body["tools"][0]["name"], "cloudtrail_lookup");
        (
            StatusCode::OK,
            Json(json!({
                "model": body["model"],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 12, "output_tokens": 7},
                "content": [
                    {"type": "text", "text": "Checking recent changes."},
                    {"type": "tool_use", "id": "toolu_1", "name": "cloudtrail_lookup", "input": {"minutes_ago": 60}}
                ]
            })),
        )
    }

    let base = serve(Router::new().route("/v1/messages", post(messages))).await;
    let provider = AnthropicProvider::new("sk-test").with_base_url(base);
    let resp = provider
        .complete(&[LlmMessage::user("go")], &[trail_tool()], &config("claude-test"))
        .await
        .unwrap();

    assert_eq!(resp.content, "Checking recent changes.");
    assert_eq!(resp.model, "claude-test");
    assert_eq!(resp.finish_reason, "tool_use");
    assert_eq!(resp.tool_calls.len(), 1);
    assert_eq!(resp.tool_calls[0].id, "toolu_1");
    assert_eq!(resp.tool_calls[0].arguments, json!({"minutes_ago": 60}));
}

#[tokio::test]
async fn openai_parses_tool_calls_and_rate_limits() {
    async fn completions(Json(body): Json<Value>) -> impl IntoResponse {
        if body["model"] == "throttled" {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [("retry-after", "7")],
                Json(json!({"error": "slow down"})),
            );
        }
        (
            StatusCode::OK,
            [("x-served-by", "test")],
            Json(json!({
                "model": "gpt-test",
                "choices": [{
                    "finish_reason": "tool_calls",
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_9",
                            "type": "function",
                            "function": {"name": "cloudtrail_lookup", "arguments": "{\"minutes_ago\": 15}"}
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 3, "completion_tokens": 4}
            })),
        )
    }

    let base = serve(Router::new().route("/v1/chat/completions", post(completions))).await;
    let provider = OpenAiProvider::new(Some("sk".into())).with_base_url(base);

    let resp = provider
        .complete(&[LlmMessage::user("go")], &[trail_tool()], &config("gpt-test"))
        .await
        .unwrap();
    assert_eq!(resp.content, "");
    assert_eq!(resp.tool_calls[0].name, "cloudtrail_lookup");
    assert_eq!(resp.tool_calls[0].arguments["minutes_ago"], 15);
    assert_eq!(resp.input_tokens, 3);

    let err = provider
        .complete(&[LlmMessage::user("go")], &[], &config("throttled"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LlmError::RateLimited {
            retry_after_secs: Some(7)
        }
    ));
}

#[tokio::test]
async fn gemini_parses_function_calls_and_api_errors() {
    async fn generate(Path(model): Path<String>, headers: HeaderMap) -> impl IntoResponse {
        assert_eq!(
            headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()),
            Some("g-key")
        );
        if model == "missing:generateContent" {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": {"message": "model not found"}})),
            );
        }
        (
            StatusCode::OK,
            Json(json!({
                "modelVersion": "gemini-test-001",
                "candidates": [{
                    "finishReason": "STOP",
                    "content": {"role": "model", "parts": [
                        {"text": "Looking at the trail."},
                        {"functionCall": {"name": "cloudtrail_lookup", "args": {"minutes_ago": 30}}}
                    ]}
                }],
                "usageMetadata": {"promptTokenCount": 20, "candidatesTokenCount": 8}
            })),
        )
    }

    let base = serve(Router::new().route("/v1beta/models/{model}", post(generate))).await;
    let provider = GeminiProvider::new("g-key").with_base_url(base);

    let resp = provider
        .complete(&[LlmMessage::user("go")], &[trail_tool()], &config("gemini-test"))
        .await
        .unwrap();
    assert_eq!(resp.content, "Looking at the trail.");
    assert_eq!(resp.model, "gemini-test-001");
    assert_eq!(resp.tool_calls[0].name, "cloudtrail_lookup");
    assert!(resp.tool_calls[0].id.starts_with("call_"));
    assert_eq!(resp.output_tokens, 8);

    let err = provider
        .complete(&[LlmMessage::user("go")], &[], &config("missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::ApiError { status: 404, .. }));
}
