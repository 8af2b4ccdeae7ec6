//! OpenAI-compatible backend contract tests.
//!
//! These verify the HTTP shape of `/v1/chat/completions` calls, SSE stream
//! normalization and status-code mapping against a mock server.

use answerflow::llm::{
    FinishReason, GenerationBackend, LlmEvent, Message, OpenAiBackend, OpenAiConfig,
    RequestOptions,
};
use futures_util::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> OpenAiBackend {
    let config =
        OpenAiConfig::new(Some("test-key".into()), "gpt-4o-mini").with_base_url(server.uri());
    OpenAiBackend::new(config).expect("backend")
}

fn sse_body(chunks: &[&str]) -> String {
    chunks.iter().map(|c| format!("data: {c}\n\n")).collect()
}

async fn collect(backend: &OpenAiBackend, messages: &[Message]) -> Vec<LlmEvent> {
    let stream = backend
        .stream(messages, &RequestOptions::new())
        .await
        .expect("stream");
    stream.collect().await
}

// ────────────────────────────────────────────────────────────────────────────
// Request format
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn complete_sends_model_messages_and_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "stream": false,
            "temperature": 0.0,
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "Hello"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi there"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = backend(&server)
        .complete(
            &[Message::system("be brief"), Message::user("Hello")],
            &RequestOptions::new().with_temperature(0.0),
        )
        .await
        .expect("complete");
    assert_eq!(text, "Hi there");
}

#[tokio::test]
async fn complete_without_content_is_empty_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let text = backend(&server)
        .complete(&[Message::user("Hello")], &RequestOptions::new())
        .await
        .expect("complete");
    assert!(text.is_empty());
}

// ────────────────────────────────────────────────────────────────────────────
// Streaming
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn stream_yields_deltas_then_end() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":"[{\"title\""}}]}"#,
        r#"{"choices":[{"index":0,"delta":{"content":":\"A\"}]"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#,
        "[DONE]",
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let events = collect(&backend(&server), &[Message::user("rank")]).await;

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            LlmEvent::TextDelta { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "[{\"title\":\"A\"}]");
    assert_eq!(
        events.last(),
        Some(&LlmEvent::StreamEnd {
            finish_reason: FinishReason::Stop
        })
    );
    let ends = events
        .iter()
        .filter(|e| matches!(e, LlmEvent::StreamEnd { .. }))
        .count();
    assert_eq!(ends, 1, "nothing follows the terminal event");
}

#[tokio::test]
async fn stream_closed_early_reports_error() {
    let server = MockServer::start().await;
    let body = sse_body(&[r#"{"choices":[{"index":0,"delta":{"content":"partial"}}]}"#]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let events = collect(&backend(&server), &[Message::user("rank")]).await;
    assert!(matches!(events.first(), Some(LlmEvent::TextDelta { text }) if text == "partial"));
    assert!(matches!(events.last(), Some(LlmEvent::StreamError { .. })));
}

#[tokio::test]
async fn stream_length_finish_is_reported() {
    let server = MockServer::start().await;
    let body = sse_body(&[
        r#"{"choices":[{"index":0,"delta":{"content":"[{"}}]}"#,
        r#"{"choices":[{"index":0,"delta":{},"finish_reason":"length"}]}"#,
    ]);
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let events = collect(&backend(&server), &[Message::user("rank")]).await;
    assert_eq!(
        events.last(),
        Some(&LlmEvent::StreamEnd {
            finish_reason: FinishReason::Length
        })
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Error mapping
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unauthorized_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key provided", "type": "invalid_request_error"}
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .complete(&[Message::user("Hello")], &RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AUTH_FAILED");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn rate_limit_is_retryable_backend_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "rate_limit_error"}
        })))
        .mount(&server)
        .await;

    let result = backend(&server)
        .stream(&[Message::user("Hello")], &RequestOptions::new())
        .await;
    let Err(err) = result else {
        panic!("expected an error");
    };
    assert_eq!(err.code(), "BACKEND_ERROR");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn bad_request_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"message": "unknown model"}
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .complete(&[Message::user("Hello")], &RequestOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "REQUEST_REJECTED");
    assert!(!err.is_retryable());
}
