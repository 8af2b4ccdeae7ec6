//! OpenAI-compatible chat completions backend.
//!
//! Talks to `/v1/chat/completions`, which OpenAI, Groq and Ollama all serve.
//! Streaming responses are normalized to [`LlmEvent`]s: each `delta.content`
//! becomes a `TextDelta`, `finish_reason` or the `[DONE]` sentinel becomes
//! the single `StreamEnd`.
//!
//! # Examples
//!
//! ```rust,no_run
//! use answerflow::llm::{GenerationBackend, Message, OpenAiBackend, OpenAiConfig, RequestOptions};
//!
//! # async fn example() -> answerflow::Result<()> {
//! let backend = OpenAiBackend::new(OpenAiConfig::new(Some("sk-...".into()), "gpt-4o-mini"))?;
//! let text = backend
//!     .complete(&[Message::user("Hello")], &RequestOptions::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use super::events::{FinishReason, LlmEvent};
use super::message::Message;
use super::sse::{SseEvent, SseLineParser};
use super::{GenerationBackend, LlmEventStream, RequestOptions};
use crate::config::LlmConfig;
use crate::error::{PipelineError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Bearer token. `None` for keyless local servers.
    pub api_key: Option<String>,
    /// Base URL (defaults to `https://api.openai.com`).
    pub base_url: String,
    /// The model to use.
    pub model: String,
    /// Deadline for a non-streaming call, or for a stream to open.
    pub request_timeout: Duration,
    /// Options applied when a call leaves them unset.
    pub defaults: RequestOptions,
}

impl OpenAiConfig {
    /// Create a config for the public OpenAI API.
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com".into(),
            model: model.into(),
            request_timeout: Duration::from_secs(60),
            defaults: RequestOptions::default(),
        }
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build from the `[llm]` config section, resolving the API key.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the key reference cannot be resolved.
    pub fn from_settings(settings: &LlmConfig) -> Result<Self> {
        Ok(Self {
            api_key: settings.api_key.resolve()?,
            base_url: settings.base_url.clone(),
            model: settings.model.clone(),
            request_timeout: Duration::from_secs(settings.request_timeout_secs),
            defaults: RequestOptions {
                max_tokens: settings.max_tokens,
                temperature: settings.temperature,
            },
        })
    }
}

/// Build the JSON request body for the Chat Completions API.
pub fn build_chat_request(
    model: &str,
    messages: &[Message],
    options: &RequestOptions,
    stream: bool,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    });
    if let Some(obj) = body.as_object_mut() {
        if let Some(max_tokens) = options.max_tokens {
            obj.insert("max_tokens".into(), serde_json::json!(max_tokens));
        }
        if let Some(temp) = options.temperature {
            obj.insert("temperature".into(), serde_json::json!(temp));
        }
    }
    body
}

/// Parse one `data:` payload of a streamed chat completion.
///
/// Unparseable payloads are skipped; an in-band `error` object becomes a
/// [`LlmEvent::StreamError`].
pub fn parse_chat_chunk(data: &str) -> Vec<LlmEvent> {
    let parsed: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    if let Some(error) = parsed.get("error") {
        return vec![LlmEvent::StreamError {
            error: error
                .get("message")
                .and_then(|m| m.as_str())
                .map_or_else(|| error.to_string(), String::from),
        }];
    }

    let mut events = Vec::new();
    let Some(choice) = parsed
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    else {
        return events;
    };

    if let Some(content) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        && !content.is_empty()
    {
        events.push(LlmEvent::TextDelta {
            text: content.to_string(),
        });
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        events.push(LlmEvent::StreamEnd {
            finish_reason: FinishReason::from_openai(reason),
        });
    }

    events
}

/// Map an HTTP error status to the appropriate [`PipelineError`].
pub fn map_http_error(status: reqwest::StatusCode, body: &str) -> PipelineError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => PipelineError::Auth(format!("authentication failed: {message}")),
        429 => PipelineError::Backend(format!("rate limited: {message}")),
        code if status.is_server_error() => {
            PipelineError::Backend(format!("HTTP {code}: {message}"))
        }
        code => PipelineError::Rejected(format!("HTTP {code}: {message}")),
    }
}

/// Extract an error message from an OpenAI error response body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

fn transport_error(context: &str, err: &reqwest::Error) -> PipelineError {
    if err.is_timeout() {
        PipelineError::Timeout(format!("{context}: {err}"))
    } else {
        PipelineError::Backend(format!("{context}: {err}"))
    }
}

/// OpenAI-compatible [`GenerationBackend`].
pub struct OpenAiBackend {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Create a backend with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the client cannot be constructed.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// The configured model.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn effective_options(&self, options: &RequestOptions) -> RequestOptions {
        RequestOptions {
            max_tokens: options.max_tokens.or(self.config.defaults.max_tokens),
            temperature: options.temperature.or(self.config.defaults.temperature),
        }
    }

    async fn post(
        &self,
        messages: &[Message],
        options: &RequestOptions,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let body = build_chat_request(
            &self.config.model,
            messages,
            &self.effective_options(options),
            stream,
        );

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.config.request_timeout, request.send())
            .await
            .map_err(|_| {
                PipelineError::Timeout(format!(
                    "no response within {}s",
                    self.config.request_timeout.as_secs()
                ))
            })?
            .map_err(|e| transport_error("chat request failed", &e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &RequestOptions,
    ) -> Result<LlmEventStream> {
        let response = self.post(messages, options, true).await?;
        tracing::debug!(model = %self.config.model, "completion stream opened");
        Ok(Box::pin(create_event_stream(response.bytes_stream())))
    }

    async fn complete(&self, messages: &[Message], options: &RequestOptions) -> Result<String> {
        let response = self.post(messages, options, false).await?;
        let body: serde_json::Value =
            tokio::time::timeout(self.config.request_timeout, response.json())
                .await
                .map_err(|_| PipelineError::Timeout("response body timed out".into()))?
                .map_err(|e| {
                    PipelineError::Parse(format!("invalid chat completion response: {e}"))
                })?;
        Ok(body
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string())
    }
}

/// Internal state for the event stream.
struct StreamState {
    byte_stream: Pin<Box<dyn Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send>>,
    parser: SseLineParser,
    pending: VecDeque<LlmEvent>,
    finished: bool,
}

impl StreamState {
    fn absorb(&mut self, sse: SseEvent) {
        if sse.is_done() {
            self.pending.push_back(LlmEvent::StreamEnd {
                finish_reason: FinishReason::Stop,
            });
        } else {
            self.pending.extend(parse_chat_chunk(&sse.data));
        }
    }
}

/// Turn a response byte stream into `TextDelta* → (StreamEnd | StreamError)`.
///
/// Nothing is yielded after the terminal event.
fn create_event_stream(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = LlmEvent> + Send {
    futures_util::stream::unfold(
        StreamState {
            byte_stream: Box::pin(byte_stream),
            parser: SseLineParser::new(),
            pending: VecDeque::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if state.finished {
                    return None;
                }
                if let Some(event) = state.pending.pop_front() {
                    if matches!(
                        event,
                        LlmEvent::StreamEnd { .. } | LlmEvent::StreamError { .. }
                    ) {
                        state.finished = true;
                    }
                    return Some((event, state));
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => {
                        for sse in state.parser.push(&chunk) {
                            state.absorb(sse);
                        }
                    }
                    Some(Err(e)) => {
                        state.pending.push_back(LlmEvent::StreamError {
                            error: format!("stream read error: {e}"),
                        });
                    }
                    None => {
                        if let Some(sse) = state.parser.flush() {
                            state.absorb(sse);
                        }
                        state.pending.push_back(LlmEvent::StreamError {
                            error: "stream closed before completion".into(),
                        });
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sse_bytes(
        chunks: &[&str],
    ) -> impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static {
        let owned: Vec<std::result::Result<Bytes, reqwest::Error>> = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        futures_util::stream::iter(owned)
    }

    #[test]
    fn request_body_includes_options() {
        let body = build_chat_request(
            "gpt-4o-mini",
            &[Message::system("sys"), Message::user("hi")],
            &RequestOptions::new().with_max_tokens(256).with_temperature(0.0),
            true,
        );
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.0);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn request_body_omits_unset_options() {
        let body = build_chat_request("m", &[Message::user("q")], &RequestOptions::new(), false);
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn parse_text_delta() {
        let events = parse_chat_chunk(r#"{"choices":[{"delta":{"content":"Hel"},"index":0}]}"#);
        assert_eq!(events, vec![LlmEvent::TextDelta { text: "Hel".into() }]);
    }

    #[test]
    fn parse_finish_reason() {
        let events =
            parse_chat_chunk(r#"{"choices":[{"delta":{},"finish_reason":"stop","index":0}]}"#);
        assert_eq!(
            events,
            vec![LlmEvent::StreamEnd {
                finish_reason: FinishReason::Stop
            }]
        );
    }

    #[test]
    fn parse_skips_empty_and_invalid() {
        assert!(parse_chat_chunk(r#"{"choices":[{"delta":{"content":""}}]}"#).is_empty());
        assert!(parse_chat_chunk("not json").is_empty());
        assert!(parse_chat_chunk(r#"{"choices":[]}"#).is_empty());
    }

    #[test]
    fn parse_in_band_error() {
        let events = parse_chat_chunk(r#"{"error":{"message":"overloaded"}}"#);
        assert_eq!(
            events,
            vec![LlmEvent::StreamError {
                error: "overloaded".into()
            }]
        );
    }

    #[test]
    fn http_status_mapping() {
        use reqwest::StatusCode;
        let body = r#"{"error":{"message":"bad key"}}"#;
        assert_eq!(map_http_error(StatusCode::UNAUTHORIZED, body).code(), "AUTH_FAILED");
        assert_eq!(map_http_error(StatusCode::FORBIDDEN, body).code(), "AUTH_FAILED");
        assert!(map_http_error(StatusCode::TOO_MANY_REQUESTS, body).is_retryable());
        assert!(map_http_error(StatusCode::BAD_GATEWAY, body).is_retryable());
        let rejected = map_http_error(StatusCode::BAD_REQUEST, body);
        assert_eq!(rejected.code(), "REQUEST_REJECTED");
        assert!(rejected.message().contains("bad key"));
    }

    #[test]
    fn error_message_falls_back_to_body() {
        assert_eq!(extract_error_message("plain failure"), "plain failure");
    }

    #[tokio::test]
    async fn stream_yields_deltas_then_single_end() {
        let stream = create_event_stream(sse_bytes(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"[{\\\"ti\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"tle\\\"\"}}]}\n\ndata: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ]));
        let events: Vec<LlmEvent> = stream.collect().await;
        assert_eq!(
            events,
            vec![
                LlmEvent::TextDelta {
                    text: "[{\"ti".into()
                },
                LlmEvent::TextDelta {
                    text: "tle\"".into()
                },
                LlmEvent::StreamEnd {
                    finish_reason: FinishReason::Stop
                },
            ]
        );
    }

    #[tokio::test]
    async fn done_without_finish_reason_ends_stream() {
        let stream = create_event_stream(sse_bytes(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n",
            "data: [DONE]\n\n",
        ]));
        let events: Vec<LlmEvent> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], LlmEvent::StreamEnd { .. }));
    }

    #[tokio::test]
    async fn truncated_stream_reports_error() {
        let stream = create_event_stream(sse_bytes(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n",
        ]));
        let events: Vec<LlmEvent> = stream.collect().await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], LlmEvent::StreamError { .. }));
    }
}
