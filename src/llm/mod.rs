//! Text-generation backend abstraction.
//!
//! The pipeline talks to a [`GenerationBackend`] twice per request: a
//! single-turn call for the intent, and a streamed call for the ranking.
//! [`openai::OpenAiBackend`] covers every OpenAI-compatible endpoint; tests
//! inject in-process fakes.

pub mod events;
pub mod message;
pub mod openai;
pub mod sse;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};

use crate::error::{PipelineError, Result};

pub use events::{FinishReason, LlmEvent};
pub use message::{Message, Role};
pub use openai::{OpenAiBackend, OpenAiConfig};

/// A boxed stream of normalized LLM events.
pub type LlmEventStream = Pin<Box<dyn Stream<Item = LlmEvent> + Send>>;

/// Per-call generation options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Maximum tokens to generate. `None` means use provider default.
    pub max_tokens: Option<usize>,
    /// Sampling temperature. `None` means use provider default.
    pub temperature: Option<f64>,
}

impl RequestOptions {
    /// Create request options with provider defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A text-generation capability.
///
/// Implementations are long-lived and shared read-only across concurrent
/// requests.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Backend name for logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Open a streamed completion.
    ///
    /// Errors returned here happen before the first event (connection, auth,
    /// HTTP status). Failures after that arrive as [`LlmEvent::StreamError`].
    async fn stream(
        &self,
        messages: &[Message],
        options: &RequestOptions,
    ) -> Result<LlmEventStream>;

    /// Single-turn completion returning the whole text.
    ///
    /// The default drains [`stream`](Self::stream).
    async fn complete(&self, messages: &[Message], options: &RequestOptions) -> Result<String> {
        let mut stream = self.stream(messages, options).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event {
                LlmEvent::TextDelta { text: delta } => text.push_str(&delta),
                LlmEvent::StreamEnd { .. } => break,
                LlmEvent::StreamError { error } => return Err(PipelineError::Stream(error)),
            }
        }
        Ok(text)
    }
}
