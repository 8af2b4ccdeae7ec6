//! Query interpretation: free text → [`Intent`].
//!
//! One round trip to the generation backend with a fixed instruction asking
//! for `topic`, `mediaType` and `numResults` as a JSON object. The reply is
//! either turned into a complete [`Intent`] or rejected; a partially
//! populated intent never escapes.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::InterpretConfig;
use crate::error::{PipelineError, Result};
use crate::llm::{GenerationBackend, Message, RequestOptions};
use crate::retry::{RetryPolicy, with_retry};

/// System instruction for the intent call.
pub const INTENT_INSTRUCTION: &str = "Your task is to analyze the user query and generate a response \
detailing the query's main topic, the preferred media type for the results (e.g. articles/podcast/social media), \
and the number of desired results. Please format your response as a JSON object. For example, your response \
should look like this: {\"topic\": \"Climate Change\", \"mediaType\": \"Articles\", \"numResults\": 5}. \
Note: Ensure to return 'numResults' as a number, not a string. Respond with the JSON object only.";

/// Structured interpretation of a user query. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    /// Main topic, used as the web search query.
    pub topic: String,
    /// Preferred media type as phrased by the model (e.g. "articles").
    pub media_type: String,
    /// How many results the user wants displayed. Never caps retrieval.
    pub desired_count: u32,
}

/// Turns raw user text into an [`Intent`].
pub struct QueryInterpreter {
    backend: Arc<dyn GenerationBackend>,
    config: InterpretConfig,
    retry: RetryPolicy,
}

impl QueryInterpreter {
    /// Create an interpreter over a shared backend.
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        config: InterpretConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            backend,
            config,
            retry,
        }
    }

    /// Interpret `user_text`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Interpretation`] for blank input, an empty reply, or
    ///   a reply missing a required field
    /// - [`PipelineError::Parse`] if the reply is not JSON
    /// - backend errors once retries are exhausted, or `Cancelled`
    pub async fn parse(&self, user_text: &str, cancel: &CancellationToken) -> Result<Intent> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            return Err(PipelineError::Interpretation("query is empty".into()));
        }

        let messages = [Message::system(INTENT_INSTRUCTION), Message::user(user_text)];
        let options = RequestOptions::new().with_temperature(0.0);
        let reply = with_retry(&self.retry, cancel, "intent", || {
            self.backend.complete(&messages, &options)
        })
        .await?;

        let intent = parse_intent_response(&reply, &self.config)?;
        tracing::debug!(
            media_type = %intent.media_type,
            desired_count = intent.desired_count,
            "intent parsed"
        );
        Ok(intent)
    }
}

/// Parse and validate the backend reply.
///
/// Markdown code fences around the JSON are tolerated. `numResults` may be a
/// number or a numeric string; it is rounded and, when `config.clamp` is set,
/// clamped into `[min_count, max_count]`.
///
/// # Errors
///
/// See [`QueryInterpreter::parse`].
pub fn parse_intent_response(reply: &str, config: &InterpretConfig) -> Result<Intent> {
    let body = strip_code_fences(reply);
    if body.is_empty() {
        return Err(PipelineError::Interpretation(
            "backend returned no text".into(),
        ));
    }

    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| PipelineError::Parse(format!("intent reply is not JSON: {e}")))?;
    let Some(object) = value.as_object() else {
        return Err(PipelineError::Interpretation(
            "intent reply is not a JSON object".into(),
        ));
    };

    let topic = object
        .get("topic")
        .and_then(|t| t.as_str())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PipelineError::Interpretation("missing or empty 'topic'".into()))?;
    let media_type = object
        .get("mediaType")
        .and_then(|m| m.as_str())
        .ok_or_else(|| PipelineError::Interpretation("missing 'mediaType'".into()))?;
    let count = object
        .get("numResults")
        .and_then(coerce_number)
        .ok_or_else(|| PipelineError::Interpretation("missing or non-numeric 'numResults'".into()))?;

    let rounded = count.round();
    let desired_count = if config.clamp {
        rounded.clamp(f64::from(config.min_count), f64::from(config.max_count)) as u32
    } else if (0.0..=f64::from(u32::MAX)).contains(&rounded) {
        rounded as u32
    } else {
        return Err(PipelineError::Interpretation(format!(
            "'numResults' out of range: {count}"
        )));
    };

    Ok(Intent {
        topic: topic.to_string(),
        media_type: media_type.trim().to_string(),
        desired_count,
    })
}

fn coerce_number(value: &serde_json::Value) -> Option<f64> {
    let n = match value {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. "json") on the opening line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
