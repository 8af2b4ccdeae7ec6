//! Streamed ranking of retrieved sources.
//!
//! The [`Ranker`] makes one streaming generation call whose instruction
//! embeds the serialized sources and asks for a `finalResults` JSON array.
//! It does not parse anything mid-stream: fragments are forwarded as they
//! arrive. Consumers buffer them with a [`RankedAssembler`] and parse once
//! the end marker has been seen.

use std::sync::Arc;

use answerflow_search::SourceRecord;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::indexer::ChunkMatch;
use crate::interpreter::{Intent, strip_code_fences};
use crate::llm::{GenerationBackend, LlmEventStream, Message, RequestOptions};
use crate::retry::{RetryPolicy, with_retry};

/// Longest excerpt (in characters) quoted into the ranking instruction.
const MAX_EXCERPT_CHARS: usize = 600;

/// One ranked, annotated result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub link: String,
    /// Short description.
    pub snippet: String,
    /// Display rank, dense from 1.
    pub position: u32,
    /// Model-assigned relevance in [0, 1], if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    /// Model rationale, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Serialize)]
struct PromptSource<'a> {
    title: &'a str,
    link: &'a str,
    snippet: &'a str,
}

/// Issues the streamed ranking call.
pub struct Ranker {
    backend: Arc<dyn GenerationBackend>,
    retry: RetryPolicy,
}

impl Ranker {
    /// Create a ranker over a shared backend.
    pub fn new(backend: Arc<dyn GenerationBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    /// Open the ranking stream.
    ///
    /// Only opening the stream is retried; once fragments flow, failures
    /// surface as a terminal stream event.
    ///
    /// # Errors
    ///
    /// Backend errors once retries are exhausted, or `Cancelled`.
    pub async fn rank(
        &self,
        sources: &[SourceRecord],
        intent: &Intent,
        excerpts: &[ChunkMatch],
        cancel: &CancellationToken,
    ) -> Result<LlmEventStream> {
        let messages = build_ranking_messages(sources, intent, excerpts)?;
        let options = RequestOptions::new();
        tracing::debug!(
            sources = sources.len(),
            excerpts = excerpts.len(),
            backend = self.backend.name(),
            "opening ranking stream"
        );
        with_retry(&self.retry, cancel, "ranking", || {
            self.backend.stream(&messages, &options)
        })
        .await
    }
}

/// Build the system and user messages for the ranking call.
///
/// # Errors
///
/// Returns [`PipelineError::Parse`] if the sources cannot be serialized.
pub fn build_ranking_messages(
    sources: &[SourceRecord],
    intent: &Intent,
    excerpts: &[ChunkMatch],
) -> Result<Vec<Message>> {
    let listed: Vec<PromptSource<'_>> = sources
        .iter()
        .map(|s| PromptSource {
            title: &s.title,
            link: &s.url,
            snippet: &s.snippet,
        })
        .collect();
    let sources_json = serde_json::to_string(&listed)
        .map_err(|e| PipelineError::Parse(format!("cannot serialize sources: {e}")))?;
    let intent_json = serde_json::to_string(intent)
        .map_err(|e| PipelineError::Parse(format!("cannot serialize intent: {e}")))?;

    let system = format!(
        "You are ranking web search results for a user. The search results are: {sources_json}\n\
         \n\
         Do not keep the input order. Rank every result by an overall judgement of timeliness \
         (how current the information is), authority (how trustworthy the publisher is) and \
         practicality (how directly it answers the query).\n\
         \n\
         Output a JSON array named 'finalResults' and nothing else. Each element is an object with \
         'title', 'link', 'snippet' and 'position' (1 for the most recommended result, then 2, 3, ...). \
         Optionally include 'relevance_score' (a number between 0 and 1) and 'reasoning' (one short \
         sentence). If a property is missing from a source, use an empty string (\"\").\n\
         \n\
         Example element:\n\
         {{\"position\": 1, \"title\": \"Investing Explained\", \"link\": \"https://www.investopedia.com/terms/i/investing.asp\", \
         \"snippet\": \"An overview of investment types for beginners.\", \"relevance_score\": 0.95, \
         \"reasoning\": \"Current, authoritative and practical.\"}}"
    );

    let mut user = format!(
        "Here is my query {intent_json}. Ignore desiredCount and rank all of the sources. \
         Output the sorted sources in a JSON array named 'finalResults'."
    );
    if !excerpts.is_empty() {
        user.push_str("\n\nExcerpts from the fetched pages that best match the query:");
        for excerpt in excerpts {
            let text: String = excerpt.chunk.text.chars().take(MAX_EXCERPT_CHARS).collect();
            user.push_str(&format!("\n- {} ({}): {}", excerpt.chunk.title, excerpt.chunk.url, text));
        }
    }

    Ok(vec![Message::system(system), Message::user(user)])
}

/// Buffers ranking fragments until the stream ends.
#[derive(Debug, Default)]
pub struct RankedAssembler {
    buffer: String,
    fragments: usize,
}

impl RankedAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment.
    pub fn push(&mut self, fragment: &str) {
        self.buffer.push_str(fragment);
        self.fragments += 1;
    }

    /// Text assembled so far.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Number of fragments received.
    pub fn fragments(&self) -> usize {
        self.fragments
    }

    /// Parse the assembled text. Call only after the end marker.
    ///
    /// # Errors
    ///
    /// See [`parse_ranked_results`].
    pub fn finish(self) -> Result<Vec<RankedResult>> {
        parse_ranked_results(&self.buffer)
    }
}

/// Parse assembled ranking text into results with dense positions.
///
/// Accepts a bare array or an object holding a `finalResults` array,
/// optionally inside a Markdown code fence or surrounded by prose. Missing
/// string fields become `""`. Positions are reassigned from output order.
///
/// # Errors
///
/// Returns [`PipelineError::Parse`] if no array of objects can be found.
pub fn parse_ranked_results(text: &str) -> Result<Vec<RankedResult>> {
    let body = strip_code_fences(text);
    let value = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .or_else(|| bracketed_array(body))
        .ok_or_else(|| PipelineError::Parse("ranking output is not valid JSON".into()))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut object) => match object.remove("finalResults") {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                return Err(PipelineError::Parse(
                    "ranking output has no 'finalResults' array".into(),
                ));
            }
        },
        _ => {
            return Err(PipelineError::Parse(
                "ranking output is not a JSON array".into(),
            ));
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let serde_json::Value::Object(object) = item else {
                return Err(PipelineError::Parse(format!(
                    "ranking element {} is not an object",
                    index + 1
                )));
            };
            let position = (index + 1) as u32;
            if let Some(claimed) = object.get("position").and_then(number)
                && claimed != f64::from(position)
            {
                tracing::debug!(claimed, position, "model position differs from output order");
            }
            Ok(RankedResult {
                title: string_field(&object, "title"),
                link: string_field(&object, "link"),
                snippet: string_field(&object, "snippet"),
                position,
                relevance_score: ["relevance_score", "relevanceScore"]
                    .iter()
                    .find_map(|key| object.get(*key).and_then(number))
                    .filter(|score| (0.0..=1.0).contains(score)),
                reasoning: ["reasoning", "reason", "Reason"]
                    .iter()
                    .find_map(|key| object.get(*key).and_then(|r| r.as_str()))
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(String::from),
            })
        })
        .collect()
}

fn bracketed_array(text: &str) -> Option<serde_json::Value> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn string_field(object: &serde_json::Map<String, serde_json::Value>, key: &str) -> String {
    match object.get(key) {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
