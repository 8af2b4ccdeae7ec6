//! Per-request similarity search over fetched page text.
//!
//! Page bodies are cut into overlapping chunks, embedded, and held in an
//! [`EphemeralIndex`] that lives only for the current request. The best
//! matches for the query are handed to the ranker as supporting excerpts.
//! Indexing is advisory: every failure is logged and yields fewer (or no)
//! matches, never an error.

use std::sync::Arc;

use answerflow_search::ContentRecord;
use serde::{Deserialize, Serialize};
use text_splitter::{Characters, ChunkConfig};
use tokio_util::sync::CancellationToken;

use crate::config::IndexConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::retry::{RetryPolicy, with_retry};

/// Which content records are indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexScope {
    /// Only the first record with non-empty text; later records are tried
    /// only if indexing an earlier one fails.
    #[default]
    FirstDocument,
    /// Every record with non-empty text, pooled into one index.
    AllDocuments,
}

/// A slice of page text with a back-reference to its page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Chunk text.
    pub text: String,
    /// Title of the source page.
    pub title: String,
    /// URL of the source page.
    pub url: String,
}

/// A chunk and its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkMatch {
    /// The matched chunk.
    pub chunk: Chunk,
    /// Cosine similarity in [-1, 1].
    pub score: f32,
}

/// Character-counted splitter over the `text-splitter` crate.
///
/// Prefers the coarsest semantic boundary that fits (paragraph, sentence,
/// word, then grapheme), so every chunk is at most `chunk_size` characters
/// and neighbouring chunks share up to `chunk_overlap` characters.
pub struct TextSplitter {
    inner: text_splitter::TextSplitter<Characters>,
}

impl TextSplitter {
    /// Create a splitter. `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let config = ChunkConfig::new(chunk_size)
            .with_overlap(chunk_overlap.min(chunk_size - 1))
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "invalid chunk overlap, splitting without overlap");
                ChunkConfig::new(chunk_size)
            })
            .with_trim(true);
        Self {
            inner: text_splitter::TextSplitter::new(config),
        }
    }

    /// Split `text` into trimmed, non-empty chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.inner
            .chunks(text)
            .filter(|chunk| !chunk.trim().is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Cosine similarity; 0.0 for mismatched or zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Brute-force in-memory vector index scoped to one request.
#[derive(Debug, Default)]
pub struct EphemeralIndex {
    entries: Vec<(Chunk, Vec<f32>)>,
}

impl EphemeralIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an embedded chunk.
    pub fn insert(&mut self, chunk: Chunk, vector: Vec<f32>) {
        self.entries.push((chunk, vector));
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` chunks most similar to `query`, best first. Ties keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ChunkMatch> {
        let mut scored: Vec<ChunkMatch> = self
            .entries
            .iter()
            .map(|(chunk, vector)| ChunkMatch {
                chunk: chunk.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        scored
    }
}

/// Builds an [`EphemeralIndex`] from fetched content and queries it.
pub struct ContentIndexer {
    embedder: Arc<dyn Embedder>,
    config: IndexConfig,
    splitter: TextSplitter,
    retry: RetryPolicy,
}

impl ContentIndexer {
    /// Create an indexer over a shared embedder.
    pub fn new(embedder: Arc<dyn Embedder>, config: IndexConfig, retry: RetryPolicy) -> Self {
        Self {
            embedder,
            splitter: TextSplitter::new(config.chunk_size, config.chunk_overlap),
            config,
            retry,
        }
    }

    /// Top matches for `query` over `records`, according to the configured scope.
    ///
    /// Returns an empty list when indexing is disabled, nothing has text, or
    /// every attempt failed.
    pub async fn index(
        &self,
        records: &[ContentRecord],
        query: &str,
        cancel: &CancellationToken,
    ) -> Vec<ChunkMatch> {
        if !self.config.enabled {
            return Vec::new();
        }
        let mut candidates = records.iter().filter(|r| !r.is_empty());

        let index = match self.config.scope {
            IndexScope::FirstDocument => {
                let mut first = None;
                for record in candidates.by_ref() {
                    match self.embed_record(record, cancel).await {
                        Ok(index) if !index.is_empty() => {
                            first = Some(index);
                            break;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::warn!(url = %record.source.url, error = %err, "indexing failed, trying next page");
                        }
                    }
                    if cancel.is_cancelled() {
                        return Vec::new();
                    }
                }
                first.unwrap_or_default()
            }
            IndexScope::AllDocuments => {
                let mut pooled = EphemeralIndex::new();
                for record in candidates {
                    match self.embed_record(record, cancel).await {
                        Ok(index) => pooled.entries.extend(index.entries),
                        Err(err) => {
                            tracing::warn!(url = %record.source.url, error = %err, "indexing failed, skipping page");
                        }
                    }
                    if cancel.is_cancelled() {
                        return Vec::new();
                    }
                }
                pooled
            }
        };

        if index.is_empty() {
            return Vec::new();
        }

        let query_text = query.to_string();
        let query_vector = match with_retry(&self.retry, cancel, "query embedding", || {
            self.embedder.embed(&query_text)
        })
        .await
        {
            Ok(vector) => vector,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed");
                return Vec::new();
            }
        };

        let matches = index.search(&query_vector, self.config.top_k);
        tracing::debug!(chunks = index.len(), matches = matches.len(), "similarity search done");
        matches
    }

    async fn embed_record(
        &self,
        record: &ContentRecord,
        cancel: &CancellationToken,
    ) -> Result<EphemeralIndex> {
        let texts = self.splitter.split(&record.text);
        let vectors = with_retry(&self.retry, cancel, "chunk embedding", || {
            self.embedder.embed_batch(&texts)
        })
        .await?;

        let mut index = EphemeralIndex::new();
        for (text, vector) in texts.into_iter().zip(vectors) {
            index.insert(
                Chunk {
                    text,
                    title: record.source.title.clone(),
                    url: record.source.url.clone(),
                },
                vector,
            );
        }
        Ok(index)
    }
}
