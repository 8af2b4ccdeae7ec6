//! Request orchestration.
//!
//! A [`Pipeline`] owns the long-lived capabilities and runs each request on
//! its own task:
//!
//! ```text
//! START → INTENT_PARSED → RETRIEVED → CONTENT_FETCHED → INDEXED → RANKING → DONE
//!                                  (FAILED reachable from every state)
//! ```
//!
//! It is the only writer of [`ProgressEvent`]s and the only place that
//! decides whether a stage failure is absorbed (retrieval branches, page
//! fetches, indexing) or terminal (intent, ranking).

pub mod events;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use answerflow_search::{
    BraveImageSearch, BraveWebSearch, ContentFetcher, ImageSearchProvider, SerperVideoSearch,
    VideoSearchProvider, WebSearchProvider,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::{EngineConfig, PipelineConfig};
use crate::embedding::{Embedder, OpenAiEmbedder};
use crate::error::{PipelineError, Result};
use crate::indexer::ContentIndexer;
use crate::interpreter::QueryInterpreter;
use crate::llm::{FinishReason, GenerationBackend, LlmEvent, OpenAiBackend, OpenAiConfig};
use crate::ranker::{RankedAssembler, Ranker};
use crate::retriever::Retriever;

pub use events::{Milestone, ProgressEvent, ProgressStream};

/// Request lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Request accepted.
    Start,
    /// Intent available.
    IntentParsed,
    /// All retrieval branches settled.
    Retrieved,
    /// Page batch settled.
    ContentFetched,
    /// Supporting excerpts selected.
    Indexed,
    /// Ranking stream open.
    Ranking,
    /// Ranked answer delivered.
    Done,
    /// Request ended early.
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::IntentParsed => "intent_parsed",
            Self::Retrieved => "retrieved",
            Self::ContentFetched => "content_fetched",
            Self::Indexed => "indexed",
            Self::Ranking => "ranking",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// External capabilities a pipeline is built from.
///
/// Shared read-only by every request; tests substitute fakes.
#[derive(Clone)]
pub struct Capabilities {
    /// Text generation, used for the intent and the ranking.
    pub backend: Arc<dyn GenerationBackend>,
    /// Embeddings for the content index.
    pub embedder: Arc<dyn Embedder>,
    /// Web search branch.
    pub web: Arc<dyn WebSearchProvider>,
    /// Image search branch.
    pub images: Arc<dyn ImageSearchProvider>,
    /// Video search branch.
    pub videos: Arc<dyn VideoSearchProvider>,
    /// Page fetcher.
    pub fetcher: ContentFetcher,
}

impl Capabilities {
    /// Build the HTTP-backed capabilities described by `config`.
    ///
    /// Missing search API keys are not an error here: the affected branch
    /// reports a configuration error per request and degrades to empty.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if a client cannot be built or a
    /// required secret cannot be resolved.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let backend = OpenAiBackend::new(OpenAiConfig::from_settings(&config.llm)?)?;
        let embedder = OpenAiEmbedder::new(&config.embeddings)?;
        let search = &config.search.providers;
        let brave_key = config.search.brave_api_key.resolve_optional();
        let serper_key = config.search.serper_api_key.resolve_optional();

        Ok(Self {
            backend: Arc::new(backend),
            embedder: Arc::new(embedder),
            web: Arc::new(BraveWebSearch::new(search, brave_key.clone())?),
            images: Arc::new(BraveImageSearch::new(search, brave_key)?),
            videos: Arc::new(SerperVideoSearch::new(search, serper_key)?),
            fetcher: ContentFetcher::new(search)?,
        })
    }
}

struct Stages {
    interpreter: QueryInterpreter,
    retriever: Retriever,
    fetcher: ContentFetcher,
    indexer: ContentIndexer,
    ranker: Ranker,
    settings: PipelineConfig,
}

/// The answer pipeline. Cheap to clone; clones share capabilities.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<Stages>,
}

impl Pipeline {
    /// Assemble a pipeline from capabilities and configuration.
    pub fn new(capabilities: Capabilities, config: EngineConfig) -> Self {
        let retry = config.retry;
        let Capabilities {
            backend,
            embedder,
            web,
            images,
            videos,
            fetcher,
        } = capabilities;
        Self {
            stages: Arc::new(Stages {
                interpreter: QueryInterpreter::new(
                    Arc::clone(&backend),
                    config.interpret,
                    retry.clone(),
                ),
                retriever: Retriever::new(web, images, videos, retry.clone())
                    .with_branch_timeout(config.pipeline.retrieval_timeout()),
                fetcher,
                indexer: ContentIndexer::new(embedder, config.index, retry.clone()),
                ranker: Ranker::new(backend, retry),
                settings: config.pipeline,
            }),
        }
    }

    /// Run one request. Dropping the returned stream cancels it.
    pub fn run(&self, user_text: impl Into<String>) -> ProgressStream {
        self.run_with_cancel(user_text, CancellationToken::new())
    }

    /// Run one request under an external cancellation token.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn run_with_cancel(
        &self,
        user_text: impl Into<String>,
        cancel: CancellationToken,
    ) -> ProgressStream {
        let (tx, rx) = mpsc::channel(self.stages.settings.channel_capacity.max(1));
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("answerflow.pipeline.request", %request_id);
        let request = Request {
            stages: Arc::clone(&self.stages),
            tx,
            cancel,
            started: Instant::now(),
        };
        let user_text = user_text.into();
        tokio::spawn(async move { request.execute(&user_text).await }.instrument(span));
        ReceiverStream::new(rx)
    }
}

struct Request {
    stages: Arc<Stages>,
    tx: mpsc::Sender<ProgressEvent>,
    cancel: CancellationToken,
    started: Instant,
}

impl Request {
    async fn execute(self, user_text: &str) {
        tracing::trace!(query = user_text, "request received");
        tracing::info!(state = %PipelineState::Start, "request started");

        let mut state = PipelineState::Start;
        let outcome = tokio::select! {
            biased;
            () = self.tx.closed() => {
                self.cancel.cancel();
                Err(PipelineError::Cancelled("caller disconnected".into()))
            }
            () = self.cancel.cancelled() => {
                Err(PipelineError::Cancelled("request cancelled".into()))
            }
            result = self.drive(user_text, &mut state) => result,
        };

        match outcome {
            Ok(()) => tracing::info!(%state, "request completed"),
            Err(PipelineError::Cancelled(reason)) => {
                tracing::info!(%state, reason = %reason, "request cancelled");
                // Best effort: a caller that cancelled but still listens learns why.
                let _ = self.tx.try_send(ProgressEvent::Failed {
                    code: crate::error::error_codes::CANCELLED.to_string(),
                    message: reason,
                });
            }
            Err(err) => {
                tracing::error!(%state, code = err.code(), error = %err, "request failed");
                let failed = ProgressEvent::Failed {
                    code: err.code().to_string(),
                    message: err.message().to_string(),
                };
                if self.tx.send(failed).await.is_err() {
                    tracing::debug!("caller left before the failure was delivered");
                }
                tracing::info!(state = %PipelineState::Failed, "request ended");
            }
        }
    }

    async fn drive(&self, user_text: &str, state: &mut PipelineState) -> Result<()> {
        let stages = &self.stages;
        let cancel = &self.cancel;
        let max_sources = stages.settings.max_ranked_sources;

        let intent = stages.interpreter.parse(user_text, cancel).await?;
        advance(state, PipelineState::IntentParsed);
        self.timing(Milestone::IntentParsed).await?;
        self.emit(ProgressEvent::Intent {
            intent: intent.clone(),
        })
        .await?;

        let retrieval = stages
            .retriever
            .search(&intent, user_text, max_sources, cancel)
            .await;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled("request cancelled".into()));
        }
        advance(state, PipelineState::Retrieved);
        tracing::info!(
            sources = retrieval.sources.len(),
            images = retrieval.images.len(),
            videos = retrieval.videos.len(),
            "retrieval settled"
        );
        self.timing(Milestone::Retrieved).await?;
        let sources = retrieval.sources;
        self.emit(ProgressEvent::Sources {
            sources: sources.clone(),
        })
        .await?;
        self.emit(ProgressEvent::Images {
            images: retrieval.images,
        })
        .await?;
        self.emit(ProgressEvent::Videos {
            videos: retrieval.videos,
        })
        .await?;

        let pages = stages.fetcher.fetch_all(&sources).await;
        advance(state, PipelineState::ContentFetched);
        tracing::info!(requested = sources.len(), fetched = pages.len(), "content fetched");

        let excerpts = stages.indexer.index(&pages, user_text, cancel).await;
        if !excerpts.is_empty() {
            advance(state, PipelineState::Indexed);
            tracing::info!(count = excerpts.len(), "excerpts selected");
        }

        advance(state, PipelineState::Ranking);
        let mut results = if sources.is_empty() {
            tracing::warn!("no sources to rank");
            self.emit(ProgressEvent::AnswerEnd).await?;
            Vec::new()
        } else {
            let mut stream = stages
                .ranker
                .rank(&sources, &intent, &excerpts, cancel)
                .await?;
            let mut assembler = RankedAssembler::new();
            let idle = stages.settings.ranking_idle_timeout();
            loop {
                let Ok(next) = tokio::time::timeout(idle, stream.next()).await else {
                    return Err(PipelineError::Timeout(format!(
                        "ranking stream idle for {} ms",
                        idle.as_millis()
                    )));
                };
                match next {
                    Some(LlmEvent::TextDelta { text }) => {
                        if text.is_empty() {
                            continue;
                        }
                        assembler.push(&text);
                        self.emit(ProgressEvent::Fragment { text }).await?;
                    }
                    Some(LlmEvent::StreamEnd { finish_reason }) => {
                        if finish_reason != FinishReason::Stop {
                            tracing::warn!(%finish_reason, "ranking stream ended early");
                        }
                        break;
                    }
                    Some(LlmEvent::StreamError { error }) => {
                        return Err(PipelineError::Stream(error));
                    }
                    None => {
                        return Err(PipelineError::Stream(
                            "ranking stream closed without an end marker".into(),
                        ));
                    }
                }
            }
            tracing::debug!(fragments = assembler.fragments(), "ranking stream ended");
            self.emit(ProgressEvent::AnswerEnd).await?;
            assembler.finish()?
        };

        if results.len() > max_sources {
            tracing::debug!(
                returned = results.len(),
                kept = max_sources,
                "dropping ranked results beyond the cap"
            );
            results.truncate(max_sources);
        }
        tracing::info!(count = results.len(), "ranking parsed");
        self.emit(ProgressEvent::Ranked { results }).await?;
        self.timing(Milestone::Ranked).await?;
        self.timing(Milestone::Total).await?;
        advance(state, PipelineState::Done);
        self.emit(ProgressEvent::Completed).await
    }

    async fn timing(&self, milestone: Milestone) -> Result<()> {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        tracing::info!(%milestone, elapsed_ms, "milestone reached");
        self.emit(ProgressEvent::Timing {
            milestone,
            elapsed_ms,
        })
        .await
    }

    async fn emit(&self, event: ProgressEvent) -> Result<()> {
        self.tx.send(event).await.map_err(|_| {
            self.cancel.cancel();
            PipelineError::Cancelled("caller disconnected".into())
        })
    }
}

fn advance(state: &mut PipelineState, next: PipelineState) {
    tracing::debug!(from = %state, to = %next, "state transition");
    *state = next;
}
