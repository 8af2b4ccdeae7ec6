//! Answerflow: retrieval-augmented, streamed answers to free-text queries.
//!
//! One request flows through a fixed sequence of stages:
//! user text → intent → web/image/video search → page content → excerpts →
//! streamed ranking → caller.
//!
//! # Architecture
//!
//! - **QueryInterpreter**: one generation call turns the query into an [`Intent`]
//! - **Retriever**: three concurrent search branches, each degrading to empty
//! - **ContentFetcher**: page text under a hard per-page deadline
//!   (in `answerflow-search`)
//! - **ContentIndexer**: chunks, embeds and searches page text in a
//!   request-scoped index
//! - **Ranker**: a streamed generation call producing `finalResults`
//! - **Pipeline**: sequences the stages and emits [`ProgressEvent`]s
//!
//! Generation, embeddings and search are injected through
//! [`pipeline::Capabilities`], so tests run without a network.

pub mod config;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod interpreter;
pub mod llm;
pub mod pipeline;
pub mod ranker;
pub mod retriever;
pub mod retry;

pub use config::EngineConfig;
pub use error::{PipelineError, Result};
pub use interpreter::Intent;
pub use pipeline::{Capabilities, Milestone, Pipeline, PipelineState, ProgressEvent, ProgressStream};
pub use ranker::RankedResult;
pub use retry::RetryPolicy;
