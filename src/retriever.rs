//! Concurrent fan-out to the web, image and video providers.
//!
//! The three branches run together and never wait on or abort one another.
//! A branch that still fails after its retries contributes an empty list and
//! a warning; [`Retriever::search`] itself cannot fail. Each branch is also
//! bounded by a deadline, so a provider that never answers degrades the same
//! way.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use answerflow_search::{
    ImageResult, ImageSearchProvider, SearchBranch, SourceRecord, VideoResult,
    VideoSearchProvider, WebSearchProvider,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::interpreter::Intent;
use crate::retry::{RetryPolicy, with_retry};

/// Settled output of the three branches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Retrieval {
    /// Web hits in provider order.
    pub sources: Vec<SourceRecord>,
    /// Validated image candidates.
    pub images: Vec<ImageResult>,
    /// Validated video candidates.
    pub videos: Vec<VideoResult>,
}

/// Default deadline for one branch, retries included.
pub const DEFAULT_BRANCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Retrieval fan-out over injected providers.
pub struct Retriever {
    web: Arc<dyn WebSearchProvider>,
    images: Arc<dyn ImageSearchProvider>,
    videos: Arc<dyn VideoSearchProvider>,
    retry: RetryPolicy,
    branch_timeout: Duration,
}

impl Retriever {
    /// Create a retriever.
    pub fn new(
        web: Arc<dyn WebSearchProvider>,
        images: Arc<dyn ImageSearchProvider>,
        videos: Arc<dyn VideoSearchProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            web,
            images,
            videos,
            retry,
            branch_timeout: DEFAULT_BRANCH_TIMEOUT,
        }
    }

    /// Set the per-branch deadline.
    pub fn with_branch_timeout(mut self, timeout: Duration) -> Self {
        self.branch_timeout = timeout;
        self
    }

    /// Run all three branches and wait for every one to settle.
    ///
    /// Web search uses the intent topic and asks for `source_count` hits;
    /// image and video search use the raw user text.
    pub async fn search(
        &self,
        intent: &Intent,
        user_text: &str,
        source_count: usize,
        cancel: &CancellationToken,
    ) -> Retrieval {
        let topic = intent.topic.as_str();
        let limit = self.branch_timeout;
        let web = within(
            limit,
            SearchBranch::Web,
            with_retry(&self.retry, cancel, "web search", || {
                self.web.search(topic, source_count)
            }),
        );
        let images = within(
            limit,
            SearchBranch::Images,
            with_retry(&self.retry, cancel, "image search", || {
                self.images.search_images(user_text)
            }),
        );
        let videos = within(
            limit,
            SearchBranch::Videos,
            with_retry(&self.retry, cancel, "video search", || {
                self.videos.search_videos(user_text)
            }),
        );

        let (web, images, videos) = tokio::join!(web, images, videos);

        let mut sources = settle(SearchBranch::Web, self.web.name(), web);
        sources.truncate(source_count);
        Retrieval {
            sources,
            images: settle(SearchBranch::Images, self.images.name(), images),
            videos: settle(SearchBranch::Videos, self.videos.name(), videos),
        }
    }
}

async fn within<T>(
    limit: Duration,
    branch: SearchBranch,
    attempt: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, attempt).await.unwrap_or_else(|_| {
        Err(PipelineError::Timeout(format!(
            "{branch} search gave no answer within {} ms",
            limit.as_millis()
        )))
    })
}

/// Degrade a failed branch to an empty list.
fn settle<T>(branch: SearchBranch, provider: &str, outcome: Result<Vec<T>>) -> Vec<T> {
    match outcome {
        Ok(items) => {
            tracing::debug!(%branch, provider, count = items.len(), "branch settled");
            items
        }
        Err(err) => {
            tracing::warn!(%branch, provider, code = err.code(), error = %err, "branch degraded to empty");
            Vec::new()
        }
    }
}
