//! Trait definitions for pluggable retrieval providers.
//!
//! Each retrieval branch (web, images, videos) is an independent trait so a
//! caller can inject real HTTP providers or in-process fakes per branch.

use async_trait::async_trait;

use crate::error::SearchError;
use crate::types::{ImageResult, SourceRecord, VideoResult};

/// A web search backend.
///
/// Results come back in provider order; no local re-ranking happens here.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    /// Returns the provider name (e.g. `"brave"`).
    fn name(&self) -> &str;

    /// Search for `query`, asking for at most `count` results.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] if the request fails or the response cannot
    /// be parsed.
    async fn search(&self, query: &str, count: usize) -> Result<Vec<SourceRecord>, SearchError>;
}

/// An image search backend whose results have already been link-validated.
#[async_trait]
pub trait ImageSearchProvider: Send + Sync {
    /// Returns the provider name.
    fn name(&self) -> &str;

    /// Search images for free text.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] if the provider request itself fails. Individual
    /// candidates that fail validation are dropped, not reported.
    async fn search_images(&self, query: &str) -> Result<Vec<ImageResult>, SearchError>;
}

/// A video search backend whose thumbnails have already been link-validated.
#[async_trait]
pub trait VideoSearchProvider: Send + Sync {
    /// Returns the provider name.
    fn name(&self) -> &str;

    /// Search videos for free text.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] if the provider request itself fails.
    async fn search_videos(&self, query: &str) -> Result<Vec<VideoResult>, SearchError>;
}
