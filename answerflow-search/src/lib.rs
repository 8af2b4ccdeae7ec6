//! # answerflow-search
//!
//! Retrieval for answerflow: web, image and video search providers plus a
//! bounded-time page content fetcher.
//!
//! ## Design
//!
//! - One trait per retrieval branch so callers can inject real providers or
//!   fakes independently
//! - Brave Search for web pages and images, Serper for videos
//! - Image and video candidates are kept only after a `HEAD` check confirms
//!   an `image/*` response; survivors are capped
//! - Page fetches run concurrently, each under a hard deadline; a slow or
//!   broken page is dropped, never reported as an error
//!
//! ## Security
//!
//! - API keys never appear in error messages
//! - Search queries are logged only at trace level
//! - Provider snippets are stripped of inline markup

pub mod config;
pub mod content;
pub mod error;
pub mod http;
pub mod media;
pub mod provider;
pub mod providers;
pub mod types;

pub use config::SearchConfig;
pub use content::ContentFetcher;
pub use error::{Result, SearchError};
pub use media::MediaValidator;
pub use provider::{ImageSearchProvider, VideoSearchProvider, WebSearchProvider};
pub use providers::{BraveImageSearch, BraveWebSearch, SerperVideoSearch};
pub use types::{ContentRecord, ImageResult, SearchBranch, SourceRecord, VideoResult};
