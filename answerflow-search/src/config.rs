//! Retrieval configuration with sensible defaults.
//!
//! [`SearchConfig`] controls provider endpoints, result counts, and the
//! deadlines that keep every retrieval branch bounded in time. API keys are
//! not part of this struct; they are handed to each provider directly.

use crate::error::SearchError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-page fetch deadline in milliseconds.
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 1000;

/// Default cap on validated image and video candidates.
pub const DEFAULT_MEDIA_CAP: usize = 9;

/// Configuration for the retrieval branches and the content fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Base URL of the Brave Search API (web and image search).
    pub brave_base_url: String,
    /// Base URL of the Serper API (video search).
    pub serper_base_url: String,
    /// Per-request timeout for provider API calls, in seconds.
    pub provider_timeout_seconds: u64,
    /// Hard deadline for a single page fetch, in milliseconds.
    pub fetch_timeout_ms: u64,
    /// Deadline for a single media HEAD validation, in milliseconds.
    pub media_check_timeout_ms: u64,
    /// Maximum number of validated media candidates kept per branch.
    pub media_cap: usize,
    /// Maximum characters of extracted text kept per page.
    pub max_content_chars: usize,
    /// Custom User-Agent string. If `None`, rotates through a built-in list
    /// of realistic browser User-Agents.
    pub user_agent: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            brave_base_url: "https://api.search.brave.com".into(),
            serper_base_url: "https://google.serper.dev".into(),
            provider_timeout_seconds: 8,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            media_check_timeout_ms: 3000,
            media_cap: DEFAULT_MEDIA_CAP,
            max_content_chars: crate::content::DEFAULT_MAX_CHARS,
            user_agent: None,
        }
    }
}

impl SearchConfig {
    /// Validates this configuration, returning an error if any field is invalid.
    ///
    /// Checks:
    /// - `media_cap` must be greater than 0
    /// - every timeout must be greater than 0
    /// - both base URLs must parse
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.media_cap == 0 {
            return Err(SearchError::Config("media_cap must be greater than 0".into()));
        }
        if self.provider_timeout_seconds == 0 {
            return Err(SearchError::Config(
                "provider_timeout_seconds must be greater than 0".into(),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(SearchError::Config(
                "fetch_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.media_check_timeout_ms == 0 {
            return Err(SearchError::Config(
                "media_check_timeout_ms must be greater than 0".into(),
            ));
        }
        for (name, base) in [
            ("brave_base_url", &self.brave_base_url),
            ("serper_base_url", &self.serper_base_url),
        ] {
            url::Url::parse(base)
                .map_err(|e| SearchError::Config(format!("{name} is not a valid URL: {e}")))?;
        }
        Ok(())
    }

    /// Per-page fetch deadline.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Per-candidate media validation deadline.
    pub fn media_check_timeout(&self) -> Duration {
        Duration::from_millis(self.media_check_timeout_ms)
    }

    /// Provider API request timeout.
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }
}
