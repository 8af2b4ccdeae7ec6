//! Link validation for image and video candidates.
//!
//! A candidate is kept only if a `HEAD` request to its image URL answers 2xx
//! with an `image/*` content type within the per-candidate deadline. All
//! checks run concurrently; survivors keep provider order and are capped.

use std::time::Duration;

use crate::config::SearchConfig;
use crate::error::Result;
use crate::http;

/// Concurrent `HEAD` validator for media links.
#[derive(Debug, Clone)]
pub struct MediaValidator {
    client: reqwest::Client,
    timeout: Duration,
    cap: usize,
}

impl MediaValidator {
    /// Build a validator with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SearchError::Http`] if the client cannot be constructed.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        Ok(Self::with_client(http::build_client(config)?, config))
    }

    /// Build a validator around an existing client.
    pub fn with_client(client: reqwest::Client, config: &SearchConfig) -> Self {
        Self {
            client,
            timeout: config.media_check_timeout(),
            cap: config.media_cap,
        }
    }

    /// Maximum number of candidates kept.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Whether `url` currently serves an image.
    ///
    /// Errors and timeouts count as rejection.
    pub async fn is_image(&self, url: &str) -> bool {
        if url.trim().is_empty() {
            return false;
        }
        let request = self.client.head(url).send();
        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(response)) => {
                if !response.status().is_success() {
                    tracing::debug!(url, status = response.status().as_u16(), "media link rejected");
                    return false;
                }
                let is_image = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"));
                if !is_image {
                    tracing::debug!(url, "media link is not an image");
                }
                is_image
            }
            Ok(Err(err)) => {
                tracing::debug!(url, error = %err, "media link check failed");
                false
            }
            Err(_) => {
                tracing::debug!(url, "media link check timed out");
                false
            }
        }
    }

    /// Keep the candidates whose link validates, in input order, up to the cap.
    pub async fn retain_valid<T, F>(&self, candidates: Vec<T>, link: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        let checks = candidates.iter().map(|c| self.is_image(link(c)));
        let verdicts = futures::future::join_all(checks).await;
        candidates
            .into_iter()
            .zip(verdicts)
            .filter_map(|(candidate, ok)| ok.then_some(candidate))
            .take(self.cap)
            .collect()
    }
}
