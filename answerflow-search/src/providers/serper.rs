//! Serper video search.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::http;
use crate::media::MediaValidator;
use crate::provider::VideoSearchProvider;
use crate::types::VideoResult;

use super::{require_key, strip_markup};

#[derive(Debug, Deserialize)]
struct VideoResponse {
    videos: Option<Vec<VideoHit>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    image_url: Option<String>,
}

/// Serper `/videos` search with thumbnail validation.
#[derive(Debug, Clone)]
pub struct SerperVideoSearch {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    validator: MediaValidator,
}

impl SerperVideoSearch {
    /// Create a video search provider.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Http`] if the HTTP client cannot be constructed.
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Result<Self> {
        let client = http::build_client(config)?;
        Ok(Self {
            validator: MediaValidator::with_client(client.clone(), config),
            client,
            base_url: config.serper_base_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl VideoSearchProvider for SerperVideoSearch {
    fn name(&self) -> &str {
        "serper-videos"
    }

    async fn search_videos(&self, query: &str) -> Result<Vec<VideoResult>> {
        let key = require_key(&self.api_key, "Serper")?;
        tracing::trace!(query, "Serper video search");

        let url = format!("{}/videos", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", key)
            .json(&serde_json::json!({ "q": query }))
            .send()
            .await
            .map_err(|e| SearchError::from_reqwest("Serper request failed", &e))?;
        if !response.status().is_success() {
            return Err(http::status_error(response).await);
        }
        let body: VideoResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(format!("invalid Serper response: {e}")))?;
        let videos = body
            .videos
            .ok_or_else(|| SearchError::Parse("Serper response has no videos".into()))?;

        let candidates: Vec<VideoResult> = videos
            .into_iter()
            .filter_map(|hit| {
                let image_url = hit.image_url?;
                Some(VideoResult {
                    title: strip_markup(&hit.title),
                    image_url,
                    link: hit.link,
                })
            })
            .collect();
        let offered = candidates.len();

        let kept = self
            .validator
            .retain_valid(candidates, |c| c.image_url.as_str())
            .await;
        tracing::debug!(offered, kept = kept.len(), "video candidates validated");
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_query_and_validates_thumbnails() {
        let server = MockServer::start().await;
        let thumb = format!("{}/thumb.jpg", server.uri());
        let broken = format!("{}/broken.jpg", server.uri());

        Mock::given(method("POST"))
            .and(path("/videos"))
            .and(header("X-API-KEY", "serper-key"))
            .and(body_json(json!({"q": "rust async"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "videos": [
                    {"title": "Async Rust", "link": "https://video/1", "imageUrl": thumb},
                    {"title": "Broken", "link": "https://video/2", "imageUrl": broken},
                    {"title": "No thumb", "link": "https://video/3"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/thumb.jpg"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/broken.jpg"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let config = SearchConfig {
            serper_base_url: server.uri(),
            media_check_timeout_ms: 500,
            ..Default::default()
        };
        let provider = SerperVideoSearch::new(&config, Some("serper-key".into())).expect("provider");
        let videos = provider.search_videos("rust async").await.expect("videos");
        assert_eq!(
            videos,
            vec![VideoResult {
                title: "Async Rust".into(),
                image_url: thumb,
                link: "https://video/1".into(),
            }]
        );
    }

    #[tokio::test]
    async fn missing_videos_field_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"searchParameters": {}})))
            .mount(&server)
            .await;

        let config = SearchConfig {
            serper_base_url: server.uri(),
            ..Default::default()
        };
        let provider = SerperVideoSearch::new(&config, Some("k".into())).expect("provider");
        let err = provider.search_videos("x").await.unwrap_err();
        assert!(matches!(err, SearchError::Parse(_)));
    }

    #[tokio::test]
    async fn missing_key_is_config_error() {
        let provider = SerperVideoSearch::new(&SearchConfig::default(), None).expect("provider");
        let err = provider.search_videos("x").await.unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
        assert!(!err.is_retryable());
    }
}
