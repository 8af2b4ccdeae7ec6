//! Brave Search API: web and image search.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::http;
use crate::media::MediaValidator;
use crate::provider::{ImageSearchProvider, WebSearchProvider};
use crate::types::{ImageResult, SourceRecord};

use super::{require_key, strip_markup};

const TOKEN_HEADER: &str = "X-Subscription-Token";

#[derive(Debug, Deserialize)]
struct WebResponse {
    web: Option<WebSection>,
}

#[derive(Debug, Deserialize)]
struct WebSection {
    #[serde(default)]
    results: Vec<WebHit>,
}

#[derive(Debug, Deserialize)]
struct WebHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
    profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
struct Profile {
    #[serde(default)]
    img: String,
}

#[derive(Debug, Deserialize)]
struct ImageResponse {
    #[serde(default)]
    results: Vec<ImageHit>,
}

#[derive(Debug, Deserialize)]
struct ImageHit {
    #[serde(default)]
    title: String,
    properties: Option<ImageProperties>,
}

#[derive(Debug, Deserialize)]
struct ImageProperties {
    url: Option<String>,
    title: Option<String>,
}

/// Build the web search endpoint URL with query parameters.
fn web_search_url(base: &str, query: &str, count: usize) -> Result<url::Url> {
    let mut url = url::Url::parse(&format!(
        "{}/res/v1/web/search",
        base.trim_end_matches('/')
    ))
    .map_err(|e| SearchError::Config(format!("invalid Brave base URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("q", query)
        .append_pair("count", &count.to_string());
    Ok(url)
}

fn image_search_url(base: &str, query: &str) -> Result<url::Url> {
    let mut url = url::Url::parse(&format!(
        "{}/res/v1/images/search",
        base.trim_end_matches('/')
    ))
    .map_err(|e| SearchError::Config(format!("invalid Brave base URL: {e}")))?;
    url.query_pairs_mut()
        .append_pair("q", query)
        .append_pair("spellcheck", "1");
    Ok(url)
}

async fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: url::Url,
    key: &str,
) -> Result<T> {
    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "application/json")
        .header(TOKEN_HEADER, key)
        .send()
        .await
        .map_err(|e| SearchError::from_reqwest("Brave request failed", &e))?;
    if !response.status().is_success() {
        return Err(http::status_error(response).await);
    }
    response
        .json::<T>()
        .await
        .map_err(|e| SearchError::Parse(format!("invalid Brave response: {e}")))
}

/// Brave web search.
#[derive(Debug, Clone)]
pub struct BraveWebSearch {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BraveWebSearch {
    /// Create a web search provider.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Http`] if the HTTP client cannot be constructed.
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: http::build_client(config)?,
            base_url: config.brave_base_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl WebSearchProvider for BraveWebSearch {
    fn name(&self) -> &str {
        "brave"
    }

    async fn search(&self, query: &str, count: usize) -> Result<Vec<SourceRecord>> {
        let key = require_key(&self.api_key, "Brave")?;
        tracing::trace!(query, count, "Brave web search");

        let url = web_search_url(&self.base_url, query, count)?;
        let body: WebResponse = get_json(&self.client, url, key).await?;
        let section = body
            .web
            .ok_or_else(|| SearchError::Parse("Brave response has no web results".into()))?;

        Ok(section
            .results
            .into_iter()
            .filter(|hit| !hit.url.is_empty())
            .take(count)
            .map(|hit| SourceRecord {
                title: strip_markup(&hit.title),
                url: hit.url,
                snippet: strip_markup(&hit.description),
                favicon_url: hit.profile.map(|p| p.img).unwrap_or_default(),
            })
            .collect())
    }
}

/// Brave image search with `HEAD` validation of every candidate.
#[derive(Debug, Clone)]
pub struct BraveImageSearch {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    validator: MediaValidator,
}

impl BraveImageSearch {
    /// Create an image search provider.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Http`] if the HTTP client cannot be constructed.
    pub fn new(config: &SearchConfig, api_key: Option<String>) -> Result<Self> {
        let client = http::build_client(config)?;
        Ok(Self {
            validator: MediaValidator::with_client(client.clone(), config),
            client,
            base_url: config.brave_base_url.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl ImageSearchProvider for BraveImageSearch {
    fn name(&self) -> &str {
        "brave-images"
    }

    async fn search_images(&self, query: &str) -> Result<Vec<ImageResult>> {
        let key = require_key(&self.api_key, "Brave")?;
        tracing::trace!(query, "Brave image search");

        let url = image_search_url(&self.base_url, query)?;
        let body: ImageResponse = get_json(&self.client, url, key).await?;

        let candidates: Vec<ImageResult> = body
            .results
            .into_iter()
            .filter_map(|hit| {
                let props = hit.properties?;
                let link = props.url?;
                let title = props.title.unwrap_or(hit.title);
                Some(ImageResult { title, link })
            })
            .collect();
        let offered = candidates.len();

        let kept = self
            .validator
            .retain_valid(candidates, |c| c.link.as_str())
            .await;
        tracing::debug!(offered, kept = kept.len(), "image candidates validated");
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> SearchConfig {
        SearchConfig {
            brave_base_url: server.uri(),
            media_check_timeout_ms: 500,
            ..Default::default()
        }
    }

    #[test]
    fn web_url_encodes_query() {
        let url = web_search_url("https://api.example.com/", "climate change", 9).expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/res/v1/web/search?q=climate+change&count=9"
        );
    }

    #[tokio::test]
    async fn web_search_maps_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/res/v1/web/search"))
            .and(query_param("q", "climate change"))
            .and(query_param("count", "2"))
            .and(header(TOKEN_HEADER, "brave-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "web": {"results": [
                    {"title": "IPCC", "url": "https://ipcc.ch", "description": "The <strong>IPCC</strong> report",
                     "profile": {"img": "https://imgs/ipcc.png"}},
                    {"title": "NASA", "url": "https://climate.nasa.gov", "description": "Vital signs"}
                ]}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider =
            BraveWebSearch::new(&config_for(&server), Some("brave-key".into())).expect("provider");
        let results = provider.search("climate change", 2).await.expect("results");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].snippet, "The IPCC report");
        assert_eq!(results[0].favicon_url, "https://imgs/ipcc.png");
        assert_eq!(results[1].url, "https://climate.nasa.gov");
        assert!(results[1].favicon_url.is_empty());
    }

    #[tokio::test]
    async fn web_search_without_web_section_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/res/v1/web/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"query": {}})))
            .mount(&server)
            .await;

        let provider = BraveWebSearch::new(&config_for(&server), Some("k".into())).expect("provider");
        let err = provider.search("x", 5).await.unwrap_err();
        assert!(matches!(err, SearchError::Parse(_)));
    }

    #[tokio::test]
    async fn web_search_maps_status_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/res/v1/web/search"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let provider = BraveWebSearch::new(&config_for(&server), Some("k".into())).expect("provider");
        let err = provider.search("x", 5).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn missing_key_fails_before_request() {
        let provider = BraveWebSearch::new(&SearchConfig::default(), None).expect("provider");
        let err = provider.search("x", 5).await.unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[tokio::test]
    async fn image_search_keeps_only_validated_links() {
        let server = MockServer::start().await;
        let good = format!("{}/a.jpg", server.uri());
        let bad = format!("{}/b.html", server.uri());
        Mock::given(method("GET"))
            .and(path("/res/v1/images/search"))
            .and(query_param("spellcheck", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    {"title": "outer", "properties": {"url": bad, "title": "Bad"}},
                    {"title": "Good outer", "properties": {"url": good}},
                    {"title": "No properties"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/a.jpg"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/jpeg"))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/b.html"))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
            .mount(&server)
            .await;

        let provider =
            BraveImageSearch::new(&config_for(&server), Some("k".into())).expect("provider");
        let images = provider.search_images("cats").await.expect("images");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].link, good);
        assert_eq!(images[0].title, "Good outer");
    }
}
