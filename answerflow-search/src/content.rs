//! Page content fetching and HTML text extraction.
//!
//! [`ContentFetcher`] downloads search hits under a hard per-page deadline and
//! reduces the markup to plain text. A page that is slow, unreachable, non-2xx
//! or empty is simply absent from the batch; nothing here returns an error to
//! the caller for a single bad page.

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::http;
use crate::types::{ContentRecord, SourceRecord};
use futures::stream::{FuturesUnordered, StreamExt};
use scraper::{ElementRef, Html};
use std::time::Duration;

/// Default maximum characters to return from extracted content.
pub const DEFAULT_MAX_CHARS: usize = 100_000;

/// Slack added on top of the per-page deadline for the batch backstop.
const BATCH_GRACE: Duration = Duration::from_millis(250);

/// Elements removed before text extraction, including all their content.
const NON_CONTENT_TAGS: &[&str] = &[
    "script", "style", "head", "nav", "footer", "iframe", "img", "noscript", "svg",
];

/// Fetches pages concurrently, each bounded by the same short deadline.
#[derive(Debug, Clone)]
pub struct ContentFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_chars: usize,
}

impl ContentFetcher {
    /// Build a fetcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::Http`] if the client cannot be constructed.
    pub fn new(config: &SearchConfig) -> Result<Self> {
        Ok(Self::with_client(http::build_client(config)?, config))
    }

    /// Build a fetcher around an existing client.
    pub fn with_client(client: reqwest::Client, config: &SearchConfig) -> Self {
        Self {
            client,
            timeout: config.fetch_timeout(),
            max_chars: config.max_content_chars,
        }
    }

    /// Per-page deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Deadline for a whole batch: the longest child deadline plus a fixed grace.
    pub fn batch_deadline(&self) -> Duration {
        self.timeout + BATCH_GRACE
    }

    /// Fetch one page and extract its text, or `None` if it cannot be had in time.
    ///
    /// Exceeding the deadline drops the in-flight request.
    pub async fn fetch(&self, source: &SourceRecord) -> Option<ContentRecord> {
        match tokio::time::timeout(self.timeout, self.fetch_text(&source.url)).await {
            Ok(Ok(text)) => Some(ContentRecord {
                source: source.clone(),
                text,
            }),
            Ok(Err(err)) => {
                tracing::debug!(url = %source.url, error = %err, "skipping page");
                None
            }
            Err(_) => {
                tracing::debug!(
                    url = %source.url,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "page fetch timed out"
                );
                None
            }
        }
    }

    /// Fetch every source concurrently.
    ///
    /// Returns the successful pages in input order; failures are omitted,
    /// never replaced with placeholders. Pages that finished before the
    /// batch deadline are kept even if others are still in flight.
    pub async fn fetch_all(&self, sources: &[SourceRecord]) -> Vec<ContentRecord> {
        let fetches = sources.iter().map(|source| self.fetch(source));
        let (outcomes, abandoned) = settle_within(self.batch_deadline(), fetches).await;
        if abandoned > 0 {
            tracing::warn!(
                requested = sources.len(),
                abandoned,
                "content batch exceeded its deadline"
            );
        }
        let pages: Vec<ContentRecord> = outcomes.into_iter().flatten().collect();
        tracing::debug!(
            requested = sources.len(),
            fetched = pages.len(),
            "content batch settled"
        );
        pages
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SearchError::from_reqwest("page request failed", &e))?;
        if !response.status().is_success() {
            return Err(http::status_error(response).await);
        }
        let html = response
            .text()
            .await
            .map_err(|e| SearchError::from_reqwest("page body unreadable", &e))?;
        let max_chars = self.max_chars;
        tokio::task::spawn_blocking(move || extract_text_with_limit(&html, max_chars))
            .await
            .map_err(|e| SearchError::Parse(format!("text extraction task failed: {e}")))?
    }
}

/// Drive `futures` concurrently until all finish or `deadline` passes.
///
/// Returns the finished outputs in input order and how many were abandoned.
async fn settle_within<F, T>(
    deadline: Duration,
    futures: impl IntoIterator<Item = F>,
) -> (Vec<T>, usize)
where
    F: std::future::Future<Output = T>,
{
    let mut pending: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(index, future)| async move { (index, future.await) })
        .collect();
    let mut finished = Vec::with_capacity(pending.len());

    let backstop = tokio::time::sleep(deadline);
    tokio::pin!(backstop);
    loop {
        tokio::select! {
            next = pending.next() => match next {
                Some(done) => finished.push(done),
                None => break,
            },
            () = &mut backstop => break,
        }
    }

    finished.sort_by_key(|(index, _)| *index);
    let outputs = finished.into_iter().map(|(_, output)| output).collect();
    (outputs, pending.len())
}

/// Extract readable text from raw HTML.
///
/// # Errors
///
/// Returns [`SearchError::Parse`] if no extractable content is found.
pub fn extract_text(html: &str) -> Result<String> {
    extract_text_with_limit(html, DEFAULT_MAX_CHARS)
}

/// Extract readable text from raw HTML with a custom character limit.
///
/// Parses the document once and collects every text node of the page,
/// skipping the subtrees of non-content elements. Every whitespace run is
/// collapsed into a single space.
///
/// # Errors
///
/// Returns [`SearchError::Parse`] if no extractable content is found.
pub fn extract_text_with_limit(html: &str, max_chars: usize) -> Result<String> {
    let document = Html::parse_document(html);
    let mut pieces = Vec::new();
    collect_text(document.root_element(), &mut pieces);

    let text = collapse_whitespace(&pieces.join(" "));
    if text.is_empty() {
        return Err(SearchError::Parse("no extractable content found".into()));
    }

    Ok(truncate_to_limit(&text, max_chars))
}

/// Depth-first walk that skips [`NON_CONTENT_TAGS`] subtrees.
fn collect_text<'a>(element: ElementRef<'a>, pieces: &mut Vec<&'a str>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            pieces.push(text);
        } else if let Some(child) = ElementRef::wrap(child) {
            if !NON_CONTENT_TAGS.contains(&child.value().name()) {
                collect_text(child, pieces);
            }
        }
    }
}

/// Collapse every whitespace run (including newlines) into one space.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate text to the given character limit.
fn truncate_to_limit(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => text[..end].to_owned(),
        None => text.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_content_from_article() {
        let html = r#"<html><body>
            <nav>Navigation stuff</nav>
            <article>Article content here</article>
            <footer>Footer stuff</footer>
        </body></html>"#;
        let text = extract_text(html).expect("should extract");
        assert_eq!(text, "Article content here");
    }

    #[test]
    fn fallback_to_body() {
        let html = "<html><body>Body content only</body></html>";
        let text = extract_text(html).expect("should extract");
        assert_eq!(text, "Body content only");
    }

    #[test]
    fn strips_scripts_styles_and_head() {
        let html = r#"<html><head><title>Title text</title></head><body>
            <p>Real content</p>
            <script>var x = 1; alert('hi');</script>
            <style>.foo { color: red; }</style>
        </body></html>"#;
        let text = extract_text(html).expect("should extract");
        assert!(text.contains("Real content"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("Title text"));
    }

    #[test]
    fn strips_iframes_and_images() {
        let html = r#"<html><body>
            <p>Visible content</p>
            <img src="a.png" alt="Alt words">
            <iframe src="ad.html">Ad frame</iframe>
        </body></html>"#;
        let text = extract_text(html).expect("should extract");
        assert_eq!(text, "Visible content");
    }

    #[test]
    fn head_tag_not_confused_with_header() {
        let html = "<html><head><meta charset=utf-8></head><body><header>Masthead</header><p>Story</p></body></html>";
        let text = extract_text(html).expect("should extract");
        assert!(text.contains("Masthead"));
        assert!(text.contains("Story"));
    }

    #[test]
    fn nav_tag_not_confused_with_similar_tags() {
        let html = "<html><body><nav>Skip this</nav><p>Keep this navigate text</p></body></html>";
        let text = extract_text(html).expect("should extract");
        assert!(!text.contains("Skip this"));
        assert!(text.contains("navigate text"));
    }

    #[test]
    fn whitespace_collapsed_to_single_spaces() {
        let html = "<html><body>Word1    Word2\n\n\n\n\nWord3\t\tWord4</body></html>";
        let text = extract_text(html).expect("should extract");
        assert_eq!(text, "Word1 Word2 Word3 Word4");
    }

    #[test]
    fn empty_html_returns_parse_error() {
        let err = extract_text("").unwrap_err();
        assert!(err.to_string().contains("no extractable content"));
    }

    #[test]
    fn only_scripts_and_styles_returns_error() {
        let html = r#"<html>
            <head><style>body{color:red}</style></head>
            <body>
                <script>console.log('hello');</script>
                <style>.hidden{display:none}</style>
            </body>
        </html>"#;
        assert!(extract_text(html).is_err());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let body = "é".repeat(200);
        let html = format!("<html><body>{body}</body></html>");
        let text = extract_text_with_limit(&html, 50).expect("should extract");
        assert_eq!(text.chars().count(), 50);
    }

    #[test]
    fn every_article_and_loose_paragraph_is_kept() {
        let html = "<body><article>Related: teaser card</article>\
                    <p>The actual main story body text.</p>\
                    <article>Second card</article></body>";
        let text = extract_text(html).expect("should extract");
        assert_eq!(
            text,
            "Related: teaser card The actual main story body text. Second card"
        );
    }

    #[test]
    fn void_img_does_not_swallow_following_content() {
        let html = r#"<img src="a.png"><p>Main story text here.</p><p>More</p><img src="b.png"></img><p>Tail</p>"#;
        let text = extract_text(html).expect("should extract");
        assert_eq!(text, "Main story text here. More Tail");
    }

    #[test]
    fn nested_non_content_subtrees_are_skipped_whole() {
        let html = "<body><nav><ul><li>Home</li><li><nav>Inner</nav>After inner</li></ul></nav>\
                    <p>Story</p><footer><div>Contact</div></footer></body>";
        let text = extract_text(html).expect("should extract");
        assert_eq!(text, "Story");
    }

    #[tokio::test]
    async fn backstop_keeps_finished_outputs_in_order() {
        let futures: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = u32> + Send>>> = vec![
            Box::pin(std::future::pending()),
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                2
            }),
            Box::pin(async { 3 }),
        ];
        let (outputs, abandoned) = settle_within(Duration::from_millis(200), futures).await;
        assert_eq!(outputs, vec![2, 3]);
        assert_eq!(abandoned, 1);
    }

    #[test]
    fn batch_deadline_exceeds_page_deadline() {
        let fetcher = ContentFetcher::new(&SearchConfig::default()).expect("client");
        assert_eq!(fetcher.timeout(), Duration::from_millis(1000));
        assert!(fetcher.batch_deadline() > fetcher.timeout());
    }
}
