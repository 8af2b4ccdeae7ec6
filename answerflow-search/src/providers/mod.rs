//! HTTP provider implementations.
//!
//! Brave Search backs the web and image branches; Serper backs the video
//! branch. Each provider takes its API key directly and degrades to a
//! [`crate::SearchError::Config`] when none is configured.

pub mod brave;
pub mod serper;

pub use brave::{BraveImageSearch, BraveWebSearch};
pub use serper::SerperVideoSearch;

/// Strip inline markup (e.g. `<strong>`) from provider snippets.
pub(crate) fn strip_markup(text: &str) -> String {
    if !text.contains('<') {
        return text.trim().to_owned();
    }
    let fragment = scraper::Html::parse_fragment(text);
    fragment
        .root_element()
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reject an empty API key before any request goes out.
pub(crate) fn require_key<'a>(
    key: &'a Option<String>,
    provider: &str,
) -> Result<&'a str, crate::SearchError> {
    key.as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| crate::SearchError::Config(format!("missing {provider} API key")))
}
