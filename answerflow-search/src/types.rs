//! Core record types shared by the providers and the content fetcher.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single web search hit, before any content extraction.
///
/// Identity is the URL, but URLs are not unique across providers and no
/// deduplication happens here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Page title as reported by the provider.
    pub title: String,
    /// Target URL.
    pub url: String,
    /// Provider-supplied description of the page.
    pub snippet: String,
    /// Site icon URL; empty when the provider has none.
    #[serde(default)]
    pub favicon_url: String,
}

/// A [`SourceRecord`] enriched with the readable text of its page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// The search hit this content was fetched for.
    pub source: SourceRecord,
    /// Plain text extracted from the page markup, whitespace collapsed.
    pub text: String,
}

impl ContentRecord {
    /// Whether the extracted body is empty.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// An image search candidate that passed link validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageResult {
    /// Image title or alt text.
    pub title: String,
    /// Direct link to the image resource.
    pub link: String,
}

/// A video search candidate whose thumbnail passed link validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoResult {
    /// Video title.
    #[serde(default)]
    pub title: String,
    /// Thumbnail image URL (the validated link).
    pub image_url: String,
    /// Watch page URL.
    pub link: String,
}

/// The three independent retrieval branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchBranch {
    /// Web page search.
    Web,
    /// Image search.
    Images,
    /// Video search.
    Videos,
}

impl SearchBranch {
    /// Returns the human-readable name of this branch.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Images => "images",
            Self::Videos => "videos",
        }
    }
}

impl fmt::Display for SearchBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_record_deserializes_without_favicon() {
        let json = r#"{"title":"T","url":"https://a.com","snippet":"s"}"#;
        let record: SourceRecord = serde_json::from_str(json).expect("deserialize");
        assert_eq!(record.url, "https://a.com");
        assert!(record.favicon_url.is_empty());
    }

    #[test]
    fn content_record_emptiness() {
        let source = SourceRecord {
            title: "T".into(),
            url: "https://a.com".into(),
            snippet: String::new(),
            favicon_url: String::new(),
        };
        let empty = ContentRecord {
            source: source.clone(),
            text: "   ".into(),
        };
        let full = ContentRecord {
            source,
            text: "body".into(),
        };
        assert!(empty.is_empty());
        assert!(!full.is_empty());
    }

    #[test]
    fn branch_display() {
        assert_eq!(SearchBranch::Web.to_string(), "web");
        assert_eq!(SearchBranch::Images.to_string(), "images");
        assert_eq!(SearchBranch::Videos.to_string(), "videos");
    }

    #[test]
    fn branch_serializes_lowercase() {
        let json = serde_json::to_string(&SearchBranch::Videos).expect("serialize");
        assert_eq!(json, "\"videos\"");
    }
}
