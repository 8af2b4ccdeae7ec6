//! Error types for the answerflow-search crate.
//!
//! All errors use stable string messages suitable for display to users
//! and programmatic handling. No API keys or sensitive data appear in
//! error messages.

/// Errors that can occur while talking to search providers or origin servers.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// An HTTP request could not be sent or its body could not be read.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A request exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// A provider response or page could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid configuration (including a missing API key).
    #[error("config error: {0}")]
    Config(String),

    /// A provider answered with a non-success status.
    #[error("provider returned HTTP {status}: {message}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Response body or reason phrase.
        message: String,
    },
}

impl SearchError {
    /// Whether retrying the same request could plausibly succeed.
    ///
    /// Transport failures, timeouts, rate limits and 5xx responses are
    /// transient; configuration, parse and other 4xx errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Provider { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) | Self::Config(_) => false,
        }
    }

    /// Map a `reqwest` transport error, keeping timeouts distinguishable.
    pub(crate) fn from_reqwest(context: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("{context}: {err}"))
        } else {
            Self::Http(format!("{context}: {err}"))
        }
    }
}

/// Convenience type alias for answerflow-search results.
pub type Result<T> = std::result::Result<T, SearchError>;
