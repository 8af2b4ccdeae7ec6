//! Error types for the answer pipeline.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`PipelineError::code()`].
//! Terminal failures reach the caller as
//! [`ProgressEvent::Failed`](crate::pipeline::ProgressEvent::Failed) with the
//! same code and message.

use answerflow_search::SearchError;

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Authentication with a backend failed (invalid/missing API key).
    pub const AUTH_FAILED: &str = "AUTH_FAILED";

    /// A generation or embedding backend is unreachable or overloaded.
    pub const BACKEND_ERROR: &str = "BACKEND_ERROR";

    /// The backend rejected the request as malformed.
    pub const REQUEST_REJECTED: &str = "REQUEST_REJECTED";

    /// Streaming response broke off or reported an error.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// Request or operation timed out.
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";

    /// The user query could not be turned into an intent.
    pub const INTERPRETATION_FAILED: &str = "INTERPRETATION_FAILED";

    /// Backend text was not the structured data that was asked for.
    pub const PARSE_ERROR: &str = "PARSE_ERROR";

    /// A search, image or video provider failed.
    pub const PROVIDER_ERROR: &str = "PROVIDER_ERROR";

    /// The embedding backend returned unusable vectors.
    pub const EMBEDDING_FAILED: &str = "EMBEDDING_FAILED";

    /// The request was cancelled by the caller.
    pub const CANCELLED: &str = "CANCELLED";
}

/// Errors produced by the answer pipeline.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Authentication failed (401/403).
    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    Auth(String),

    /// Transport failure, rate limit (429) or server error (5xx).
    #[error("[{}] {}", error_codes::BACKEND_ERROR, .0)]
    Backend(String),

    /// Any other 4xx.
    #[error("[{}] {}", error_codes::REQUEST_REJECTED, .0)]
    Rejected(String),

    /// Streaming response encountered an error.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    Stream(String),

    /// Request or operation timed out.
    #[error("[{}] {}", error_codes::TIMEOUT_ERROR, .0)]
    Timeout(String),

    /// Intent extraction failed.
    #[error("[{}] {}", error_codes::INTERPRETATION_FAILED, .0)]
    Interpretation(String),

    /// Structured output could not be parsed.
    #[error("[{}] {}", error_codes::PARSE_ERROR, .0)]
    Parse(String),

    /// Retrieval provider failed.
    #[error("[{}] {}", error_codes::PROVIDER_ERROR, .0)]
    Provider(String),

    /// Embedding response was unusable.
    #[error("[{}] {}", error_codes::EMBEDDING_FAILED, .0)]
    Embedding(String),

    /// The request was cancelled.
    #[error("[{}] {}", error_codes::CANCELLED, .0)]
    Cancelled(String),
}

impl PipelineError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Auth(_) => error_codes::AUTH_FAILED,
            Self::Backend(_) => error_codes::BACKEND_ERROR,
            Self::Rejected(_) => error_codes::REQUEST_REJECTED,
            Self::Stream(_) => error_codes::STREAM_FAILED,
            Self::Timeout(_) => error_codes::TIMEOUT_ERROR,
            Self::Interpretation(_) => error_codes::INTERPRETATION_FAILED,
            Self::Parse(_) => error_codes::PARSE_ERROR,
            Self::Provider(_) => error_codes::PROVIDER_ERROR,
            Self::Embedding(_) => error_codes::EMBEDDING_FAILED,
            Self::Cancelled(_) => error_codes::CANCELLED,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Config(m)
            | Self::Auth(m)
            | Self::Backend(m)
            | Self::Rejected(m)
            | Self::Stream(m)
            | Self::Timeout(m)
            | Self::Interpretation(m)
            | Self::Parse(m)
            | Self::Provider(m)
            | Self::Embedding(m)
            | Self::Cancelled(m) => m,
        }
    }

    /// Returns true if this error represents a transient failure that can be retried.
    ///
    /// Only connection-level failures, rate limits, server errors and timeouts
    /// qualify. A stream that broke off mid-answer is not retried: fragments
    /// have already been delivered.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout(_))
    }
}

impl From<SearchError> for PipelineError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Config(msg) => Self::Config(msg),
            SearchError::Timeout(msg) => Self::Timeout(msg),
            other => Self::Provider(other.to_string()),
        }
    }
}

/// Convenience alias for pipeline results.
pub type Result<T> = std::result::Result<T, PipelineError>;
