//! Configuration types for the answer pipeline.
//!
//! Loaded from TOML. Every section is optional and falls back to defaults, so
//! an empty file is a valid configuration.
//!
//! ```toml
//! [llm]
//! base_url = "https://api.groq.com/openai"
//! model = "llama-3.1-70b-versatile"
//! api_key = { type = "env", var = "GROQ_API_KEY" }
//!
//! [search]
//! brave_api_key = { type = "env", var = "BRAVE_SEARCH_API_KEY" }
//! fetch_timeout_ms = 1000
//!
//! [index]
//! scope = "first_document"
//! top_k = 4
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use answerflow_search::SearchConfig;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::indexer::IndexScope;
use crate::retry::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Text-generation backend.
    pub llm: LlmConfig,
    /// Embedding backend.
    pub embeddings: EmbeddingsConfig,
    /// Retrieval providers and content fetching.
    pub search: SearchSection,
    /// Query interpretation.
    pub interpret: InterpretConfig,
    /// Similarity index over fetched content.
    pub index: IndexConfig,
    /// Orchestration limits.
    pub pipeline: PipelineConfig,
    /// Retry policy for external calls.
    pub retry: RetryPolicy,
}

/// A reference to a secret value.
///
/// Secrets are resolved at client construction, never stored resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SecretRef {
    /// No secret required.
    #[default]
    None,
    /// Load from environment variable.
    Env { var: String },
    /// Literal value (development only, insecure).
    Literal { value: String },
}

impl SecretRef {
    /// Shorthand for an environment-variable reference.
    pub fn env(var: impl Into<String>) -> Self {
        Self::Env { var: var.into() }
    }

    /// Resolve the secret to its actual value.
    ///
    /// # Returns
    /// - `Ok(None)` if no secret is configured (variant `None`)
    /// - `Ok(Some(value))` for successfully resolved secrets
    /// - `Err(PipelineError::Config)` if the environment variable is unset
    pub fn resolve(&self) -> Result<Option<String>> {
        match self {
            Self::None => Ok(None),
            Self::Env { var } => std::env::var(var)
                .map(Some)
                .map_err(|_| PipelineError::Config(format!("environment variable '{var}' not set"))),
            Self::Literal { value } => Ok(Some(value.clone())),
        }
    }

    /// Resolve, treating an unset environment variable as "no secret".
    ///
    /// Used for retrieval keys: a missing key disables that branch instead of
    /// failing startup.
    pub fn resolve_optional(&self) -> Option<String> {
        match self.resolve() {
            Ok(value) => value.filter(|v| !v.trim().is_empty()),
            Err(err) => {
                tracing::warn!(error = %err, "secret unavailable");
                None
            }
        }
    }
}

/// OpenAI-compatible chat completions backend (OpenAI, Groq, Ollama).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL without the `/v1/...` suffix.
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// API key.
    pub api_key: SecretRef,
    /// Whole-request timeout in seconds (stream open for streaming calls).
    pub request_timeout_secs: u64,
    /// Sampling temperature. `None` uses the provider default.
    pub temperature: Option<f64>,
    /// Maximum tokens to generate. `None` uses the provider default.
    pub max_tokens: Option<usize>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            model: "gpt-4o-mini".into(),
            api_key: SecretRef::env("OPENAI_API_KEY"),
            request_timeout_secs: 60,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// OpenAI-compatible `/v1/embeddings` backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// Base URL without the `/v1/...` suffix.
    pub base_url: String,
    /// Embedding model identifier.
    pub model: String,
    /// API key.
    pub api_key: SecretRef,
    /// Maximum inputs per request.
    pub batch_size: usize,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            model: "text-embedding-3-small".into(),
            api_key: SecretRef::env("OPENAI_API_KEY"),
            batch_size: 64,
            request_timeout_secs: 30,
        }
    }
}

/// `[search]`: provider settings plus the provider keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// Brave Search key (web and image branches).
    pub brave_api_key: SecretRef,
    /// Serper key (video branch).
    pub serper_api_key: SecretRef,
    /// Endpoints, counts and deadlines.
    #[serde(flatten)]
    pub providers: SearchConfig,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            brave_api_key: SecretRef::env("BRAVE_SEARCH_API_KEY"),
            serper_api_key: SecretRef::env("SERPER_API_KEY"),
            providers: SearchConfig::default(),
        }
    }
}

/// Intent extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpretConfig {
    /// Whether `desiredCount` is clamped into `[min_count, max_count]`.
    pub clamp: bool,
    /// Lower bound for the desired count.
    pub min_count: u32,
    /// Upper bound for the desired count.
    pub max_count: u32,
}

impl Default for InterpretConfig {
    fn default() -> Self {
        Self {
            clamp: true,
            min_count: 1,
            max_count: 9,
        }
    }
}

/// Similarity index settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Whether fetched content is indexed at all.
    pub enabled: bool,
    /// Which content records are indexed.
    pub scope: IndexScope,
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks.
    pub chunk_overlap: usize,
    /// Number of matches returned.
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scope: IndexScope::FirstDocument,
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 4,
        }
    }
}

/// Orchestration limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Authoritative cap on sources requested from web search and passed to
    /// the ranking call.
    pub max_ranked_sources: usize,
    /// Capacity of the progress event channel.
    pub channel_capacity: usize,
    /// Deadline for each retrieval branch, retries included, in milliseconds.
    pub retrieval_timeout_ms: u64,
    /// Longest silence tolerated between two ranking stream events, in
    /// milliseconds.
    pub ranking_idle_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_ranked_sources: 9,
            channel_capacity: 64,
            retrieval_timeout_ms: 30_000,
            ranking_idle_timeout_ms: 30_000,
        }
    }
}

impl PipelineConfig {
    /// Per-branch retrieval deadline.
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    /// Idle deadline for the ranking stream.
    pub fn ranking_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.ranking_idle_timeout_ms)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let io_err = |e: std::io::Error| {
            PipelineError::Config(format!("cannot write {}: {e}", path.display()))
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PipelineError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(io_err)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/answerflow/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::env::temp_dir().join("answerflow-config"))
            .join("answerflow")
            .join("config.toml")
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.llm.model.trim().is_empty() {
            return Err(PipelineError::Config("llm.model must not be empty".into()));
        }
        if self.embeddings.batch_size == 0 {
            return Err(PipelineError::Config(
                "embeddings.batch_size must be greater than 0".into(),
            ));
        }
        let interpret = &self.interpret;
        if interpret.min_count == 0 || interpret.min_count > interpret.max_count {
            return Err(PipelineError::Config(format!(
                "interpret range [{}, {}] is invalid",
                interpret.min_count, interpret.max_count
            )));
        }
        let index = &self.index;
        if index.chunk_size == 0 {
            return Err(PipelineError::Config(
                "index.chunk_size must be greater than 0".into(),
            ));
        }
        if index.chunk_overlap >= index.chunk_size {
            return Err(PipelineError::Config(
                "index.chunk_overlap must be smaller than index.chunk_size".into(),
            ));
        }
        if !(1..=5).contains(&index.top_k) {
            return Err(PipelineError::Config("index.top_k must be within 1..=5".into()));
        }
        if self.pipeline.max_ranked_sources == 0 {
            return Err(PipelineError::Config(
                "pipeline.max_ranked_sources must be greater than 0".into(),
            ));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(PipelineError::Config(
                "pipeline.channel_capacity must be greater than 0".into(),
            ));
        }
        if self.pipeline.retrieval_timeout_ms == 0 || self.pipeline.ranking_idle_timeout_ms == 0 {
            return Err(PipelineError::Config(
                "pipeline timeouts must be greater than 0".into(),
            ));
        }
        self.retry.validate()?;
        self.search
            .providers
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))
    }
}
