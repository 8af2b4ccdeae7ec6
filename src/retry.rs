//! Bounded retry with exponential backoff for external calls.
//!
//! Every outbound call that can fail transiently (intent call, ranking stream
//! open, search branches, embeddings) goes through [`with_retry`]. Once the
//! attempts are exhausted the caller's normal handling applies: branches
//! degrade to empty, interpretation and ranking failures are terminal.
//!
//! Content fetches and media HEAD checks are never retried; their short
//! deadline is part of their contract.

use std::future::Future;
use std::time::Duration;

use answerflow_search::SearchError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 2;

/// Default base delay in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Default cap on a single backoff delay in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 4_000;

/// Default backoff multiplier.
pub const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Retry policy for transient failures.
///
/// # Examples
///
/// ```
/// use answerflow::retry::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.max_attempts, 2);
/// assert_eq!(policy.base_delay_ms, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries, 1 = one retry, etc.).
    pub max_attempts: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth).
    pub max_delay_ms: u64,
    /// Backoff multiplier (2.0 for exponential backoff).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_RETRY_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Set the maximum number of retry attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay in milliseconds.
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Calculate the delay for a given retry attempt with exponential backoff and jitter.
    ///
    /// Formula: min(base * multiplier^(attempt-1), max_delay) + jitter
    /// where jitter is a random value between 0 and 10% of the delay.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let base = self.base_delay_ms as f64;
        let max = self.max_delay_ms as f64;
        let exp = self.backoff_multiplier.powi(attempt as i32 - 1);
        let delay = (base * exp).min(max);

        let jitter = delay * (rand::random::<f64>() * 0.1);
        Duration::from_millis((delay + jitter) as u64)
    }

    /// Validate the policy.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the multiplier is below 1.0 or the
    /// delay cap is below the base delay.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(PipelineError::Config(
                "retry.backoff_multiplier must be >= 1.0".into(),
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(PipelineError::Config(
                "retry.max_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

/// Errors that know whether a repeat attempt could succeed.
pub trait Retryable {
    /// Whether this failure is transient.
    fn is_retryable(&self) -> bool;
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        PipelineError::is_retryable(self)
    }
}

impl Retryable for SearchError {
    fn is_retryable(&self) -> bool {
        SearchError::is_retryable(self)
    }
}

/// Run `f` until it succeeds, fails permanently, or retries are exhausted.
///
/// Cancellation is checked before each attempt and raced against both the
/// attempt and the backoff sleep; it always wins with
/// [`PipelineError::Cancelled`].
///
/// # Errors
///
/// Returns the last error (converted into [`PipelineError`]) or `Cancelled`.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Retryable + Into<PipelineError> + std::fmt::Display,
{
    let mut retry = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(cancelled(operation));
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(operation)),
            outcome = f() => outcome,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retry < policy.max_attempts => {
                retry += 1;
                let delay = policy.delay_for_attempt(retry);
                tracing::warn!(
                    operation,
                    retry,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled(operation)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                if retry > 0 {
                    tracing::warn!(operation, retries = retry, error = %err, "giving up");
                }
                return Err(err.into());
            }
        }
    }
}

fn cancelled(operation: &str) -> PipelineError {
    PipelineError::Cancelled(format!("{operation} cancelled"))
}
