//! Bounded exponential backoff for external capability calls.
//!
//! All HTTP clients in this crate funnel their requests through [`retry`].
//! Only errors that report themselves as transient are retried; anything
//! else is returned on the first occurrence.
//!
//! # Policy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx other than 429 (auth, quota, bad request) → fail immediately
//! - Network errors and request timeouts → retry
//! - Delay before attempt `n` (1-based, `n > 1`) is
//!   `initial_backoff × 2^(n-2)`, capped at `max_backoff`

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{EmbedError, GenerationError, SourceError, StoreError};

/// How many times to try, and how long to wait in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay to wait before the given 1-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for EmbedError {
    fn is_transient(&self) -> bool {
        EmbedError::is_transient(self)
    }
}

impl Retryable for StoreError {
    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

impl Retryable for GenerationError {
    fn is_transient(&self) -> bool {
        GenerationError::is_transient(self)
    }
}

impl Retryable for SourceError {
    fn is_transient(&self) -> bool {
        SourceError::is_transient(self)
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// `operation` names the call in log output. The last error is returned
/// when every attempt failed.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_before(attempt + 1);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Whether an HTTP status is worth retrying (rate limit or server error).
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Read a failed response into a short `"<status>: <body>"` description.
pub async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(500).collect();
    format!("{}: {}", status, body)
}
