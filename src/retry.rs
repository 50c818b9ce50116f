//! Bounded retry policy for page fetches.
//!
//! [`RetryPolicy::run`] drives an async operation up to `max_attempts` times.
//! Each attempt is bounded by `per_attempt_timeout`; between attempts it
//! sleeps with capped exponential backoff plus jitter:
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
//! ```
//!
//! Only failures that [`RetryPolicy::is_retryable`] accepts are retried.

use crate::error::FetchError;
use rand::{Rng, rng};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, warn};

/// HTTP statuses retried when no explicit list is configured.
pub const DEFAULT_RETRY_HTTP_CODES: &[u16] = &[500, 502, 503, 504, 408, 429];

const MAX_JITTER_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub retry_http_codes: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            per_attempt_timeout: Duration::from_secs(30),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retry_http_codes: DEFAULT_RETRY_HTTP_CODES.to_vec(),
        }
    }
}

/// What happened across all attempts of one retried operation.
#[derive(Debug)]
pub struct Retried<T> {
    /// Result of the last attempt.
    pub result: Result<T, FetchError>,
    /// Failures of the attempts before the last one, in order.
    pub earlier_failures: Vec<FetchError>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// Same bounds, but never more than one attempt.
    pub fn single_attempt(&self) -> Self {
        Self {
            max_attempts: 1,
            ..self.clone()
        }
    }

    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..self.clone()
        }
    }

    pub fn is_retryable(&self, err: &FetchError) -> bool {
        match err {
            FetchError::HttpStatus { status, .. } => self.retry_http_codes.contains(status),
            FetchError::NoResponse { .. }
            | FetchError::Timeout { .. }
            | FetchError::Connection { .. } => true,
        }
    }

    /// Backoff before attempt `attempt + 1`, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp).min(self.max_delay)
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter_ms: u64 = rng().random_range(0..=MAX_JITTER_MS);
        self.backoff(attempt) + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> Retried<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let total_t0 = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut earlier_failures = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let attempt_t0 = Instant::now();
            let result = match timeout(self.per_attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout {
                    url: url.to_string(),
                    secs: self.per_attempt_timeout.as_secs(),
                }),
            };

            let err = match result {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        earlier_failures,
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            if attempt >= max_attempts || !self.is_retryable(&err) {
                error!(
                    url,
                    attempt,
                    max = max_attempts,
                    retryable = self.is_retryable(&err),
                    elapsed_ms_total = total_t0.elapsed().as_millis(),
                    error = %err,
                    "fetch failed; not retrying"
                );
                return Retried {
                    result: Err(err),
                    earlier_failures,
                    attempts: attempt,
                };
            }

            let delay = self.delay_with_jitter(attempt);
            warn!(
                url,
                attempt,
                max = max_attempts,
                elapsed_ms_attempt = attempt_t0.elapsed().as_millis(),
                ?delay,
                error = %err,
                "fetch attempt failed; backing off"
            );
            earlier_failures.push(err);
            sleep(delay).await;
        }
    }
}
