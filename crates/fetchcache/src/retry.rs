//! Bounded retries with exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::outcome::{FetchOutcome, FetchRequest};
use crate::utils::futures::{m, measure};

/// Controls how often and how quickly failed fetches are retried.
#[derive(Debug, Clone, Copy, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// The total number of attempts, including the first one.
    pub max_attempts: u32,
    /// The delay after the first failed attempt. It doubles with every further attempt.
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// Runs a fetch function, retrying transport errors.
///
/// Only [`HardError`](FetchOutcome::HardError)s are retried. A [`SoftError`](FetchOutcome::SoftError)
/// is a well-formed answer that will not change by asking again, so it is returned right away,
/// just like a success.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// The effective number of attempts, which is at least one.
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// The delay after the failed `attempt` (counting from 1): 1s, 2s, 4s, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.config.initial_backoff.saturating_mul(factor)
    }

    /// Invokes `fetch` until it succeeds, returns a soft error, or runs out of attempts.
    ///
    /// There is no delay after the final attempt, whose transport error is returned.
    pub async fn execute<T, F, Fut>(&self, request: &Arc<FetchRequest>, fetch: F) -> FetchOutcome<T>
    where
        F: Fn(Arc<FetchRequest>) -> Fut,
        Fut: Future<Output = FetchOutcome<T>>,
    {
        let max_attempts = self.max_attempts();
        let endpoint = request.endpoint.as_str();
        let mut attempt = 0;

        loop {
            attempt += 1;
            metric!(counter("requests.fetch.attempt") += 1);
            tracing::info!(endpoint, attempt, max_attempts, "Fetching from remote API");

            let future = fetch(Arc::clone(request));
            let error = match measure("requests.fetch", m::outcome, future).await {
                FetchOutcome::HardError(error) => error,
                outcome => break outcome,
            };

            if attempt >= max_attempts {
                tracing::error!(
                    endpoint,
                    error = &error as &dyn std::error::Error,
                    "Fetch failed after {attempt} attempts",
                );
                break FetchOutcome::HardError(error);
            }

            let backoff = self.backoff(attempt);
            metric!(counter("requests.fetch.retry") += 1);
            tracing::warn!(
                endpoint,
                attempt,
                error = &error as &dyn std::error::Error,
                "Fetch failed, retrying in {backoff:?}",
            );
            tokio::time::sleep(backoff).await;
        }
    }
}
