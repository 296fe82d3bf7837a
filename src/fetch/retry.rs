use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use super::transport::{FetchRequest, HttpTransport};
use super::FetchOutcome;
use crate::error::{FetchError, FetchFailure};

/// Retry behavior for a fetch.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles on each further attempt.
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random jitter added on HTTP 429.
    pub max_jitter: Duration,
    /// Per-attempt timeout handed to the transport.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
            timeout: Duration::from_secs(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Plain exponential backoff after the given (1-based) attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Backoff after a 429 on the given attempt. `jitter` is a fraction in [0, 1).
    pub fn rate_limit_delay(&self, attempt: u32, jitter: f64) -> Duration {
        let jitter = jitter.clamp(0.0, 1.0);
        let extra = if jitter >= 1.0 {
            Duration::ZERO
        } else {
            self.max_jitter.mul_f64(jitter)
        };
        self.backoff_delay(attempt) + extra
    }
}

/// Executes requests against the provider with retry and backoff.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch with the default policy of this fetcher.
    pub async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        self.fetch_with(request, &self.policy).await
    }

    /// Fetch with an explicit policy.
    pub async fn fetch_with(&self, request: &FetchRequest, policy: &RetryPolicy) -> FetchOutcome {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let cause = match self.transport.send(request, policy.timeout).await {
                Ok(resp) if resp.is_success() => {
                    if attempt > 1 {
                        debug!(url = %request.url, attempt, "request succeeded after retry");
                    }
                    return Ok(resp);
                }
                Ok(resp) if resp.status == 429 => FetchError::RateLimited,
                Ok(resp) => {
                    error!(
                        method = %request.method,
                        url = %request.url,
                        status = resp.status,
                        "request failed with non-retryable status"
                    );
                    return Err(FetchFailure::new(
                        FetchError::Client {
                            status: resp.status,
                            body: resp.body,
                        },
                        attempt,
                    ));
                }
                Err(e) => e,
            };

            if attempt >= max_attempts {
                error!(
                    method = %request.method,
                    url = %request.url,
                    attempts = attempt,
                    cause = cause.label(),
                    "max attempts exceeded: {cause}"
                );
                return Err(FetchFailure::new(cause, attempt));
            }

            let delay = match cause {
                FetchError::RateLimited => policy.rate_limit_delay(attempt, rand::random::<f64>()),
                _ => policy.backoff_delay(attempt),
            };
            warn!(
                url = %request.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                cause = cause.label(),
                "request failed, retrying after backoff"
            );

            sleep(delay).await;
            attempt += 1;
        }
    }
}
