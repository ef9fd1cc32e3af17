use std::future::Future;
use std::time::Duration;

/// Errors that tell the retry loop whether another attempt may succeed.
pub trait Retryable: Sized {
    /// True for a transaction conflict; every other error is final.
    fn is_conflict(&self) -> bool;

    /// The error surfaced once `attempts` attempts all conflicted.
    fn exhausted(attempts: u32) -> Self;
}

/// Bounded retry for operations that lose an optimistic-concurrency race.
///
/// Each attempt re-runs the whole read-modify-commit cycle. Waits
/// `backoff * attempt` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub async fn run<T, E, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Err(e) if e.is_conflict() => {
                    metrics::counter!("settlement_conflicts_total").increment(1);
                    if attempt >= max_attempts {
                        tracing::warn!(operation, attempts = attempt, "giving up after conflicts");
                        return Err(E::exhausted(attempt));
                    }
                    tracing::warn!(operation, attempt, "transaction conflict, retrying");
                    metrics::counter!("settlement_retries_total").increment(1);
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
