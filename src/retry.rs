//! Bounded retry with backoff for rate-limited and transient failures

use crate::error::{Result, TalonError};
use std::future::Future;
use std::time::Duration;

/// Retry budget and backoff schedule
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled on each subsequent one
    pub base_delay: Duration,
    /// Upper bound on any single delay, including server hints
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), honoring a server hint
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let delay = hint.unwrap_or_else(|| {
            let factor = 2u32.saturating_pow(attempt.min(16));
            self.base_delay.saturating_mul(factor)
        });
        delay.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent
///
/// `on_retry` is called before each sleep with the attempt number (1-based),
/// the chosen delay, and the error that triggered it.
pub async fn retry_with_backoff<T, F, Fut, R>(
    policy: &RetryPolicy,
    mut op: F,
    mut on_retry: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: FnMut(u32, Duration, &TalonError),
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_retries => {
                return Err(TalonError::RetryExhausted {
                    attempts: attempt + 1,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt, e.retry_after());
                attempt += 1;
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after retryable error"
                );
                on_retry(attempt, delay, &e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.delay_for(0, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40, None), Duration::from_secs(5));
    }

    #[test]
    fn test_delay_prefers_server_hint() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(3600))),
            policy.max_delay
        );
    }

    #[tokio::test]
    async fn test_succeeds_after_rate_limits_within_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let mut retries = Vec::new();

        let result = retry_with_backoff(
            &fast_policy(3),
            || {
                let n = calls_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(TalonError::RateLimited {
                            retry_after: Some(Duration::from_millis(2)),
                        })
                    } else {
                        Ok(n)
                    }
                }
            },
            |attempt, delay, _| retries.push((attempt, delay)),
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(retries.len(), 3);
        assert_eq!(retries[0], (1, Duration::from_millis(2)));
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = retry_with_backoff(
            &fast_policy(2),
            || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(TalonError::Network("connection reset".into())) }
            },
            |_, _, _| {},
        )
        .await;

        match result {
            Err(TalonError::RetryExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, TalonError::Network(_)));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let result: Result<()> = retry_with_backoff(
            &fast_policy(5),
            || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(TalonError::Auth("invalid client".into())) }
            },
            |_, _, _| {},
        )
        .await;

        assert!(matches!(result, Err(TalonError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
