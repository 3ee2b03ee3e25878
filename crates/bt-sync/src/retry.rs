//! Bounded retry for transient store errors.
//!
//! Only [`StoreError::Transient`] is retried; anything else fails on the
//! first attempt. The pause between attempts is fixed.

use std::future::Future;
use std::time::Duration;

use bt_core::StoreError;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self::fixed(0, Duration::ZERO)
    }
}

/// Last error of a retried call, with the number of attempts made.
#[derive(Error, Debug)]
#[error("{source} (after {attempts} attempt(s))")]
pub struct RetryError {
    pub source: StoreError,
    pub attempts: u32,
}

/// Run `f` until it succeeds, fails permanently, or the budget runs out.
pub async fn with_retry<F, Fut, T>(
    policy: RetryPolicy,
    operation_name: &str,
    f: F,
) -> Result<T, RetryError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = %operation_name, attempts = attempt, "Store call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt <= policy.max_retries => {
                debug!(
                    operation = %operation_name,
                    attempt,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    error = %e,
                    "Transient store error, retrying"
                );
                sleep(policy.backoff).await;
            }
            Err(e) => {
                if attempt > 1 {
                    warn!(operation = %operation_name, attempts = attempt, error = %e, "Store call failed after retries");
                }
                return Err(RetryError {
                    source: e,
                    attempts: attempt,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy::fixed(retries, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(policy(2), "flaky", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(StoreError::Transient("busy".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let err = with_retry(policy(2), "down", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StoreError::Transient("offline".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(err.source.is_transient());
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry(policy(5), "conflict", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(StoreError::Conflict("key reused".into()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
