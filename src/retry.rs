// src/retry.rs
// One retry policy shared by the source adapters and the seen-store gateway,
// instead of each call site growing its own backoff loop.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Error, Result};

/// Failure classification for a retried operation.
#[derive(Debug)]
pub enum RetryError {
    /// Worth another attempt (timeout, 5xx, rate limit, throttled write).
    Transient(Error),
    /// Retrying cannot help (bad request, invalid credentials).
    Permanent(Error),
}

impl RetryError {
    pub fn transient(e: impl Into<Error>) -> Self {
        RetryError::Transient(e.into())
    }

    pub fn permanent(e: impl Into<Error>) -> Self {
        RetryError::Permanent(e.into())
    }
}

/// Capped exponential backoff: `base * 2^(attempt-1)`, never above `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RetryError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(v) => return Ok(v),
                Err(RetryError::Permanent(e)) => {
                    return Err(e.context(format!("{what}: permanent failure")));
                }
                Err(RetryError::Transient(e)) => {
                    if attempt >= self.max_attempts {
                        return Err(
                            e.context(format!("{what}: retries exhausted after {attempt} attempts"))
                        );
                    }
                    let delay = self.backoff(attempt);
                    tracing::debug!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = ?e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Map an HTTP status to the retry taxonomy: 429 and 5xx are transient,
/// any other non-success is permanent.
pub fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, RetryError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else if status.as_u16() == 429 || status.is_server_error() {
        Err(RetryError::transient(anyhow!("http status {status}")))
    } else {
        Err(RetryError::permanent(anyhow!("http status {status}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(4),
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(p.backoff(1), Duration::from_secs(1));
        assert_eq!(p.backoff(2), Duration::from_secs(2));
        assert_eq!(p.backoff(3), Duration::from_secs(4));
        assert_eq!(p.backoff(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let out = fast_policy(5)
            .run("test op", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RetryError::transient(anyhow!("boom")))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(5)
            .run("test op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RetryError::permanent(anyhow!("nope")))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(format!("{err:#}").contains("permanent failure"));
    }

    #[tokio::test]
    async fn exhaustion_reports_attempt_count() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(3)
            .run("test op", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(RetryError::transient(anyhow!("busy")))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(format!("{err:#}").contains("retries exhausted"));
    }
}
