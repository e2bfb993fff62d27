//! Exponential backoff with full jitter, bounded by an enclosing deadline.
//!
//! Shared by the embedding port, the LLM port, and the worker's object-store
//! fetch so every external call in the system retries the same way.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Full-jitter delay for the given zero-based attempt index, per
    /// Marc Brooker's "Exponential Backoff And Jitter": `rand(0, min(cap, base * 2^attempt))`.
    fn jittered_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis().saturating_mul(1u128 << attempt.min(20));
        let capped = exp.min(self.max_delay.as_millis());
        let capped_ms = capped.min(u64::MAX as u128) as u64;
        let jittered = rand::thread_rng().gen_range(0..=capped_ms.max(1));
        Duration::from_millis(jittered)
    }
}

/// Whether an error is worth retrying. Implemented by callers' error types;
/// kept as a free function argument rather than a trait bound so this
/// module has no dependency on `core::error`'s concrete error types.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: RetryPolicy,
    deadline: Instant,
    is_transient: impl Fn(&E) -> bool,
    mut attempt_fn: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        let result = attempt_fn().await;
        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !is_transient(&err) {
                    return Err(err);
                }
                let delay = policy.jittered_delay(attempt - 1);
                let now = Instant::now();
                if now >= deadline {
                    return Err(err);
                }
                let remaining = deadline - now;
                if remaining.is_zero() {
                    return Err(err);
                }
                tokio::time::sleep(delay.min(remaining)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let deadline = Instant::now() + Duration::from_secs(5);

        let result: Result<u32, &str> = retry_with_backoff(
            policy,
            deadline,
            |_: &&str| true,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let deadline = Instant::now() + Duration::from_secs(5);

        let result: Result<u32, &str> = retry_with_backoff(
            policy,
            deadline,
            |_: &&str| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("permanent") }
            },
        )
        .await;

        assert_eq!(result, Err("permanent"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_retrying_past_deadline() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(50),
        };
        let deadline = Instant::now() + Duration::from_millis(10);

        let result: Result<u32, &str> = retry_with_backoff(
            policy,
            deadline,
            |_: &&str| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("transient") }
            },
        )
        .await;

        assert_eq!(result, Err("transient"));
        assert!(calls.load(Ordering::SeqCst) < 10);
    }
}
