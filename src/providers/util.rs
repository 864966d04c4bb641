use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// How many times to call an upstream operation and how long to wait between
/// calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of calls, including the first.
    pub attempts: usize,
    /// Delay before the second call; doubled for each call after that.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: usize, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(10),
        }
    }

    fn delay_after(&self, attempt: usize) -> Duration {
        let factor = 1u32 << (attempt.saturating_sub(1)).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250))
    }
}

/// Retries an async operation with exponential backoff
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `policy`: Attempt count and backoff delays
/// - `is_retryable`: Whether an error is worth another attempt
///
/// # Returns
/// The first success, the first non-retryable error, or the last error once
/// all attempts are used. The attempt count is returned alongside.
pub async fn with_retry<F, Fut, T, E>(
    mut operation: F,
    policy: &RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
) -> Result<T, (E, usize)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt >= policy.attempts || !is_retryable(&err) {
                    return Err((err, attempt));
                }
                let delay = policy.delay_after(attempt);
                debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt, policy.attempts, err, delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("flaky")
                } else {
                    Ok(7)
                }
            },
            &fast(),
            |_| true,
        )
        .await;
        assert_eq!(result.ok(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_all_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down")
            },
            &fast(),
            |_| true,
        )
        .await;
        assert_eq!(result.err(), Some(("down", 3)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("not found")
            },
            &fast(),
            |e: &&str| *e != "not found",
        )
        .await;
        assert_eq!(result.err(), Some(("not found", 1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after(4), Duration::from_millis(500));
    }
}
