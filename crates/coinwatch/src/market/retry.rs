//! Exponential backoff for calls that do not go through the cache.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_DELAY_MS: u64 = 300;
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// How many times to try and how long to wait in between. No jitter, no cap.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total invocations, the first one included. Zero is treated as one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(INITIAL_DELAY_MS),
            backoff_multiplier: BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Default::default()
        }
    }

    /// Delay following `current`. A non-finite, negative, or overflowing product keeps `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let nanos = (current.as_nanos() as f64 * self.backoff_multiplier).round();
        if nanos.is_finite() && nanos >= 0.0 && nanos <= u64::MAX as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            current
        }
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` invocations have
/// failed; the last error is returned unchanged.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = policy.initial_delay;
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                warn!(attempt, ms = delay.as_millis() as u64, error = %e, "retry after error");
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn fails_twice_then_succeeds() {
        let calls = Mutex::new(Vec::new());
        let policy = RetryPolicy::new(3, Duration::from_millis(300));
        let out: Result<&str, String> = retry_with_backoff(&policy, || {
            let n = {
                let mut c = calls.lock().unwrap();
                c.push(Instant::now());
                c.len()
            };
            async move {
                if n < 3 {
                    Err(format!("fail {}", n))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(out, Ok("done"));
        let calls = calls.into_inner().unwrap();
        assert_eq!(calls.len(), 3);
        assert_gap(calls[0], calls[1], 300);
        assert_gap(calls[1], calls[2], 600);
    }

    fn assert_gap(from: Instant, to: Instant, ms: u64) {
        let gap = to - from;
        assert!(
            gap >= Duration::from_millis(ms) && gap < Duration::from_millis(ms + 10),
            "expected ~{}ms, got {:?}",
            ms,
            gap
        );
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_propagates_after_three_calls() {
        let mut count = 0u32;
        let policy = RetryPolicy::default();
        let out: Result<(), String> = retry_with_backoff(&policy, || {
            count += 1;
            async { Err("boom".to_string()) }
        })
        .await;
        assert_eq!(out, Err("boom".to_string()));
        assert_eq!(count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_runs_once() {
        let mut count = 0u32;
        let policy = RetryPolicy::new(0, Duration::from_millis(300));
        let start = Instant::now();
        let out: Result<(), &str> = retry_with_backoff(&policy, || {
            count += 1;
            async { Err("nope") }
        })
        .await;
        assert!(out.is_err());
        assert_eq!(count, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn next_delay_doubles_and_guards_bad_multipliers() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.next_delay(Duration::from_millis(300)),
            Duration::from_millis(600)
        );
        let neg = RetryPolicy {
            backoff_multiplier: -1.0,
            ..Default::default()
        };
        assert_eq!(neg.next_delay(Duration::from_secs(1)), Duration::from_secs(1));
    }
}
