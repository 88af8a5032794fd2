//! Retry with backoff
//!
//! One combinator shared by connect, list and fetch. Waits between attempts
//! are `tokio::time` suspensions and never block a worker thread.

use core_runtime::config::SyncSettings;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffCurve {
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub curve: BackoffCurve,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            curve: BackoffCurve::Exponential,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            curve: BackoffCurve::Exponential,
        }
    }

    /// A policy that makes exactly one attempt
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_curve(mut self, curve: BackoffCurve) -> Self {
        self.curve = curve;
        self
    }

    pub fn connect(settings: &SyncSettings) -> Self {
        Self::new(
            settings.connect_attempts,
            settings.backoff_base,
            settings.backoff_max,
        )
    }

    pub fn list(settings: &SyncSettings) -> Self {
        Self::new(settings.list_attempts, settings.backoff_base, settings.backoff_max)
    }

    pub fn fetch(settings: &SyncSettings) -> Self {
        Self::new(settings.fetch_attempts, settings.backoff_base, settings.backoff_max)
    }

    /// Delay to wait after the given failed attempt (1-based), capped at
    /// `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.curve {
            BackoffCurve::Linear => self.base_delay.checked_mul(attempt),
            BackoffCurve::Exponential => 2u32
                .checked_pow(attempt - 1)
                .and_then(|factor| self.base_delay.checked_mul(factor)),
        };
        delay.unwrap_or(self.max_delay).min(self.max_delay)
    }
}

/// The last error of a retried operation and how many attempts were made
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (after {} attempts)", self.last_error, self.attempts)
    }
}

/// Run `operation(attempt)` until it succeeds, fails with an error for which
/// `should_retry` returns false, or `policy.max_attempts` is reached.
///
/// `attempt` is 1-based. Every failed attempt is logged under `label`.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    should_retry: P,
    mut operation: F,
) -> std::result::Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = label, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                let retryable = should_retry(&error);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts,
                    retryable,
                    error = %error,
                    "Attempt failed"
                );

                if !retryable || attempt >= max_attempts {
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: error,
                    });
                }

                let delay = policy.delay_for(attempt);
                if !delay.is_zero() {
                    debug!(operation = label, delay_ms = delay.as_millis() as u64, "Retrying after delay");
                    sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(5), Duration::from_secs(10));
        assert_eq!(policy.delay_for(64), Duration::from_secs(10));
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::default().with_curve(BackoffCurve::Linear);
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for(20), Duration::from_secs(10));
    }

    #[test]
    fn test_policies_from_settings() {
        let settings = SyncSettings {
            fetch_attempts: 5,
            ..SyncSettings::default()
        };
        assert_eq!(RetryPolicy::fetch(&settings).max_attempts, 5);
        assert_eq!(RetryPolicy::connect(&settings).max_attempts, 3);
        assert_eq!(RetryPolicy::single_attempt().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);

        let result = retry_with_backoff(&policy, "fetch", |_: &String| true, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(format!("transient {}", attempt))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_stops_at_ceiling() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        let err = retry_with_backoff(&policy, "list", |_: &String| true, |attempt| async move {
            Err::<(), _>(format!("failure {}", attempt))
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, "failure 3");
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::ZERO, Duration::ZERO);

        let err = retry_with_backoff(&policy, "fetch", |e: &String| e != "not found", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>("not found".to_string()) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(10));
        let started = tokio::time::Instant::now();

        let _ = retry_with_backoff(&policy, "connect", |_: &String| true, |_| async {
            Err::<(), _>("refused".to_string())
        })
        .await;

        // 1s after the first failure, 2s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }
}
