//! Bounded retry with exponential backoff for direct, user-facing remote calls.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::errors::{Error, RetryClass};

/// Classify HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 | 403 => RetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
        500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay slept after failed attempt `attempt` (0-based), capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("[Retry] {} succeeded on attempt {}", label, attempt);
                    }
                    return Outcome::Success(value);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        warn!("[Retry] {} failed with non-retryable error: {}", label, err);
                        return Outcome::failure(err, attempt);
                    }
                    if attempt >= max_attempts {
                        warn!(
                            "[Retry] {} failed after {} attempts: {}",
                            label, attempt, err
                        );
                        return Outcome::failure(err, attempt);
                    }
                    let delay = self.delay_for_attempt(attempt - 1);
                    debug!(
                        "[Retry] {} attempt {} failed ({}); retrying in {:?}",
                        label, attempt, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Discriminated result handed to the UI layer instead of raw errors.
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Failure(Failure),
    /// Work is queued or already running; the background engine will finish it.
    InProgress,
}

#[derive(Debug)]
pub struct Failure {
    pub cause: Error,
    pub retryable: bool,
    pub message: String,
    pub attempts: u32,
}

impl Failure {
    pub fn new(cause: Error, attempts: u32) -> Self {
        Self {
            retryable: cause.is_retryable(),
            message: cause.user_message(),
            cause,
            attempts,
        }
    }
}

impl<T> Outcome<T> {
    pub fn failure(cause: Error, attempts: u32) -> Self {
        Outcome::Failure(Failure::new(cause, attempts))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, Outcome::InProgress)
    }

    pub fn as_failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failure(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(failure) => Outcome::Failure(failure),
            Outcome::InProgress => Outcome::InProgress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn classify_http_status_for_retry_policy() {
        assert_eq!(classify_http_status(500), RetryClass::Retryable);
        assert_eq!(classify_http_status(429), RetryClass::Retryable);
        assert_eq!(classify_http_status(401), RetryClass::ReauthRequired);
        assert_eq!(classify_http_status(400), RetryClass::Permanent);
        assert_eq!(classify_http_status(404), RetryClass::Permanent);
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8_000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_error_uses_full_budget_with_backoff() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let outcome: Outcome<()> = policy
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), Error>(RemoteError::Timeout("slow".into()).into())
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second, none after the last.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3_000));
        assert!(elapsed < Duration::from_millis(3_100));
        let failure = outcome.as_failure().expect("failure");
        assert!(failure.retryable);
        assert_eq!(failure.attempts, 3);
        assert!(failure.message.contains("too long"));
    }

    #[tokio::test(start_paused = true)]
    async fn delays_are_capped_by_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay_ms: 4_000,
            multiplier: 3.0,
            max_delay_ms: 10_000,
        };
        let started = Instant::now();

        let _: Outcome<()> = policy
            .run("capped", || async {
                Err::<(), Error>(RemoteError::Io("reset".into()).into())
            })
            .await;

        // 4s + 10s + 10s + 10s
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(34_000));
        assert!(elapsed < Duration::from_millis(34_100));
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_is_attempted_once() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let outcome: Outcome<()> = policy
            .run("test", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), Error>(Error::invalid_input("title must not be empty"))
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        let failure = outcome.as_failure().expect("failure");
        assert!(!failure.retryable);
        assert_eq!(failure.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failure() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let outcome = policy
            .run("test", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::from(RemoteError::Unreachable("offline".into())))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert!(matches!(outcome, Outcome::Success(42)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
