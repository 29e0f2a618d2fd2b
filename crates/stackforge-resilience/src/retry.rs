//! Retry with exponential backoff

use rand::Rng;
use stackforge_common::{ErrorCategory, ProviderError};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::interrupt::{Interrupt, Interrupted};

/// Errors that know whether trying again can help
pub trait Retryable {
    /// Whether another attempt can succeed
    fn is_retryable(&self) -> bool;
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }
}

/// Backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Sleep before the second attempt; doubles after each failure
    pub base_delay: Duration,
    /// Upper bound on any single sleep
    pub max_delay: Option<Duration>,
    /// Randomize each sleep within `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Some(Duration::from_secs(60)),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Policy with the default cap and no jitter
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// Cap each sleep; `None` removes the cap
    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Randomize sleeps
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Single attempt, no sleeping
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Sleep after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);
        if let Some(cap) = self.max_delay {
            delay = delay.min(cap);
        }
        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            delay = half + rand::thread_rng().gen_range(Duration::ZERO..=half);
        }
        delay
    }
}

/// Every attempt failed, or a failure was not retryable
#[derive(Debug, Clone, PartialEq, Error)]
#[error("gave up after {attempts} attempt(s): {last_error}")]
pub struct RetryError<E> {
    /// Attempts actually made
    pub attempts: u32,
    /// Error of the final attempt
    pub last_error: E,
    /// Set when a backoff sleep was cut short; `last_error` is then the
    /// failure that led to the sleep
    pub interrupted: Option<Interrupted>,
}

impl<E> RetryError<E> {
    /// Take the final error
    pub fn into_inner(self) -> E {
        self.last_error
    }
}

impl RetryError<ProviderError> {
    /// Shared error category
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Provider(self.last_error.kind())
    }
}

/// Retry `operation` while its error reports itself retryable
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff_if(policy, operation, |e: &E| e.is_retryable()).await
}

/// Retry `operation` while `should_retry` accepts its error
pub async fn retry_with_backoff_if<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    retry_interruptible(policy, &Interrupt::none(), operation, should_retry).await
}

/// [`retry_with_backoff_if`], giving up during a backoff sleep as soon as
/// `interrupt` fires. Attempts in flight are never cut short.
pub async fn retry_interruptible<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    interrupt: &Interrupt,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    "attempt {}/{} failed: {}; retrying in {:?}",
                    attempt,
                    max_attempts,
                    e,
                    delay
                );
                if let Err(reason) = interrupt.run(tokio::time::sleep(delay)).await {
                    tracing::warn!("retry abandoned after attempt {}: {}", attempt, reason);
                    return Err(RetryError {
                        attempts: attempt,
                        last_error: e,
                        interrupted: Some(reason),
                    });
                }
                attempt += 1;
            }
            Err(e) => {
                return Err(RetryError {
                    attempts: attempt,
                    last_error: e,
                    interrupted: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1)).with_max_delay(Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(5));

        let uncapped = policy.clone().with_max_delay(None);
        assert_eq!(uncapped.delay_for(6), Duration::from_secs(32));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::new(5, Duration::from_millis(800)).with_jitter(true);
        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(800) && delay <= Duration::from_millis(1600));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_wait_one_then_two_seconds() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();

        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::new(3, Duration::from_secs(1)), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::transient("connection reset"))
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_kth_attempt() {
        for k in 1..=4u32 {
            let calls = AtomicU32::new(0);
            let counter = &calls;
            let value = retry_with_backoff(&RetryPolicy::new(4, Duration::from_millis(10)), move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < k {
                    Err(ProviderError::capacity("g5.xlarge", "us-east-1"))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

            assert_eq!(value, k);
            assert_eq!(calls.load(Ordering::SeqCst), k);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();

        let result: Result<(), _> = retry_with_backoff(&RetryPolicy::new(5, Duration::from_secs(1)), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::PermissionDenied {
                permission: "ec2:RunInstances".into(),
                message: "denied".into(),
            })
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(err.category().code(), "PERMISSION_DENIED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let interrupt = Interrupt::none().with_cancel(rx);
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = Instant::now();
        let policy = RetryPolicy::new(5, Duration::from_secs(30));

        let (result, _) = tokio::join!(
            retry_interruptible(
                &policy,
                &interrupt,
                move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ProviderError::transient("throttled"))
                },
                |e: &ProviderError| e.is_retryable(),
            ),
            async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                tx.send_replace(true);
            }
        );

        let err = result.unwrap_err();
        assert_eq!(err.interrupted, Some(Interrupted::Cancelled));
        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_caller_classifier() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), RetryError<String>> = retry_with_backoff_if(
            &RetryPolicy::new(3, Duration::ZERO),
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("invalid stack name".to_string())
            },
            |e: &String| !e.starts_with("invalid"),
        )
        .await;

        assert_eq!(result.unwrap_err().into_inner(), "invalid stack name");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
