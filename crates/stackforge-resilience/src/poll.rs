//! Bounded polling
//!
//! Long-running provider operations (instance reachability, CDN rollout,
//! health checks) are waited on with a deadline instead of blocking forever.

use stackforge_common::{ErrorCategory, ProviderError};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::interrupt::{Interrupt, Interrupted};

/// Polling failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PollError<E> {
    /// The probe never reported ready
    #[error("{operation} did not complete within {waited:?}")]
    TimedOut {
        /// What was being waited on
        operation: String,
        /// Time spent polling
        waited: Duration,
    },

    /// The probe itself failed
    #[error("{0}")]
    Probe(E),

    /// Cancelled or past the outer deadline
    #[error("wait interrupted: {0}")]
    Interrupted(Interrupted),
}

impl<E> PollError<E> {
    /// Ended by the poll's own timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

impl PollError<ProviderError> {
    /// Shared error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::TimedOut { .. } => ErrorCategory::Timeout,
            Self::Probe(e) => ErrorCategory::Provider(e.kind()),
            Self::Interrupted(Interrupted::Cancelled) => ErrorCategory::Cancelled,
            Self::Interrupted(Interrupted::DeadlineReached) => ErrorCategory::Timeout,
        }
    }
}

/// Call `probe` every `interval` until it reports `true`, errors, or
/// `timeout` elapses. A probe still running at the deadline is abandoned.
pub async fn poll_until<E, F, Fut>(
    operation: &str,
    timeout: Duration,
    interval: Duration,
    probe: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    poll_until_interruptible(operation, timeout, interval, &Interrupt::none(), probe).await
}

/// [`poll_until`], giving up as soon as `interrupt` fires
pub async fn poll_until_interruptible<E, F, Fut>(
    operation: &str,
    timeout: Duration,
    interval: Duration,
    interrupt: &Interrupt,
    mut probe: F,
) -> Result<(), PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let started = Instant::now();
    let deadline = started + timeout;
    let mut ticks = 0u32;

    loop {
        ticks += 1;
        let step = interrupt
            .run(tokio::time::timeout_at(deadline, probe()))
            .await
            .map_err(|reason| interrupted(operation, reason))?;
        match step {
            Ok(Ok(true)) => {
                tracing::debug!("{} ready after {} probe(s)", operation, ticks);
                return Ok(());
            }
            Ok(Ok(false)) => {
                tracing::debug!("{} not ready (probe {})", operation, ticks);
            }
            Ok(Err(e)) => return Err(PollError::Probe(e)),
            Err(_) => break,
        }

        let now = Instant::now();
        if now >= deadline {
            break;
        }
        interrupt
            .run(tokio::time::sleep(interval.min(deadline - now)))
            .await
            .map_err(|reason| interrupted(operation, reason))?;
    }

    tracing::warn!("{} timed out after {:?}", operation, timeout);
    Err(PollError::TimedOut {
        operation: operation.to_string(),
        waited: started.elapsed(),
    })
}

fn interrupted<E>(operation: &str, reason: Interrupted) -> PollError<E> {
    tracing::warn!("{} interrupted: {}", operation, reason);
    PollError::Interrupted(reason)
}
