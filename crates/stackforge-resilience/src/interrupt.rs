//! Early exit for long waits
//!
//! An [`Interrupt`] pairs a cancellation channel with a hard deadline. Backoff
//! sleeps and readiness polls race against it so a cancelled or expired run
//! stops at once instead of at the end of its current wait.

use std::future::Future;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

/// Why a wait ended early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    /// Cancellation was requested
    #[error("cancelled")]
    Cancelled,

    /// The deadline passed
    #[error("deadline reached")]
    DeadlineReached,
}

/// Cancellation signal plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl Interrupt {
    /// Never fires
    pub fn none() -> Self {
        Self::default()
    }

    /// Fire once the channel carries `true`
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Fire at `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Current state, cancellation first
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false) {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::DeadlineReached),
            _ => Ok(()),
        }
    }

    /// Resolves when cancelled or at the deadline. Pending forever when
    /// neither can happen.
    pub async fn fired(&self) -> Interrupted {
        let mut cancel = self.cancel.clone();
        let cancelled = async {
            if let Some(rx) = cancel.as_mut() {
                // a dropped sender can no longer cancel
                if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                    return;
                }
            }
            std::future::pending::<()>().await
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Interrupted::Cancelled,
            _ = expired => Interrupted::DeadlineReached,
        }
    }

    /// Drive `future` unless the interrupt fires first. A future that is
    /// cut short is dropped.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        tokio::select! {
            biased;
            reason = self.fired() => Err(reason),
            output = future => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_none_never_fires() {
        let started = Instant::now();
        let value = Interrupt::none()
            .run(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                7
            })
            .await;
        assert_eq!(value, Ok(7));
        assert_eq!(started.elapsed(), Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_cuts_sleep_short() {
        let (tx, rx) = watch::channel(false);
        let interrupt = Interrupt::none().with_cancel(rx);
        let started = Instant::now();

        let (result, _) = tokio::join!(interrupt.run(tokio::time::sleep(Duration::from_secs(900))), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send_replace(true);
        });

        assert_eq!(result, Err(Interrupted::Cancelled));
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(interrupt.check(), Err(Interrupted::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cuts_sleep_short() {
        let started = Instant::now();
        let interrupt = Interrupt::none().with_deadline(started + Duration::from_secs(5));

        let result = interrupt.run(tokio::time::sleep(Duration::from_secs(900))).await;

        assert_eq!(result, Err(Interrupted::DeadlineReached));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(interrupt.check(), Err(Interrupted::DeadlineReached));
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_skips_future() {
        let (tx, rx) = watch::channel(false);
        tx.send_replace(true);
        let result = Interrupt::none().with_cancel(rx).run(async { 1 }).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_sender_does_not_fire() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let interrupt = Interrupt::none()
            .with_cancel(rx)
            .with_deadline(Instant::now() + Duration::from_secs(10));

        assert_eq!(interrupt.fired().await, Interrupted::DeadlineReached);
    }
}
