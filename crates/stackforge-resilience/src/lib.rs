//! StackForge Resilience
//!
//! Async building blocks the selector and orchestrator lean on:
//!
//! | Helper | Purpose |
//! |--------|---------|
//! | [`retry_with_backoff`] | Bounded retry with exponential backoff for transient failures |
//! | [`poll_until`] | Bounded polling loop that surfaces a timeout instead of blocking |
//! | [`Interrupt`] | Cuts backoff sleeps and polls short on cancellation or a deadline |
//! | [`InterruptionWatcher`] | Cancellable background task reacting to compute reclamation |

#![warn(missing_docs)]

pub mod interrupt;
pub mod poll;
pub mod retry;
pub mod watcher;

pub use interrupt::{Interrupt, Interrupted};
pub use poll::{poll_until, poll_until_interruptible, PollError};
pub use retry::{retry_with_backoff, retry_interruptible, retry_with_backoff_if, RetryError, RetryPolicy, Retryable};
pub use watcher::{InterruptionWatcher, WatchOutcome, WatcherHandle};
