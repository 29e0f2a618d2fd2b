//! Spot interruption watcher
//!
//! Runs beside the application phases, polling for a reclamation notice.
//! On the first notice it triggers a graceful shutdown once and exits. It
//! never touches orchestrator state; its only effect is the shutdown hook.

use stackforge_common::{InterruptionNotice, InterruptionSource, ShutdownHook};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How a watcher finished
#[derive(Debug, Clone, PartialEq)]
pub enum WatchOutcome {
    /// A notice arrived and the shutdown hook ran
    Interrupted(InterruptionNotice),
    /// Stopped by its handle
    Stopped,
}

/// Interruption watcher configuration
pub struct InterruptionWatcher {
    source: Arc<dyn InterruptionSource>,
    hook: Arc<dyn ShutdownHook>,
    interval: Duration,
}

impl InterruptionWatcher {
    /// Polls every 5 seconds by default
    pub fn new(source: Arc<dyn InterruptionSource>, hook: Arc<dyn ShutdownHook>) -> Self {
        Self {
            source,
            hook,
            interval: Duration::from_secs(5),
        }
    }

    /// Time between notice polls
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start watching `instance_id` on the current runtime
    pub fn spawn(self, instance_id: impl Into<String>) -> WatcherHandle {
        let instance_id = instance_id.into();
        let (stop_tx, stop_rx) = watch::channel(false);

        tracing::info!("watching {} for interruption notices", instance_id);
        let task = tokio::spawn(self.run(instance_id.clone(), stop_rx));

        WatcherHandle {
            instance_id,
            stop: stop_tx,
            task,
        }
    }

    async fn run(self, instance_id: String, mut stop: watch::Receiver<bool>) -> WatchOutcome {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                // A closed channel means the handle was dropped
                _ = stop.changed() => {
                    tracing::debug!("interruption watcher for {} stopped", instance_id);
                    return WatchOutcome::Stopped;
                }
                _ = ticker.tick() => {
                    match self.source.poll_notice(&instance_id).await {
                        Ok(Some(notice)) => {
                            tracing::warn!(
                                "interruption notice for {}: {} (remaining {:?})",
                                instance_id,
                                notice.action,
                                notice.time_remaining()
                            );
                            self.hook.graceful_shutdown(&notice).await;
                            return WatchOutcome::Interrupted(notice);
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!("interruption poll for {} failed: {}", instance_id, e),
                    }
                }
            }
        }
    }
}

/// Handle to a running watcher. Dropping it stops the watcher.
pub struct WatcherHandle {
    instance_id: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<WatchOutcome>,
}

impl WatcherHandle {
    /// Instance being watched
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Ask the watcher to stop
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Whether the task has ended
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the watcher to finish
    pub async fn join(self) -> WatchOutcome {
        self.task.await.unwrap_or(WatchOutcome::Stopped)
    }

    /// Stop and wait
    pub async fn shutdown(self) -> WatchOutcome {
        self.stop();
        self.join().await
    }
}

impl fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("instance_id", &self.instance_id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}
