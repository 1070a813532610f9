//! Periodic background dispatch.

use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Runs [`Dispatcher::run_once`] on an interval and on demand.
///
/// Batches execute on the blocking thread pool, one at a time. A full batch
/// schedules the next run immediately so a backlog drains without waiting
/// for the next tick.
#[derive(Debug)]
pub struct SyncService;

impl SyncService {
    /// Starts the service on the current tokio runtime, ticking at the
    /// dispatcher's configured poll interval.
    pub fn spawn(dispatcher: Arc<Dispatcher>) -> SyncServiceHandle {
        let interval = dispatcher.context().config().poll_interval;
        Self::spawn_with_interval(dispatcher, interval)
    }

    /// Starts the service with an explicit tick interval.
    pub fn spawn_with_interval(dispatcher: Arc<Dispatcher>, interval: Duration) -> SyncServiceHandle {
        let trigger = Arc::new(Notify::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(dispatcher, interval, Arc::clone(&trigger), shutdown_rx));
        SyncServiceHandle {
            trigger,
            shutdown: shutdown_tx,
            task,
        }
    }
}

async fn run(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
) {
    let batch_size = dispatcher.context().config().batch_size;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = interval.as_millis() as u64, "sync service started");

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = trigger.notified() => debug!("sync triggered"),
            _ = ticker.tick() => {}
        }

        let worker = Arc::clone(&dispatcher);
        match tokio::task::spawn_blocking(move || worker.run_once()).await {
            Ok(Ok(report)) => {
                if batch_size > 0 && report.claimed >= batch_size {
                    trigger.notify_one();
                }
            }
            // Already logged by the dispatcher.
            Ok(Err(_)) => {}
            Err(e) => error!(error = %e, "dispatch task failed"),
        }
    }

    info!("sync service stopped");
}

/// Handle to a running [`SyncService`].
#[derive(Debug)]
pub struct SyncServiceHandle {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncServiceHandle {
    /// Requests a run as soon as the current one (if any) finishes.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Returns true while the service loop is running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops the service after the in-flight run and waits for it.
    pub async fn shutdown(self) -> EngineResult<()> {
        // The loop may already be gone; joining reports that.
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|_| EngineError::ServiceStopped)
    }
}
