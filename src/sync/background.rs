//! Background sync worker: periodic reconciliation trigger.
//!
//! Spawns a tokio task that runs a pass:
//! 1. on every tick while online
//! 2. immediately when connectivity flips from offline to online
//!
//! Offline ticks are skipped. Records interrupted mid-sync by a previous
//! process are recovered once when the worker starts.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::reconciler::Reconciler;

/// Handle for the background sync task.
///
/// `shutdown()` lets the current pass finish, then stops the loop. Dropping
/// the handle does the same.
pub struct SyncWorkerHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SyncWorkerHandle {
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Shut down and wait for the task to exit.
    pub async fn join(mut self) {
        self.shutdown();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Sync worker task failed");
            }
        }
    }
}

impl Drop for SyncWorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Start the worker on the current tokio runtime.
pub fn start_sync_worker(
    reconciler: Arc<Reconciler>,
    online: watch::Receiver<bool>,
) -> Result<SyncWorkerHandle, tokio::runtime::TryCurrentError> {
    let runtime = tokio::runtime::Handle::try_current()?;
    let (shutdown, shutdown_rx) = watch::channel(false);

    let task = runtime.spawn(async move {
        tracing::info!(
            tick_secs = reconciler.config().tick_interval.as_secs(),
            "Sync worker started"
        );
        if let Err(e) = reconciler.recover_interrupted() {
            tracing::warn!(error = %e, "Failed to recover interrupted syncs");
        }
        worker_loop(&reconciler, online, shutdown_rx).await;
        tracing::info!("Sync worker shutting down");
    });

    Ok(SyncWorkerHandle {
        shutdown,
        task: Some(task),
    })
}

async fn worker_loop(
    reconciler: &Reconciler,
    mut online: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(reconciler.config().tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut was_online = *online.borrow_and_update();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if *online.borrow() {
                    run_pass(reconciler).await;
                }
            }
            changed = online.changed() => {
                if changed.is_err() {
                    tracing::debug!("Connectivity monitor dropped");
                    break;
                }
                let now_online = *online.borrow_and_update();
                if now_online && !was_online {
                    tracing::info!("Back online, syncing now");
                    run_pass(reconciler).await;
                }
                was_online = now_online;
            }
        }
    }
}

async fn run_pass(reconciler: &Reconciler) {
    if let Err(e) = reconciler.run_pass().await {
        tracing::warn!(error = %e, "Sync pass failed; retrying next tick");
    }
}
