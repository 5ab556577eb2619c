//! Background Timers
//!
//! Periodic work (snapshot rules and the log flusher) runs as Tokio tasks
//! that tick on a fixed interval and hand the actual disk work to the
//! blocking pool.
//!
//! Each `save <seconds> <changes>` rule gets its own timer. On every tick
//! the rule's change counter is swapped back to zero; if it had reached the
//! threshold a snapshot is written. The counter is reset whether or not a
//! save ran.

use crate::persistence::SnapshotManager;
use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// A handle to a running periodic task.
///
/// When this handle is dropped, the task will be stopped.
#[derive(Debug)]
pub struct PeriodicTask {
    name: &'static str,
    /// Sender to signal shutdown
    shutdown_tx: watch::Sender<bool>,
}

impl PeriodicTask {
    /// Spawns `work` to run every `period` on the blocking pool.
    ///
    /// The first run happens one full period after spawning. Must be called
    /// from within a Tokio runtime.
    pub fn spawn<F>(name: &'static str, period: Duration, work: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(periodic_loop(name, period, Arc::new(work), shutdown_rx));

        debug!(task = name, period_ms = period.as_millis() as u64, "Periodic task started");

        Self { name, shutdown_tx }
    }

    /// Stops the task.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        debug!(task = self.name, "Periodic task stopped");
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn periodic_loop<F>(
    name: &'static str,
    period: Duration,
    work: Arc<F>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    F: Fn() + Send + Sync + 'static,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        // Wait for the next tick or shutdown signal
        tokio::select! {
            _ = ticker.tick() => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!(task = name, "Periodic task received shutdown signal");
                    return;
                }
            }
        }

        let work = Arc::clone(&work);
        if let Err(e) = tokio::task::spawn_blocking(move || work()).await {
            error!(task = name, error = %e, "Periodic task failed");
        }
    }
}

/// Starts one snapshot timer per configured save rule.
///
/// Dropping the returned handles stops the timers.
pub fn start_save_timers(
    snapshots: Arc<SnapshotManager>,
    storage: Arc<StorageEngine>,
) -> Vec<PeriodicTask> {
    let timers: Vec<PeriodicTask> = snapshots
        .rules()
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            let snapshots = Arc::clone(&snapshots);
            let storage = Arc::clone(&storage);
            PeriodicTask::spawn("snapshot-rule", rule.interval, move || {
                run_save_rule(&snapshots, &storage, index);
            })
        })
        .collect();

    if !timers.is_empty() {
        info!(rules = timers.len(), "Snapshot timers started");
    }
    timers
}

/// One tick of save rule `index`. Returns true if a snapshot was written.
fn run_save_rule(snapshots: &SnapshotManager, storage: &StorageEngine, index: usize) -> bool {
    let Some(rule) = snapshots.rules().get(index).copied() else {
        return false;
    };

    let changes = snapshots.take_changes(index);
    if changes < rule.changes {
        return false;
    }

    debug!(
        interval_secs = rule.interval.as_secs(),
        changes,
        threshold = rule.changes,
        "Save rule triggered"
    );

    match snapshots.save(storage) {
        Ok(_) => true,
        Err(e) => {
            error!(path = %snapshots.path().display(), error = %e, "Scheduled snapshot failed");
            false
        }
    }
}
