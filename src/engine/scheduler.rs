//! Interval timers driving the admission loops and the reconciliation sweep.
//!
//! One worker thread per enabled task plus a single shared sweep thread.
//! Stopping cancels future firings and joins the workers; an in-flight
//! iteration always runs to completion.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EngineState, admission, reconcile};

/// Running timer threads for one engine start.
pub(crate) struct SchedulerHandle {
    cancel: CancellationToken,
    threads: Vec<thread::JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Cancel future firings and wait for in-flight iterations to finish.
    pub fn stop(self) {
        self.cancel.cancel();
        for handle in self.threads {
            if handle.join().is_err() {
                warn!("A scheduler thread panicked during shutdown");
            }
        }
    }
}

/// Spawn the per-task admission timers and the shared sweep timer.
pub(crate) fn spawn_timers(state: Arc<EngineState>) -> SchedulerHandle {
    let cancel = CancellationToken::new();
    let mut threads = Vec::new();
    let mut scheduled = 0;

    for entry in state.tasks.snapshot() {
        if !entry.task.enabled || entry.task.interval_secs == 0 {
            continue;
        }
        let task_id = entry.task.id;
        let interval = Duration::from_secs(entry.task.interval_secs);
        let state = Arc::clone(&state);
        let cancel = cancel.clone();
        scheduled += 1;
        threads.push(thread::spawn(move || {
            loop {
                if wait_or_cancelled(&cancel, interval) {
                    break;
                }
                // Re-resolve the entry each firing; the task may be gone.
                let Some(entry) = state.tasks.get(task_id) else {
                    debug!("Task {} no longer present, admission timer exiting", task_id);
                    break;
                };
                if let Err(e) = admission::run_admission(&state, &entry) {
                    warn!("Admission iteration for task {} failed: {:#}", task_id, e);
                }
            }
        }));
    }

    let sweep_interval = Duration::from_secs(state.settings.sweep_interval_secs);
    {
        let state = Arc::clone(&state);
        let cancel = cancel.clone();
        threads.push(thread::spawn(move || {
            loop {
                if wait_or_cancelled(&cancel, sweep_interval) {
                    break;
                }
                reconcile::run_sweep(&state);
            }
        }));
    }

    info!(
        "Scheduler started: {} admission timers, sweep every {}s",
        scheduled, state.settings.sweep_interval_secs
    );
    SchedulerHandle { cancel, threads }
}

/// Sleep for `interval` in short slices. Returns `true` when cancelled.
fn wait_or_cancelled(cancel: &CancellationToken, interval: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(250);
    let mut remaining = interval;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return true;
        }
        let step = remaining.min(SLICE);
        thread::sleep(step);
        remaining -= step;
    }
    cancel.is_cancelled()
}
