//! Global reconciliation sweep.
//!
//! One shared timer walks every enabled task: pull the backend's view of the
//! task's active torrents, derive metrics, evaluate eviction rules, detect
//! orphans, batch-delete, and persist counters once per task. A failure in
//! one task never blocks the others, and a failed backend query aborts that
//! task's pass with zero mutation — an unreachable backend never means
//! "the torrents are gone."

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::backend::{Phase, TorrentSnapshot};
use crate::ledger::EvictionRecord;

use super::{EngineState, TaskEntry, fmt_bytes};

/// What one sweep did across all tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Tasks whose pass ran to completion.
    pub tasks_swept: usize,
    /// Tasks whose pass was aborted (backend unreachable or ledger error).
    pub tasks_aborted: usize,
    pub evicted: usize,
    pub orphaned: usize,
}

/// Run one reconciliation sweep over every enabled task.
pub(crate) fn run_sweep(state: &EngineState) -> SweepReport {
    let entries = state.tasks.snapshot();
    let mut report = SweepReport::default();

    for entry in entries {
        if !entry.task.enabled {
            continue;
        }
        match sweep_task(state, &entry) {
            Ok((evicted, orphaned)) => {
                report.tasks_swept += 1;
                report.evicted += evicted;
                report.orphaned += orphaned;
            }
            Err(e) => {
                report.tasks_aborted += 1;
                warn!(
                    "Reconciliation pass for task '{}' aborted, no changes applied: {:#}",
                    entry.task.name, e
                );
            }
        }
    }

    info!(
        "Reconciliation sweep: {} tasks swept, {} aborted, {} evicted, {} orphaned",
        report.tasks_swept, report.tasks_aborted, report.evicted, report.orphaned
    );
    report
}

/// Reconcile one task. Returns (rule evictions, orphans purged).
fn sweep_task(state: &EngineState, entry: &Arc<TaskEntry>) -> Result<(usize, usize)> {
    let task = &entry.task;

    let active = state
        .ledger
        .active_torrents(task.id)
        .context("Ledger read failed")?;
    // Nothing tracked means nothing to reconcile; never treat an empty
    // ledger as license to touch the backend.
    if active.is_empty() {
        return Ok((0, 0));
    }
    let tracked_ids: Vec<String> = active.iter().map(|t| t.backend_id.clone()).collect();

    let Some(backend) = state.backends.backend(task.backend_id) else {
        warn!(
            "Task '{}' references unknown backend {}, skipping sweep",
            task.name, task.backend_id
        );
        return Ok((0, 0));
    };

    // Both queries must succeed before anything mutates.
    let completed = backend
        .completed_torrents(&tracked_ids)
        .context("Completed-torrents query failed")?;
    let downloading = backend
        .downloading_torrents(Some(&tracked_ids))
        .context("Downloading-torrents query failed")?;

    let now = Utc::now().timestamp();
    let mut total_uploaded: u64 = 0;
    let mut total_downloaded: u64 = 0;
    let mut evictions: Vec<EvictionRecord> = Vec::new();
    let mut present: HashSet<&str> = HashSet::new();

    let mut consider = |snapshot: TorrentSnapshot| {
        total_uploaded += snapshot.uploaded;
        total_downloaded += snapshot.downloaded;
        let Some(reason) = entry.eviction.evaluate(&snapshot.metrics) else {
            return None;
        };
        info!(
            "Task '{}': '{}' matched eviction rule ({}), deleting",
            task.name,
            snapshot.name,
            reason.label()
        );
        if task.notify {
            let title = format!("Brush task {} evicted a torrent", task.name);
            let body = format!("Reason: {}\nTorrent: {}", reason.label(), snapshot.name);
            if let Err(e) = state.notifier.notify(&title, &body) {
                warn!("Eviction notification failed: {:#}", e);
            }
        }
        Some(EvictionRecord {
            backend_id: snapshot.backend_id,
            uploaded: snapshot.uploaded,
            downloaded: snapshot.downloaded,
            reason,
        })
    };

    for raw in &completed {
        if !present.insert(raw.backend_id()) {
            continue;
        }
        if let Some(record) = consider(raw.snapshot(Phase::Completed, now)) {
            evictions.push(record);
        }
    }
    for raw in &downloading {
        if !present.insert(raw.backend_id()) {
            continue;
        }
        if let Some(record) = consider(raw.snapshot(Phase::Downloading, now)) {
            evictions.push(record);
        }
    }

    // Tracked but reported by neither query: removed externally.
    let orphans: Vec<String> = tracked_ids
        .iter()
        .filter(|id| !present.contains(id.as_str()))
        .cloned()
        .collect();
    if !orphans.is_empty() {
        info!(
            "Task '{}': {} torrents vanished from the backend, purging records: {:?}",
            task.name,
            orphans.len(),
            orphans
        );
    }

    // Counter writes for this task must not interleave with its admission
    // loop's.
    let _guard = entry.mutation.lock().unwrap();

    let orphaned = state
        .ledger
        .purge_orphans(task.id, &orphans)
        .context("Orphan purge failed")?;
    state
        .ledger
        .apply_evictions(task.id, &evictions)
        .context("Eviction update failed")?;

    if !evictions.is_empty() {
        let delete_ids: Vec<String> = evictions.iter().map(|e| e.backend_id.clone()).collect();
        if let Err(e) = backend.delete_torrents(&delete_ids, true) {
            // The rows are already marked evicted, so the torrents will not
            // be submitted for deletion again; the leftover backend entries
            // need manual cleanup.
            warn!(
                "Task '{}': backend delete failed for {:?}: {:#}",
                task.name, delete_ids, e
            );
        } else {
            info!("Task '{}': deleted {} torrents", task.name, delete_ids.len());
        }
    } else {
        debug!("Task '{}': no torrents matched eviction rules", task.name);
    }

    state
        .ledger
        .accumulate_counters(
            task.id,
            total_uploaded,
            total_downloaded,
            (evictions.len() + orphaned) as u64,
        )
        .context("Counter persistence failed")?;
    debug!(
        "Task '{}': accumulated {} up / {} down this pass",
        task.name,
        fmt_bytes(total_uploaded),
        fmt_bytes(total_downloaded)
    );

    Ok((evictions.len(), orphaned))
}
