//! Per-task admission quota checks.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, warn};

use crate::backend::DownloadBackend;
use crate::ledger::{BrushTask, Ledger};
use crate::rules::{AdmissionRules, GIB};

use super::fmt_bytes;

/// Outcome of a quota check. Everything but `Allow` is a normal rejection,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    /// The task's active pool already holds at least its size cap.
    SizeCapReached,
    /// The backend reports as many downloading torrents as the task allows.
    ConcurrencyCapReached,
    /// The backend could not be queried; capacity is never assumed free.
    BackendUnavailable,
}

/// Current usage of a task's quota.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    /// Active managed torrents.
    pub count: usize,
    /// Sum of their declared sizes, bytes.
    pub total_bytes: u64,
}

/// Gates admissions on the task's size cap and concurrency cap.
///
/// The size cap is answered from the ledger; the concurrency cap is a live
/// backend query, so several tasks sharing one backend can briefly overshoot
/// between query and submit.
pub struct QuotaController {
    ledger: Arc<dyn Ledger>,
}

impl QuotaController {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { ledger }
    }

    /// Check whether `task` may admit another torrent right now.
    pub fn check(
        &self,
        task: &BrushTask,
        rules: &AdmissionRules,
        backend: &dyn DownloadBackend,
    ) -> Result<QuotaDecision> {
        if let Some(cap_gib) = task.seed_size_gib {
            let cap_bytes = (cap_gib * GIB) as u64;
            let active_bytes = self.ledger.active_total_size(task.id)?;
            if active_bytes >= cap_bytes {
                warn!(
                    "Task '{}' holds {} of its {} cap, not admitting",
                    task.name,
                    fmt_bytes(active_bytes),
                    fmt_bytes(cap_bytes),
                );
                return Ok(QuotaDecision::SizeCapReached);
            }
        }

        if let Some(cap) = rules.concurrent_cap {
            let downloading = match backend.downloading_torrents(None) {
                Ok(torrents) => torrents.len(),
                Err(e) => {
                    error!(
                        "Task '{}': backend unreachable for downloading count, not admitting: {:#}",
                        task.name, e
                    );
                    return Ok(QuotaDecision::BackendUnavailable);
                }
            };
            if downloading >= cap as usize {
                warn!(
                    "Task '{}': backend already downloading {} torrents (cap {}), not admitting",
                    task.name, downloading, cap
                );
                return Ok(QuotaDecision::ConcurrencyCapReached);
            }
        }

        Ok(QuotaDecision::Allow)
    }

    /// Current count and byte total of the task's active pool.
    pub fn usage(&self, task_id: i64) -> Result<QuotaUsage> {
        let active = self.ledger.active_torrents(task_id)?;
        Ok(QuotaUsage {
            count: active.len(),
            total_bytes: active.iter().map(|t| t.size).sum(),
        })
    }
}
