//! Ledger trait definition.

use anyhow::Result;

use super::models::{BrushTask, EvictionRecord, ManagedTorrent, NewAdmission, TaskCounters};

/// Trait for ledger storage backends.
///
/// All mutations for a given task id are linearized by the implementation;
/// concurrent callers never interleave conflicting counter updates.
pub trait Ledger: Send + Sync {
    // =========================================================================
    // Task configuration
    // =========================================================================

    /// Insert or replace a task definition. Counters are preserved across
    /// replacement.
    fn upsert_task(&self, task: &BrushTask) -> Result<()>;

    /// Delete a task definition and its managed-torrent rows.
    fn delete_task(&self, task_id: i64) -> Result<()>;

    /// Load all task definitions.
    fn load_tasks(&self) -> Result<Vec<BrushTask>>;

    fn get_task(&self, task_id: i64) -> Result<Option<BrushTask>>;

    // =========================================================================
    // Managed torrents
    // =========================================================================

    /// Record an admitted torrent. Idempotent per (task, locator): returns
    /// `false` when the locator was already recorded for this task.
    fn record_admission(&self, task_id: i64, admission: &NewAdmission) -> Result<bool>;

    /// All torrents currently in the Active state for a task.
    fn active_torrents(&self, task_id: i64) -> Result<Vec<ManagedTorrent>>;

    /// Sum of declared sizes over the task's Active torrents, bytes.
    fn active_total_size(&self, task_id: i64) -> Result<u64>;

    /// Transition rule-matched torrents Active → Evicted, recording their
    /// final byte counters. Already-evicted rows are left untouched.
    fn apply_evictions(&self, task_id: i64, evictions: &[EvictionRecord]) -> Result<()>;

    /// Purge rows for torrents that vanished from the backend without a
    /// rule match. Returns how many rows were removed.
    fn purge_orphans(&self, task_id: i64, backend_ids: &[String]) -> Result<usize>;

    // =========================================================================
    // Counters
    // =========================================================================

    /// Increment the task's admitted counter by one.
    fn bump_admitted(&self, task_id: i64) -> Result<()>;

    /// Add byte totals and an evicted count to the task's cumulative
    /// counters. Called once per task per sweep.
    fn accumulate_counters(
        &self,
        task_id: i64,
        uploaded: u64,
        downloaded: u64,
        evicted: u64,
    ) -> Result<()>;

    fn counters(&self, task_id: i64) -> Result<TaskCounters>;
}
