//! The brush engine: an explicit process-wide state object tying the
//! collaborators together, plus the periodic admission loops and the
//! reconciliation sweep that run against it.
//!
//! Lifecycle: `start()` loads tasks from the ledger and spawns the timers;
//! `stop()` cancels future firings and lets in-flight iterations finish.

mod admission;
mod dedup;
mod quota;
mod reconcile;
mod scheduler;

pub use admission::AdmissionReport;
pub use dedup::DedupFilter;
pub use quota::{QuotaController, QuotaDecision, QuotaUsage};
pub use reconcile::SweepReport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use byte_unit::{Byte, UnitType};
use thiserror::Error;
use tracing::info;

use crate::backend::BackendProvider;
use crate::config::EngineSettings;
use crate::feed::FeedSource;
use crate::ledger::{BrushTask, Ledger, ManagedTorrent, TaskCounters};
use crate::notify::Notifier;
use crate::probe::AttributeProbe;
use crate::rules::{AdmissionRules, EvictionRules};

use scheduler::SchedulerHandle;

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task {0} not found")]
    TaskNotFound(i64),
    #[error("task {0} still has active managed torrents")]
    TaskHasActiveTorrents(i64),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A task plus its rule sets parsed into typed predicates, referenced from
/// the task table by integer id.
pub(crate) struct TaskEntry {
    pub task: BrushTask,
    pub admission: AdmissionRules,
    pub eviction: EvictionRules,
    /// Held around ledger mutations so a task's admission firing and the
    /// sweep's pass over the same task never interleave counter writes.
    /// Keyed by task id: reconfiguring a task carries the lock over to the
    /// replacement entry (see [`TaskTable::insert`]).
    pub mutation: Arc<Mutex<()>>,
}

impl TaskEntry {
    fn new(task: BrushTask) -> Self {
        let admission = AdmissionRules::parse(&task.admission);
        let eviction = EvictionRules::parse(&task.eviction);
        Self {
            task,
            admission,
            eviction,
            mutation: Arc::new(Mutex::new(())),
        }
    }
}

/// In-memory task table keyed by task id.
#[derive(Default)]
pub(crate) struct TaskTable {
    entries: Mutex<HashMap<i64, Arc<TaskEntry>>>,
}

impl TaskTable {
    pub fn get(&self, task_id: i64) -> Option<Arc<TaskEntry>> {
        self.entries.lock().unwrap().get(&task_id).cloned()
    }

    pub fn insert(&self, task: BrushTask) {
        let mut entries = self.entries.lock().unwrap();
        let mut entry = TaskEntry::new(task);
        // A sweep may still hold the old entry's lock; the replacement must
        // contend on the same one.
        if let Some(old) = entries.get(&entry.task.id) {
            entry.mutation = Arc::clone(&old.mutation);
        }
        entries.insert(entry.task.id, Arc::new(entry));
    }

    pub fn remove(&self, task_id: i64) -> bool {
        self.entries.lock().unwrap().remove(&task_id).is_some()
    }

    pub fn replace_all(&self, tasks: Vec<BrushTask>) {
        let mut entries = self.entries.lock().unwrap();
        entries.clear();
        for task in tasks {
            let entry = Arc::new(TaskEntry::new(task));
            entries.insert(entry.task.id, entry);
        }
    }

    /// Stable-ordered view of the current entries.
    pub fn snapshot(&self) -> Vec<Arc<TaskEntry>> {
        let mut entries: Vec<_> = self.entries.lock().unwrap().values().cloned().collect();
        entries.sort_by_key(|e| e.task.id);
        entries
    }
}

/// Shared engine state: collaborators, dedup filter and task table.
pub(crate) struct EngineState {
    pub settings: EngineSettings,
    pub ledger: Arc<dyn Ledger>,
    pub feed: Arc<dyn FeedSource>,
    pub probe: Arc<dyn AttributeProbe>,
    pub backends: Arc<dyn BackendProvider>,
    pub notifier: Arc<dyn Notifier>,
    pub quota: QuotaController,
    pub dedup: DedupFilter,
    pub tasks: TaskTable,
}

/// A task's externally visible status.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub task_id: i64,
    pub name: String,
    pub active: Vec<ManagedTorrent>,
    pub counters: TaskCounters,
}

/// The admission-and-eviction engine.
pub struct BrushEngine {
    state: Arc<EngineState>,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl BrushEngine {
    pub fn new(
        settings: EngineSettings,
        ledger: Arc<dyn Ledger>,
        feed: Arc<dyn FeedSource>,
        probe: Arc<dyn AttributeProbe>,
        backends: Arc<dyn BackendProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let quota = QuotaController::new(Arc::clone(&ledger));
        Self {
            state: Arc::new(EngineState {
                settings,
                ledger,
                feed,
                probe,
                backends,
                notifier,
                quota,
                dedup: DedupFilter::new(),
                tasks: TaskTable::default(),
            }),
            scheduler: Mutex::new(None),
        }
    }

    /// Load tasks from the ledger and start the timers. Restarts cleanly
    /// when already running.
    pub fn start(&self) -> Result<(), EngineError> {
        let tasks = self.state.ledger.load_tasks()?;
        let count = tasks.len();
        self.state.tasks.replace_all(tasks);

        let mut scheduler = self.scheduler.lock().unwrap();
        if let Some(running) = scheduler.take() {
            running.stop();
        }
        *scheduler = Some(scheduler::spawn_timers(Arc::clone(&self.state)));
        info!("Brush engine started with {} configured tasks", count);
        Ok(())
    }

    /// Cancel future timer firings and wait for in-flight iterations.
    pub fn stop(&self) {
        if let Some(running) = self.scheduler.lock().unwrap().take() {
            running.stop();
            info!("Brush engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.lock().unwrap().is_some()
    }

    /// Create or update a task. Persisted first, then picked up by the
    /// timers (rescheduling when the engine is running).
    pub fn configure_task(&self, task: BrushTask) -> Result<(), EngineError> {
        self.state.ledger.upsert_task(&task)?;
        self.state.tasks.insert(task);
        self.reschedule();
        Ok(())
    }

    /// Remove a task definition. Refused while the task still has active
    /// managed torrents.
    pub fn remove_task(&self, task_id: i64) -> Result<(), EngineError> {
        if self.state.tasks.get(task_id).is_none()
            && self.state.ledger.get_task(task_id)?.is_none()
        {
            return Err(EngineError::TaskNotFound(task_id));
        }
        if !self.state.ledger.active_torrents(task_id)?.is_empty() {
            return Err(EngineError::TaskHasActiveTorrents(task_id));
        }
        self.state.ledger.delete_task(task_id)?;
        self.state.tasks.remove(task_id);
        self.reschedule();
        Ok(())
    }

    /// Run one admission iteration for a task on the calling thread.
    pub fn trigger_admission_now(&self, task_id: i64) -> Result<AdmissionReport, EngineError> {
        let entry = self
            .state
            .tasks
            .get(task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;
        Ok(admission::run_admission(&self.state, &entry)?)
    }

    /// Run one reconciliation sweep over all tasks on the calling thread.
    pub fn trigger_reconciliation_now(&self) -> SweepReport {
        reconcile::run_sweep(&self.state)
    }

    /// Active torrents and cumulative counters for a task.
    pub fn task_status(&self, task_id: i64) -> Result<TaskStatus, EngineError> {
        let entry = self
            .state
            .tasks
            .get(task_id)
            .ok_or(EngineError::TaskNotFound(task_id))?;
        Ok(TaskStatus {
            task_id,
            name: entry.task.name.clone(),
            active: self.state.ledger.active_torrents(task_id)?,
            counters: self.state.ledger.counters(task_id)?,
        })
    }

    /// Current quota usage for a task.
    pub fn quota_usage(&self, task_id: i64) -> Result<QuotaUsage, EngineError> {
        if self.state.tasks.get(task_id).is_none() {
            return Err(EngineError::TaskNotFound(task_id));
        }
        Ok(self.state.quota.usage(task_id)?)
    }

    fn reschedule(&self) {
        let mut scheduler = self.scheduler.lock().unwrap();
        if let Some(running) = scheduler.take() {
            running.stop();
            *scheduler = Some(scheduler::spawn_timers(Arc::clone(&self.state)));
        }
    }
}

impl Drop for BrushEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Human-readable byte count for logs and notifications.
pub(crate) fn fmt_bytes(bytes: u64) -> String {
    let adjusted = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Binary);
    format!("{adjusted:.2}")
}
