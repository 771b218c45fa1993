//! Per-task admission iteration.
//!
//! One firing of a task's timer: guard the task's configuration, check
//! quota, fetch the feed, and walk candidates in feed order through dedup,
//! rule evaluation and backend submission. A failure on one candidate never
//! aborts the remaining ones.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::backend::{DownloadBackend, SubmitRequest};
use crate::ledger::NewAdmission;
use crate::rules::evaluate_admission;

use super::quota::QuotaDecision;
use super::{EngineState, TaskEntry, fmt_bytes};

/// What one admission iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdmissionReport {
    /// Candidates delivered by the feed.
    pub candidates: usize,
    /// Skipped because their locator was already processed.
    pub already_seen: usize,
    /// Rejected by the admission rules.
    pub rejected: usize,
    /// Submitted to the backend and recorded.
    pub admitted: usize,
}

/// Run one admission iteration for a task.
pub(crate) fn run_admission(state: &EngineState, entry: &TaskEntry) -> Result<AdmissionReport> {
    let task = &entry.task;
    let rules = &entry.admission;
    let mut report = AdmissionReport::default();

    if !task.enabled {
        debug!("Task '{}' is disabled, skipping admission", task.name);
        return Ok(report);
    }
    if task.feed_url.is_empty() {
        warn!("Task '{}' has no feed URL configured, cannot admit", task.name);
        return Ok(report);
    }
    if rules.requires_cookie() && task.cookie.is_none() {
        warn!(
            "Task '{}' demands a promotion tier but has no site cookie, cannot admit",
            task.name
        );
        return Ok(report);
    }
    let Some(backend) = state.backends.backend(task.backend_id) else {
        warn!(
            "Task '{}' references unknown backend {}, cannot admit",
            task.name, task.backend_id
        );
        return Ok(report);
    };

    info!("Starting admission for task '{}'", task.name);

    if state.quota.check(task, rules, backend.as_ref())? != QuotaDecision::Allow {
        return Ok(report);
    }

    let candidates = state
        .feed
        .fetch(&task.feed_url)
        .with_context(|| format!("Feed fetch failed for task '{}'", task.name))?;
    if candidates.is_empty() {
        info!("Task '{}': feed returned no candidates", task.name);
        return Ok(report);
    }
    report.candidates = candidates.len();
    debug!("Task '{}': feed returned {} candidates", task.name, candidates.len());

    // With a concurrency cap, this iteration may only fill the slots the
    // backend reports free right now.
    let slots = match rules.concurrent_cap {
        Some(cap) => match backend.downloading_torrents(None) {
            Ok(downloading) => Some((cap as usize).saturating_sub(downloading.len())),
            Err(e) => {
                warn!(
                    "Task '{}': backend unreachable for slot budget, not admitting: {:#}",
                    task.name, e
                );
                return Ok(report);
            }
        },
        None => None,
    };

    let tags: Vec<String> = task
        .label
        .as_deref()
        .map(|label| label.split(',').map(|t| t.trim().to_string()).collect())
        .unwrap_or_default();
    let now = Utc::now();

    for candidate in &candidates {
        if !state.dedup.check_and_insert(&candidate.locator) {
            debug!("'{}' already processed, skipping", candidate.title);
            report.already_seen += 1;
            continue;
        }

        if !evaluate_admission(
            rules,
            candidate,
            state.probe.as_ref(),
            task.cookie.as_deref(),
            task.user_agent.as_deref(),
            task.use_proxy,
            now,
        ) {
            report.rejected += 1;
            continue;
        }

        debug!("'{}' passed admission rules, submitting", candidate.title);
        if !submit_and_record(state, entry, backend.as_ref(), &tags, candidate)? {
            continue;
        }
        report.admitted += 1;

        if let Some(slots) = slots {
            if report.admitted >= slots {
                info!(
                    "Task '{}': download slots exhausted after {} admissions",
                    task.name, report.admitted
                );
                break;
            }
        }
        // Quota is rechecked after every admission, never pre-authorized in
        // bulk.
        if state.quota.check(task, rules, backend.as_ref())? != QuotaDecision::Allow {
            break;
        }
    }

    info!(
        "Task '{}': admission pass added {} of {} candidates",
        task.name, report.admitted, report.candidates
    );
    Ok(report)
}

/// Submit one candidate to the backend and record it in the ledger.
/// Returns `false` when the backend refused the submission.
fn submit_and_record(
    state: &EngineState,
    entry: &TaskEntry,
    backend: &dyn DownloadBackend,
    tags: &[String],
    candidate: &crate::feed::Candidate,
) -> Result<bool> {
    let task = &entry.task;
    let request = SubmitRequest {
        title: &candidate.title,
        locator: &candidate.locator,
        size: candidate.size,
        tags,
        download_limit: entry.admission.download_limit,
        upload_limit: entry.admission.upload_limit,
    };
    let backend_id = match backend.submit(&request) {
        Ok(id) => id,
        Err(e) => {
            warn!(
                "Task '{}': failed to submit '{}' ({}): {}",
                task.name, candidate.title, candidate.locator, e
            );
            return Ok(false);
        }
    };
    info!("Task '{}': admitted '{}'", task.name, candidate.title);

    if task.notify {
        let title = format!("Brush task {} admitted a torrent", task.name);
        let body = format!(
            "Torrent: {}\nSize: {}",
            candidate.title,
            fmt_bytes(candidate.size)
        );
        if let Err(e) = state.notifier.notify(&title, &body) {
            warn!("Admission notification failed: {:#}", e);
        }
    }

    let admission = NewAdmission {
        backend_id,
        title: candidate.title.clone(),
        locator: candidate.locator.clone(),
        size: candidate.size,
    };
    // Counter writes for this task must not interleave with the sweep's.
    let _guard = entry.mutation.lock().unwrap();
    if state.ledger.record_admission(task.id, &admission)? {
        state.ledger.bump_admitted(task.id)?;
    } else {
        info!("Task '{}': '{}' was already recorded", task.name, candidate.title);
    }
    Ok(true)
}
