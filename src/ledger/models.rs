//! Data models for the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::{AdmissionRuleSpec, EvictionReason, EvictionRuleSpec};

/// A configured ratio-farming task.
///
/// Rule sets are stored in their raw string form; the engine parses them
/// into typed predicates when the task is loaded or reconfigured. Counters
/// are mutated only by the task's admission loop and the reconciliation
/// sweep, and only ever grow.
#[derive(Debug, Clone, PartialEq)]
pub struct BrushTask {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    /// Feed URL polled for candidates.
    pub feed_url: String,
    /// Site cookie for authenticated detail-page probes.
    pub cookie: Option<String>,
    pub user_agent: Option<String>,
    pub use_proxy: bool,
    /// Which download backend this task submits to.
    pub backend_id: i64,
    /// Admission-loop polling interval, seconds.
    pub interval_secs: u64,
    /// Comma-separated tags attached to submitted torrents.
    pub label: Option<String>,
    /// Size cap on the task's active pool, GiB. `None` means uncapped.
    pub seed_size_gib: Option<f64>,
    /// Send admission/eviction notifications for this task.
    pub notify: bool,
    pub admission: AdmissionRuleSpec,
    pub eviction: EvictionRuleSpec,
    pub modified_at: DateTime<Utc>,
}

/// Cumulative, monotonically non-decreasing per-task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounters {
    pub admitted: u64,
    pub evicted: u64,
    pub uploaded_bytes: u64,
    pub downloaded_bytes: u64,
}

/// Lifecycle state of a managed torrent row.
///
/// Orphaned torrents (vanished from the backend without a rule match) are
/// purged rather than stored, so only these two states persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TorrentState {
    Active,
    Evicted,
}

impl TorrentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Evicted => "EVICTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "EVICTED" => Some(Self::Evicted),
            _ => None,
        }
    }
}

/// An admitted, tracked torrent with a backend identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedTorrent {
    pub task_id: i64,
    /// Backend-assigned id (hash for qBittorrent, numeric id for
    /// Transmission).
    pub backend_id: String,
    pub title: String,
    /// Download locator the torrent was admitted from.
    pub locator: String,
    /// Declared size, bytes.
    pub size: u64,
    pub admitted_at: DateTime<Utc>,
    pub state: TorrentState,
    /// Uploaded bytes at eviction time.
    pub final_uploaded: Option<u64>,
    /// Downloaded bytes at eviction time.
    pub final_downloaded: Option<u64>,
}

/// A new admission to record in the ledger.
#[derive(Debug, Clone)]
pub struct NewAdmission {
    pub backend_id: String,
    pub title: String,
    pub locator: String,
    pub size: u64,
}

/// One rule-matched eviction to apply during a sweep.
#[derive(Debug, Clone)]
pub struct EvictionRecord {
    pub backend_id: String,
    pub uploaded: u64,
    pub downloaded: u64,
    pub reason: EvictionReason,
}
