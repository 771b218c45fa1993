//! Backend-family tagged raw torrent state and metric derivation.
//!
//! The two supported backend families expose different raw fields:
//! qBittorrent reports uploaded/downloaded byte counters directly, while
//! Transmission reports fractional progress and a ratio that the derivation
//! multiplies out. Each family has one derivation path per phase, selected
//! explicitly by the caller.

use crate::rules::TorrentMetrics;

/// Which lifecycle phase a torrent was reported in. Determines the metric
/// subset exposed to the eviction rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Completed,
    Downloading,
}

/// Raw per-torrent state as reported by a backend query.
///
/// Timestamps are unix seconds; a zero timestamp means "not reported".
#[derive(Debug, Clone)]
pub enum RawTorrent {
    QBittorrent {
        hash: String,
        name: String,
        added_on: i64,
        /// Zero while still downloading.
        completion_on: i64,
        ratio: f64,
        uploaded: u64,
        downloaded: u64,
        last_activity: i64,
    },
    Transmission {
        id: String,
        name: String,
        date_added: i64,
        date_done: Option<i64>,
        date_active: i64,
        /// Declared total size in bytes.
        total_size: u64,
        /// Fractional completion, 0.0..=1.0.
        progress: f64,
        ratio: f64,
    },
}

/// One torrent's derived view for a reconciliation pass: identity, byte
/// totals to accumulate, and the phase-appropriate eviction metrics.
#[derive(Debug, Clone)]
pub struct TorrentSnapshot {
    pub backend_id: String,
    pub name: String,
    pub uploaded: u64,
    pub downloaded: u64,
    pub metrics: TorrentMetrics,
}

impl RawTorrent {
    pub fn backend_id(&self) -> &str {
        match self {
            Self::QBittorrent { hash, .. } => hash,
            Self::Transmission { id, .. } => id,
        }
    }

    /// Derive the phase-appropriate snapshot at time `now` (unix seconds).
    ///
    /// Completed torrents expose seeding time, ratio, uploaded volume,
    /// average upload speed and inactivity; downloading torrents expose
    /// download duration, average upload speed and inactivity. Byte totals
    /// are filled for both phases. Metrics that derive to zero are reported
    /// as not supplied, so a threshold rule never fires on an absent
    /// counter.
    pub fn snapshot(&self, phase: Phase, now: i64) -> TorrentSnapshot {
        match self {
            Self::QBittorrent {
                hash,
                name,
                added_on,
                completion_on,
                ratio,
                uploaded,
                downloaded,
                last_activity,
            } => {
                let download_secs = (now - added_on).max(0);
                let date_done = if *completion_on > 0 { *completion_on } else { *added_on };
                let seeding_secs = if date_done > 0 { (now - date_done).max(0) } else { 0 };
                let avg_upspeed = uploaded / download_secs.max(1) as u64;
                let inactive_secs = if *last_activity > 0 {
                    (now - last_activity).max(0)
                } else {
                    0
                };
                TorrentSnapshot {
                    backend_id: hash.clone(),
                    name: name.clone(),
                    uploaded: *uploaded,
                    downloaded: *downloaded,
                    metrics: phase_metrics(
                        phase,
                        seeding_secs,
                        *ratio,
                        *uploaded,
                        download_secs,
                        avg_upspeed,
                        inactive_secs,
                    ),
                }
            }
            Self::Transmission {
                id,
                name,
                date_added,
                date_done,
                date_active,
                total_size,
                progress,
                ratio,
            } => {
                let date_done = date_done.unwrap_or(*date_added);
                let download_secs = (now - date_added).max(0);
                let seeding_secs = (now - date_done).max(0);
                let downloaded = (*total_size as f64 * progress) as u64;
                let uploaded = (downloaded as f64 * ratio) as u64;
                let avg_upspeed = uploaded / download_secs.max(1) as u64;
                let inactive_secs = if *date_active > 0 { (now - date_active).max(0) } else { 0 };
                TorrentSnapshot {
                    backend_id: id.clone(),
                    name: name.clone(),
                    uploaded,
                    downloaded,
                    metrics: phase_metrics(
                        phase,
                        seeding_secs,
                        *ratio,
                        uploaded,
                        download_secs,
                        avg_upspeed,
                        inactive_secs,
                    ),
                }
            }
        }
    }
}

fn phase_metrics(
    phase: Phase,
    seeding_secs: i64,
    ratio: f64,
    uploaded: u64,
    download_secs: i64,
    avg_upspeed: u64,
    inactive_secs: i64,
) -> TorrentMetrics {
    match phase {
        Phase::Completed => TorrentMetrics {
            seeding_secs: nonzero_i64(seeding_secs),
            ratio: nonzero_f64(ratio),
            uploaded: nonzero_u64(uploaded),
            download_secs: None,
            avg_upspeed: nonzero_u64(avg_upspeed),
            inactive_secs: nonzero_i64(inactive_secs),
        },
        Phase::Downloading => TorrentMetrics {
            seeding_secs: None,
            ratio: None,
            uploaded: None,
            download_secs: nonzero_i64(download_secs),
            avg_upspeed: nonzero_u64(avg_upspeed),
            inactive_secs: nonzero_i64(inactive_secs),
        },
    }
}

fn nonzero_i64(v: i64) -> Option<i64> {
    (v != 0).then_some(v)
}

fn nonzero_u64(v: u64) -> Option<u64> {
    (v != 0).then_some(v)
}

fn nonzero_f64(v: f64) -> Option<f64> {
    (v != 0.0).then_some(v)
}
