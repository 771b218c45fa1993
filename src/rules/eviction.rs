//! Eviction rule evaluation.
//!
//! Six threshold criteria evaluated in a fixed priority order; the first
//! match decides the eviction reason. The ordering is a deterministic
//! tie-break contract: when several criteria match at once, the reported
//! reason is always the highest-priority one.

use serde::{Deserialize, Serialize};

use super::threshold::{GIB, parse_threshold};

/// Why a managed torrent was evicted.
///
/// Variants are declared in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    SeedingTime,
    Ratio,
    UploadVolume,
    DownloadTime,
    AvgUploadSpeed,
    Inactivity,
}

impl EvictionReason {
    /// Human-readable label for notifications and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SeedingTime => "seeding time exceeded",
            Self::Ratio => "share ratio exceeded",
            Self::UploadVolume => "upload volume exceeded",
            Self::DownloadTime => "download time exceeded",
            Self::AvgUploadSpeed => "average upload speed below floor",
            Self::Inactivity => "inactive too long",
        }
    }
}

/// Raw eviction rule set as configured and persisted.
///
/// Each threshold uses the single-bound `mode#value` string form; the
/// comparison direction is fixed per criterion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionRuleSpec {
    /// Seeding time ceiling, hours.
    pub seeding_time: Option<String>,
    /// Share ratio ceiling.
    pub ratio: Option<String>,
    /// Uploaded volume ceiling, GiB.
    pub upload_volume: Option<String>,
    /// Download duration ceiling, hours.
    pub download_time: Option<String>,
    /// Average upload speed floor, KiB/s. Falling below the floor matches.
    pub min_avg_upspeed: Option<String>,
    /// Inactivity ceiling, hours.
    pub inactive_time: Option<String>,
}

/// Eviction rule set parsed into numeric thresholds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EvictionRules {
    pub seeding_hours: Option<f64>,
    pub ratio: Option<f64>,
    pub upload_gib: Option<f64>,
    pub download_hours: Option<f64>,
    pub min_avg_upspeed_kib: Option<f64>,
    pub inactive_hours: Option<f64>,
}

impl EvictionRules {
    pub fn parse(spec: &EvictionRuleSpec) -> Self {
        let t = |raw: &Option<String>| raw.as_deref().and_then(parse_threshold);
        Self {
            seeding_hours: t(&spec.seeding_time),
            ratio: t(&spec.ratio),
            upload_gib: t(&spec.upload_volume),
            download_hours: t(&spec.download_time),
            min_avg_upspeed_kib: t(&spec.min_avg_upspeed),
            inactive_hours: t(&spec.inactive_time),
        }
    }

    /// Evaluate the rule set against one torrent's derived metrics.
    ///
    /// A criterion applies only when its rule is configured and the metric
    /// was supplied (metrics are phase-appropriate: a still-downloading
    /// torrent has no seeding time or ratio). Returns the first match.
    pub fn evaluate(&self, m: &TorrentMetrics) -> Option<EvictionReason> {
        if let (Some(hours), Some(secs)) = (self.seeding_hours, m.seeding_secs) {
            if secs as f64 > hours * 3600.0 {
                return Some(EvictionReason::SeedingTime);
            }
        }
        if let (Some(limit), Some(ratio)) = (self.ratio, m.ratio) {
            if ratio > limit {
                return Some(EvictionReason::Ratio);
            }
        }
        if let (Some(gib), Some(uploaded)) = (self.upload_gib, m.uploaded) {
            if uploaded as f64 > gib * GIB {
                return Some(EvictionReason::UploadVolume);
            }
        }
        if let (Some(hours), Some(secs)) = (self.download_hours, m.download_secs) {
            if secs as f64 > hours * 3600.0 {
                return Some(EvictionReason::DownloadTime);
            }
        }
        if let (Some(kib), Some(speed)) = (self.min_avg_upspeed_kib, m.avg_upspeed) {
            if (speed as f64) < kib * 1024.0 {
                return Some(EvictionReason::AvgUploadSpeed);
            }
        }
        if let (Some(hours), Some(secs)) = (self.inactive_hours, m.inactive_secs) {
            if secs as f64 > hours * 3600.0 {
                return Some(EvictionReason::Inactivity);
            }
        }
        None
    }
}

/// Per-torrent metrics derived from backend counters, refreshed once per
/// reconciliation pass. `None` means the metric does not apply to the
/// torrent's current phase (or the backend reported nothing usable).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TorrentMetrics {
    pub seeding_secs: Option<i64>,
    pub ratio: Option<f64>,
    /// Uploaded bytes.
    pub uploaded: Option<u64>,
    pub download_secs: Option<i64>,
    /// Average upload speed, bytes/s.
    pub avg_upspeed: Option<u64>,
    pub inactive_secs: Option<i64>,
}
