//! Feed source collaborator contract.
//!
//! Feed transport and XML parsing live outside this crate; the engine only
//! consumes an ordered list of candidates per fetch.

use anyhow::Result;
use chrono::{DateTime, Utc};

/// A feed entry not yet evaluated for admission.
///
/// Ephemeral: lives only within one admission iteration, never persisted.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Unique download locator (enclosure URL). Dedup key.
    pub locator: String,
    pub title: String,
    /// Detail page URL, used by the site-attribute probe.
    pub detail_url: Option<String>,
    /// Declared torrent size in bytes.
    pub size: u64,
    pub published_at: Option<DateTime<Utc>>,
}

/// Trait for feed retrieval backends.
pub trait FeedSource: Send + Sync {
    /// Fetch and parse the feed at `url`, in feed-delivery order.
    ///
    /// Failures surface as an error, never as a partial list.
    fn fetch(&self, url: &str) -> Result<Vec<Candidate>>;
}
