//! Site-attribute probe collaborator contract.
//!
//! Promotion tier, hit-and-run status and peer counts are scraped from the
//! torrent's detail page by an external collaborator; this crate only
//! consumes the result.

use anyhow::Result;

/// Attributes scraped from a torrent's detail page.
#[derive(Debug, Clone, Default)]
pub struct TorrentAttributes {
    /// Free-leech: downloading does not count against the site ratio.
    pub free: bool,
    /// Double-free promotion tier.
    pub double_free: bool,
    /// Hit-and-run: the site penalizes early removal.
    pub hit_and_run: bool,
    pub peer_count: i64,
}

/// Request parameters for a detail-page probe.
#[derive(Debug, Clone, Default)]
pub struct ProbeRequest<'a> {
    pub detail_url: &'a str,
    pub cookie: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub use_proxy: bool,
}

/// Trait for detail-page attribute lookup. May fail or time out; callers
/// treat a failure as "attributes unknown", never as a rejection.
pub trait AttributeProbe: Send + Sync {
    fn probe(&self, request: &ProbeRequest<'_>) -> Result<TorrentAttributes>;
}
