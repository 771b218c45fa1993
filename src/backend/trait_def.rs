//! DownloadBackend trait definition.

use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;

use super::models::RawTorrent;

/// A torrent download request handed to the backend.
#[derive(Debug, Clone)]
pub struct SubmitRequest<'a> {
    pub title: &'a str,
    /// Download locator (enclosure URL).
    pub locator: &'a str,
    /// Declared size in bytes.
    pub size: u64,
    /// Tags/labels to attach in the backend.
    pub tags: &'a [String],
    /// Download speed limit, KiB/s.
    pub download_limit: Option<u64>,
    /// Upload speed limit, KiB/s.
    pub upload_limit: Option<u64>,
}

/// Why a download submission failed.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The backend processed the request and refused it.
    #[error("backend rejected the torrent: {0}")]
    Rejected(String),
    /// The backend could not be reached.
    #[error("backend unreachable: {0}")]
    Unreachable(String),
}

/// Trait for download client backends.
///
/// Query failures must surface as errors, never as empty lists: the
/// reconciliation sweep treats an error as "state unknown" and mutates
/// nothing, while an empty list means "these torrents are gone."
pub trait DownloadBackend: Send + Sync {
    /// Submit a torrent for download. Returns the backend-assigned id.
    fn submit(&self, request: &SubmitRequest<'_>) -> Result<String, SubmitError>;

    /// The subset of `ids` that is present and completed, with raw counters.
    fn completed_torrents(&self, ids: &[String]) -> Result<Vec<RawTorrent>>;

    /// Torrents currently downloading. `None` queries the whole backend
    /// (used for the concurrency quota), `Some(ids)` restricts to a subset.
    fn downloading_torrents(&self, ids: Option<&[String]>) -> Result<Vec<RawTorrent>>;

    /// Batch-delete torrents, optionally with their downloaded data.
    fn delete_torrents(&self, ids: &[String], delete_data: bool) -> Result<()>;
}

/// Resolves a task's backend reference to a live backend.
pub trait BackendProvider: Send + Sync {
    fn backend(&self, backend_id: i64) -> Option<Arc<dyn DownloadBackend>>;
}
