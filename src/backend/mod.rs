//! Download backend collaborator contract and per-family metric derivation.
//!
//! Wire protocols live outside this crate; the engine talks to a backend
//! through [`DownloadBackend`] and interprets raw per-torrent counters
//! through the backend-family tagged [`RawTorrent`].

mod models;
mod trait_def;

pub use models::{Phase, RawTorrent, TorrentSnapshot};
pub use trait_def::{BackendProvider, DownloadBackend, SubmitError, SubmitRequest};
