//! Per-task persistent ledger: task configuration, managed torrents and
//! cumulative counters. Single source of truth for quota and reconciliation.

mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{
    BrushTask, EvictionRecord, ManagedTorrent, NewAdmission, TaskCounters, TorrentState,
};
pub use store::SqliteLedger;
pub use trait_def::Ledger;
