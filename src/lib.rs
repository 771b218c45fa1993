//! Automated admission-and-eviction engine for a bounded pool of
//! downloadable torrents.
//!
//! Feeds are polled on per-task timers, candidates filtered through typed
//! admission rules and quota checks, then handed to a download backend. A
//! global reconciliation sweep evaluates eviction rules against live backend
//! metrics, purges orphans and keeps cumulative traffic counters. All state
//! is persisted in a SQLite ledger; the feed, probe, backend and notifier
//! collaborators are trait objects supplied by the embedding application.

pub mod backend;
pub mod config;
pub mod engine;
pub mod feed;
pub mod ledger;
pub mod notify;
pub mod probe;
pub mod rules;
