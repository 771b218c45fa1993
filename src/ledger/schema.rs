//! Versioned schema definitions for the ledger database.

use anyhow::Result;
use rusqlite::{Connection, Transaction};

/// Offset added to the schema index when stored in `PRAGMA user_version`,
/// so a ledger db is distinguishable from an unrelated SQLite file.
pub const BASE_DB_VERSION: usize = 4000;

pub struct VersionedSchema {
    pub version: usize,
    /// Create this schema version from scratch.
    pub create: fn(&Connection) -> Result<()>,
    /// Migrate from the previous version, if this is not the baseline.
    pub migration: Option<fn(&Transaction<'_>) -> Result<()>>,
}

pub const LEDGER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    create: create_v0,
    migration: None,
}];

fn create_v0(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE brush_task (
            id               INTEGER PRIMARY KEY,
            name             TEXT NOT NULL,
            enabled          INTEGER NOT NULL DEFAULT 0,
            feed_url         TEXT NOT NULL,
            cookie           TEXT,
            user_agent       TEXT,
            use_proxy        INTEGER NOT NULL DEFAULT 0,
            backend_id       INTEGER NOT NULL,
            interval_secs    INTEGER NOT NULL,
            label            TEXT,
            seed_size_gib    REAL,
            notify           INTEGER NOT NULL DEFAULT 0,
            admission_rules  TEXT NOT NULL,
            eviction_rules   TEXT NOT NULL,
            admitted_count   INTEGER NOT NULL DEFAULT 0,
            evicted_count    INTEGER NOT NULL DEFAULT 0,
            uploaded_bytes   INTEGER NOT NULL DEFAULT 0,
            downloaded_bytes INTEGER NOT NULL DEFAULT 0,
            modified_at      TEXT NOT NULL
        );

        CREATE TABLE managed_torrent (
            task_id          INTEGER NOT NULL REFERENCES brush_task(id),
            backend_id       TEXT NOT NULL,
            title            TEXT NOT NULL,
            locator          TEXT NOT NULL,
            size             INTEGER NOT NULL,
            admitted_at      TEXT NOT NULL,
            state            TEXT NOT NULL DEFAULT 'ACTIVE',
            final_uploaded   INTEGER,
            final_downloaded INTEGER,
            PRIMARY KEY (task_id, locator)
        );

        CREATE INDEX idx_managed_torrent_task_state
            ON managed_torrent(task_id, state);
        CREATE INDEX idx_managed_torrent_backend_id
            ON managed_torrent(task_id, backend_id);
        ",
    )?;
    conn.pragma_update(None, "user_version", BASE_DB_VERSION)?;
    Ok(())
}
