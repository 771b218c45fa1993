//! SQLite-backed ledger implementation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use super::models::{
    BrushTask, EvictionRecord, ManagedTorrent, NewAdmission, TaskCounters, TorrentState,
};
use super::schema::{BASE_DB_VERSION, LEDGER_VERSIONED_SCHEMAS};
use super::trait_def::Ledger;

/// SQLite-backed ledger.
///
/// All writes go through a single mutex-guarded connection, which linearizes
/// counter updates across the admission loops and the reconciliation sweep.
#[derive(Clone)]
pub struct SqliteLedger {
    read_conn: Arc<Mutex<Connection>>,
    write_conn: Arc<Mutex<Connection>>,
}

fn migrate_if_needed(conn: &mut Connection) -> Result<()> {
    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

    let latest_version = LEDGER_VERSIONED_SCHEMAS.len() - 1;
    let latest_schema = &LEDGER_VERSIONED_SCHEMAS[latest_version];

    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if table_count == 0 {
        info!("Creating ledger db schema at version {}", latest_version);
        (latest_schema.create)(conn)?;
        return Ok(());
    }

    let mut current_version = if db_version < BASE_DB_VERSION as i64 {
        0
    } else {
        (db_version - BASE_DB_VERSION as i64) as usize
    };

    if current_version >= latest_version {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for schema in LEDGER_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
        if let Some(migration_fn) = schema.migration {
            info!(
                "Migrating ledger db from version {} to {}",
                current_version, schema.version
            );
            migration_fn(&tx)?;
            current_version = schema.version;
        }
    }
    tx.pragma_update(None, "user_version", BASE_DB_VERSION + current_version)?;
    tx.commit()?;
    Ok(())
}

impl SqliteLedger {
    /// Open (creating if needed) the ledger database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path_ref = db_path.as_ref();

        let mut write_conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open ledger database")?;

        migrate_if_needed(&mut write_conn)?;

        write_conn
            .pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on ledger write connection")?;

        let read_conn = Connection::open_with_flags(
            db_path_ref,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                | rusqlite::OpenFlags::SQLITE_OPEN_URI
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open ledger database for reading")?;

        read_conn
            .pragma_update(None, "journal_mode", "WAL")
            .context("Failed to set WAL mode on ledger read connection")?;

        let (tasks, torrents) = Self::count_rows(&read_conn)?;
        info!("Ledger ready: {} tasks, {} managed torrents", tasks, torrents);

        Ok(Self {
            read_conn: Arc::new(Mutex::new(read_conn)),
            write_conn: Arc::new(Mutex::new(write_conn)),
        })
    }

    fn count_rows(conn: &Connection) -> Result<(usize, usize)> {
        let tasks: usize = conn.query_row("SELECT COUNT(*) FROM brush_task", [], |r| r.get(0))?;
        let torrents: usize =
            conn.query_row("SELECT COUNT(*) FROM managed_torrent", [], |r| r.get(0))?;
        Ok((tasks, torrents))
    }
}

const TASK_COLUMNS: &str = "id, name, enabled, feed_url, cookie, user_agent, use_proxy, \
     backend_id, interval_secs, label, seed_size_gib, notify, \
     admission_rules, eviction_rules, modified_at";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<BrushTask> {
    let admission_json: String = row.get(12)?;
    let eviction_json: String = row.get(13)?;
    let modified_at: String = row.get(14)?;
    Ok(BrushTask {
        id: row.get(0)?,
        name: row.get(1)?,
        enabled: row.get::<_, i64>(2)? != 0,
        feed_url: row.get(3)?,
        cookie: row.get(4)?,
        user_agent: row.get(5)?,
        use_proxy: row.get::<_, i64>(6)? != 0,
        backend_id: row.get(7)?,
        interval_secs: row.get::<_, i64>(8)?.max(0) as u64,
        label: row.get(9)?,
        seed_size_gib: row.get(10)?,
        notify: row.get::<_, i64>(11)? != 0,
        admission: parse_rules_json(&admission_json, "admission"),
        eviction: parse_rules_json(&eviction_json, "eviction"),
        modified_at: parse_timestamp(&modified_at, 14)?,
    })
}

// Malformed stored rules apply no constraint, same as an unparseable rule
// string.
fn parse_rules_json<T: Default + serde::de::DeserializeOwned>(json: &str, which: &str) -> T {
    serde_json::from_str(json).unwrap_or_else(|e| {
        warn!("Malformed {} rule set in ledger db: {}: {}", which, json, e);
        T::default()
    })
}

fn parse_timestamp(raw: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

fn row_to_torrent(row: &rusqlite::Row<'_>) -> rusqlite::Result<ManagedTorrent> {
    let admitted_at: String = row.get(5)?;
    let state: String = row.get(6)?;
    Ok(ManagedTorrent {
        task_id: row.get(0)?,
        backend_id: row.get(1)?,
        title: row.get(2)?,
        locator: row.get(3)?,
        size: row.get::<_, i64>(4)?.max(0) as u64,
        admitted_at: parse_timestamp(&admitted_at, 5)?,
        state: TorrentState::parse(&state).unwrap_or(TorrentState::Active),
        final_uploaded: row.get::<_, Option<i64>>(7)?.map(|v| v.max(0) as u64),
        final_downloaded: row.get::<_, Option<i64>>(8)?.map(|v| v.max(0) as u64),
    })
}

impl Ledger for SqliteLedger {
    fn upsert_task(&self, task: &BrushTask) -> Result<()> {
        let admission = serde_json::to_string(&task.admission)?;
        let eviction = serde_json::to_string(&task.eviction)?;
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "INSERT INTO brush_task (
                id, name, enabled, feed_url, cookie, user_agent, use_proxy,
                backend_id, interval_secs, label, seed_size_gib, notify,
                admission_rules, eviction_rules, modified_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                enabled = excluded.enabled,
                feed_url = excluded.feed_url,
                cookie = excluded.cookie,
                user_agent = excluded.user_agent,
                use_proxy = excluded.use_proxy,
                backend_id = excluded.backend_id,
                interval_secs = excluded.interval_secs,
                label = excluded.label,
                seed_size_gib = excluded.seed_size_gib,
                notify = excluded.notify,
                admission_rules = excluded.admission_rules,
                eviction_rules = excluded.eviction_rules,
                modified_at = excluded.modified_at",
            params![
                task.id,
                task.name,
                task.enabled as i64,
                task.feed_url,
                task.cookie,
                task.user_agent,
                task.use_proxy as i64,
                task.backend_id,
                task.interval_secs as i64,
                task.label,
                task.seed_size_gib,
                task.notify as i64,
                admission,
                eviction,
                task.modified_at.to_rfc3339(),
            ],
        )
        .context("Failed to upsert task")?;
        Ok(())
    }

    fn delete_task(&self, task_id: i64) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute("DELETE FROM managed_torrent WHERE task_id = ?1", [task_id])?;
        conn.execute("DELETE FROM brush_task WHERE id = ?1", [task_id])?;
        Ok(())
    }

    fn load_tasks(&self) -> Result<Vec<BrushTask>> {
        let conn = self.read_conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM brush_task ORDER BY id"))?;
        let tasks = stmt
            .query_map([], row_to_task)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to load tasks")?;
        Ok(tasks)
    }

    fn get_task(&self, task_id: i64) -> Result<Option<BrushTask>> {
        let conn = self.read_conn.lock().unwrap();
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM brush_task WHERE id = ?1"),
                [task_id],
                row_to_task,
            )
            .optional()
            .context("Failed to read task")?;
        Ok(task)
    }

    fn record_admission(&self, task_id: i64, admission: &NewAdmission) -> Result<bool> {
        let conn = self.write_conn.lock().unwrap();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO managed_torrent
                    (task_id, backend_id, title, locator, size, admitted_at, state)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    task_id,
                    admission.backend_id,
                    admission.title,
                    admission.locator,
                    admission.size as i64,
                    Utc::now().to_rfc3339(),
                    TorrentState::Active.as_str(),
                ],
            )
            .context("Failed to record admission")?;
        Ok(inserted > 0)
    }

    fn active_torrents(&self, task_id: i64) -> Result<Vec<ManagedTorrent>> {
        let conn = self.read_conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT task_id, backend_id, title, locator, size, admitted_at, state,
                    final_uploaded, final_downloaded
             FROM managed_torrent
             WHERE task_id = ?1 AND state = 'ACTIVE'
             ORDER BY admitted_at",
        )?;
        let torrents = stmt
            .query_map([task_id], row_to_torrent)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to list active torrents")?;
        Ok(torrents)
    }

    fn active_total_size(&self, task_id: i64) -> Result<u64> {
        let conn = self.read_conn.lock().unwrap();
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM managed_torrent
             WHERE task_id = ?1 AND state = 'ACTIVE'",
            [task_id],
            |r| r.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    fn apply_evictions(&self, task_id: i64, evictions: &[EvictionRecord]) -> Result<()> {
        if evictions.is_empty() {
            return Ok(());
        }
        let mut conn = self.write_conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE managed_torrent
                 SET state = 'EVICTED', final_uploaded = ?3, final_downloaded = ?4
                 WHERE task_id = ?1 AND backend_id = ?2 AND state = 'ACTIVE'",
            )?;
            for eviction in evictions {
                stmt.execute(params![
                    task_id,
                    eviction.backend_id,
                    eviction.uploaded as i64,
                    eviction.downloaded as i64,
                ])?;
            }
        }
        tx.commit().context("Failed to apply evictions")?;
        Ok(())
    }

    fn purge_orphans(&self, task_id: i64, backend_ids: &[String]) -> Result<usize> {
        if backend_ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.write_conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut purged = 0;
        {
            let mut stmt = tx.prepare(
                "DELETE FROM managed_torrent
                 WHERE task_id = ?1 AND backend_id = ?2 AND state = 'ACTIVE'",
            )?;
            for backend_id in backend_ids {
                purged += stmt.execute(params![task_id, backend_id])?;
            }
        }
        tx.commit().context("Failed to purge orphans")?;
        Ok(purged)
    }

    fn bump_admitted(&self, task_id: i64) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "UPDATE brush_task SET admitted_count = admitted_count + 1 WHERE id = ?1",
            [task_id],
        )
        .context("Failed to bump admitted counter")?;
        Ok(())
    }

    fn accumulate_counters(
        &self,
        task_id: i64,
        uploaded: u64,
        downloaded: u64,
        evicted: u64,
    ) -> Result<()> {
        let conn = self.write_conn.lock().unwrap();
        conn.execute(
            "UPDATE brush_task SET
                uploaded_bytes = uploaded_bytes + ?2,
                downloaded_bytes = downloaded_bytes + ?3,
                evicted_count = evicted_count + ?4
             WHERE id = ?1",
            params![task_id, uploaded as i64, downloaded as i64, evicted as i64],
        )
        .context("Failed to accumulate counters")?;
        Ok(())
    }

    fn counters(&self, task_id: i64) -> Result<TaskCounters> {
        let conn = self.read_conn.lock().unwrap();
        let counters = conn
            .query_row(
                "SELECT admitted_count, evicted_count, uploaded_bytes, downloaded_bytes
                 FROM brush_task WHERE id = ?1",
                [task_id],
                |row| {
                    Ok(TaskCounters {
                        admitted: row.get::<_, i64>(0)?.max(0) as u64,
                        evicted: row.get::<_, i64>(1)?.max(0) as u64,
                        uploaded_bytes: row.get::<_, i64>(2)?.max(0) as u64,
                        downloaded_bytes: row.get::<_, i64>(3)?.max(0) as u64,
                    })
                },
            )
            .optional()?
            .unwrap_or_default();
        Ok(counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{AdmissionRuleSpec, EvictionReason, EvictionRuleSpec};
    use tempfile::tempdir;

    fn test_ledger() -> (tempfile::TempDir, SqliteLedger) {
        let dir = tempdir().unwrap();
        let ledger = SqliteLedger::new(dir.path().join("ledger.db")).unwrap();
        (dir, ledger)
    }

    fn task(id: i64) -> BrushTask {
        BrushTask {
            id,
            name: format!("task-{id}"),
            enabled: true,
            feed_url: "https://tracker.example/rss".to_string(),
            cookie: Some("uid=1".to_string()),
            user_agent: None,
            use_proxy: false,
            backend_id: 1,
            interval_secs: 600,
            label: Some("brush".to_string()),
            seed_size_gib: Some(10.0),
            notify: false,
            admission: AdmissionRuleSpec {
                size: Some("bw#1,5".to_string()),
                ..Default::default()
            },
            eviction: EvictionRuleSpec {
                ratio: Some("gt#2.0".to_string()),
                ..Default::default()
            },
            modified_at: Utc::now(),
        }
    }

    fn admission(id: &str, size: u64) -> NewAdmission {
        NewAdmission {
            backend_id: id.to_string(),
            title: format!("torrent-{id}"),
            locator: format!("https://tracker.example/dl/{id}"),
            size,
        }
    }

    #[test]
    fn test_task_roundtrip() {
        let (_dir, ledger) = test_ledger();
        let t = task(1);
        ledger.upsert_task(&t).unwrap();
        let loaded = ledger.get_task(1).unwrap().unwrap();
        assert_eq!(loaded.name, t.name);
        assert_eq!(loaded.admission, t.admission);
        assert_eq!(loaded.eviction, t.eviction);
        assert_eq!(loaded.seed_size_gib, Some(10.0));
        assert!(ledger.get_task(99).unwrap().is_none());
    }

    #[test]
    fn test_upsert_preserves_counters() {
        let (_dir, ledger) = test_ledger();
        ledger.upsert_task(&task(1)).unwrap();
        ledger.bump_admitted(1).unwrap();
        ledger.accumulate_counters(1, 100, 50, 2).unwrap();

        let mut edited = task(1);
        edited.name = "renamed".to_string();
        ledger.upsert_task(&edited).unwrap();

        let counters = ledger.counters(1).unwrap();
        assert_eq!(counters.admitted, 1);
        assert_eq!(counters.evicted, 2);
        assert_eq!(counters.uploaded_bytes, 100);
        assert_eq!(counters.downloaded_bytes, 50);
        assert_eq!(ledger.get_task(1).unwrap().unwrap().name, "renamed");
    }

    #[test]
    fn test_record_admission_is_idempotent_per_locator() {
        let (_dir, ledger) = test_ledger();
        ledger.upsert_task(&task(1)).unwrap();
        assert!(ledger.record_admission(1, &admission("aa", 100)).unwrap());
        assert!(!ledger.record_admission(1, &admission("aa", 100)).unwrap());
        assert_eq!(ledger.active_torrents(1).unwrap().len(), 1);
    }

    #[test]
    fn test_active_total_size() {
        let (_dir, ledger) = test_ledger();
        ledger.upsert_task(&task(1)).unwrap();
        ledger.record_admission(1, &admission("aa", 100)).unwrap();
        ledger.record_admission(1, &admission("bb", 250)).unwrap();
        assert_eq!(ledger.active_total_size(1).unwrap(), 350);
    }

    #[test]
    fn test_eviction_transitions_once() {
        let (_dir, ledger) = test_ledger();
        ledger.upsert_task(&task(1)).unwrap();
        ledger.record_admission(1, &admission("aa", 100)).unwrap();

        let record = EvictionRecord {
            backend_id: "aa".to_string(),
            uploaded: 500,
            downloaded: 100,
            reason: EvictionReason::Ratio,
        };
        ledger.apply_evictions(1, std::slice::from_ref(&record)).unwrap();
        assert!(ledger.active_torrents(1).unwrap().is_empty());
        assert_eq!(ledger.active_total_size(1).unwrap(), 0);

        // Re-applying must not resurrect or double-apply anything.
        ledger.apply_evictions(1, &[record]).unwrap();
        assert!(ledger.active_torrents(1).unwrap().is_empty());
    }

    #[test]
    fn test_purge_orphans_only_touches_named_ids() {
        let (_dir, ledger) = test_ledger();
        ledger.upsert_task(&task(1)).unwrap();
        ledger.record_admission(1, &admission("aa", 100)).unwrap();
        ledger.record_admission(1, &admission("bb", 100)).unwrap();

        let purged = ledger.purge_orphans(1, &["aa".to_string()]).unwrap();
        assert_eq!(purged, 1);
        let remaining = ledger.active_torrents(1).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].backend_id, "bb");

        // Second purge of the same id is a no-op.
        assert_eq!(ledger.purge_orphans(1, &["aa".to_string()]).unwrap(), 0);
    }

    #[test]
    fn test_delete_task_removes_torrents() {
        let (_dir, ledger) = test_ledger();
        ledger.upsert_task(&task(1)).unwrap();
        ledger.record_admission(1, &admission("aa", 100)).unwrap();
        ledger.delete_task(1).unwrap();
        assert!(ledger.get_task(1).unwrap().is_none());
        assert!(ledger.active_torrents(1).unwrap().is_empty());
    }

    #[test]
    fn test_counters_for_unknown_task_are_zero() {
        let (_dir, ledger) = test_ledger();
        assert_eq!(ledger.counters(42).unwrap(), TaskCounters::default());
    }

    #[test]
    fn test_reopen_preserves_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = SqliteLedger::new(&path).unwrap();
            ledger.upsert_task(&task(1)).unwrap();
            ledger.record_admission(1, &admission("aa", 100)).unwrap();
        }
        let reopened = SqliteLedger::new(&path).unwrap();
        assert_eq!(reopened.load_tasks().unwrap().len(), 1);
        assert_eq!(reopened.active_torrents(1).unwrap().len(), 1);
    }
}
