//! Sync run bookkeeping and the incremental watermark.

use bt_core::model::SyncRunRecord;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{parse_opt_ts, ts};
use crate::error::DbResult;

pub fn insert(conn: &Connection, run: &SyncRunRecord) -> DbResult<()> {
    conn.execute(
        "INSERT INTO sync_runs (id, mode, dry_run, started_at, finished_at, watermark,
                               items_synced, events_synced, failures, cancelled)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            run.id,
            run.mode,
            run.dry_run,
            ts(&run.started_at),
            ts(&run.finished_at),
            ts(&run.watermark),
            run.items_synced as i64,
            run.events_synced as i64,
            run.failures as i64,
            run.cancelled,
        ],
    )?;
    Ok(())
}

/// Watermark of the latest clean run.
pub fn last_watermark(conn: &Connection) -> DbResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn.query_row(
        "SELECT MAX(watermark) FROM sync_runs
         WHERE dry_run = 0 AND cancelled = 0 AND failures = 0
           AND mode IN ('full', 'incremental')",
        [],
        |row| row.get(0),
    )?;
    parse_opt_ts(raw)
}
