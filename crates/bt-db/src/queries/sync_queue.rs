//! Sync queue persistence.

use bt_core::model::{NewSyncEntry, QueueHealth, SyncQueueEntry, SyncQueueStatus, SyncTarget};
use bt_core::OperationKind;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::{limit, parse_opt_ts, parse_ts, ts};
use crate::error::{DbError, DbResult};

const QUEUE_COLUMNS: &str = "id, operation, target_kind, target_id, item_tag, payload, \
     failure_reason, attempts, status, enqueued_at, updated_at";

/// Raw `sync_queue` row.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: i64,
    pub operation: String,
    pub target_kind: String,
    pub target_id: String,
    pub item_tag: String,
    pub payload: String,
    pub failure_reason: String,
    pub attempts: u32,
    pub status: String,
    pub enqueued_at: String,
    pub updated_at: String,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            operation: row.get(1)?,
            target_kind: row.get(2)?,
            target_id: row.get(3)?,
            item_tag: row.get(4)?,
            payload: row.get(5)?,
            failure_reason: row.get(6)?,
            attempts: row.get(7)?,
            status: row.get(8)?,
            enqueued_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    /// Convert into the domain model.
    pub fn into_entry(self) -> DbResult<SyncQueueEntry> {
        let operation = OperationKind::parse(&self.operation).ok_or_else(|| {
            DbError::Corrupt(format!("queue entry {} operation '{}'", self.id, self.operation))
        })?;
        let status = SyncQueueStatus::parse(&self.status).ok_or_else(|| {
            DbError::Corrupt(format!("queue entry {} status '{}'", self.id, self.status))
        })?;
        let target = match self.target_kind.as_str() {
            "item" => SyncTarget::Item { tag: self.item_tag },
            "event" => SyncTarget::Event {
                event_id: self.target_id,
                tag: self.item_tag,
            },
            other => {
                return Err(DbError::Corrupt(format!(
                    "queue entry {} target kind '{}'",
                    self.id, other
                )))
            }
        };
        Ok(SyncQueueEntry {
            id: self.id,
            operation,
            target,
            payload: serde_json::from_str(&self.payload)?,
            failure_reason: self.failure_reason,
            attempts: self.attempts,
            status,
            enqueued_at: parse_ts(&self.enqueued_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

fn collect(rows: impl Iterator<Item = rusqlite::Result<QueueRow>>) -> DbResult<Vec<SyncQueueEntry>> {
    rows.map(|row| row.map_err(DbError::from).and_then(QueueRow::into_entry))
        .collect()
}

pub fn enqueue(conn: &Connection, entry: &NewSyncEntry, now: DateTime<Utc>) -> DbResult<i64> {
    conn.execute(
        "INSERT INTO sync_queue (operation, target_kind, target_id, item_tag, payload,
                                 failure_reason, attempts, status, enqueued_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?8)",
        params![
            entry.operation.as_str(),
            entry.target.kind(),
            entry.target.id(),
            entry.target.tag(),
            serde_json::to_string(&entry.payload)?,
            entry.failure_reason,
            entry.attempts,
            ts(&now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn due_entries(conn: &Connection, after_id: Option<i64>, max: usize) -> DbResult<Vec<SyncQueueEntry>> {
    let sql = format!(
        "SELECT {} FROM sync_queue
         WHERE status IN ('pending', 'retrying') AND (?1 IS NULL OR id > ?1)
         ORDER BY id
         LIMIT ?2",
        QUEUE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![after_id, limit(max)], QueueRow::from_row)?;
    collect(rows)
}

pub fn mark(
    conn: &Connection,
    id: i64,
    status: SyncQueueStatus,
    attempts: u32,
    failure_reason: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<()> {
    let changed = conn.execute(
        "UPDATE sync_queue
         SET status = ?2, attempts = ?3,
             failure_reason = COALESCE(?4, failure_reason),
             updated_at = ?5
         WHERE id = ?1",
        params![id, status.as_str(), attempts, failure_reason, ts(&now)],
    )?;
    if changed == 0 {
        return Err(DbError::not_found("sync queue entry", id.to_string()));
    }
    Ok(())
}

pub fn resolve_through(conn: &Connection, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> DbResult<u64> {
    let changed = conn.execute(
        "UPDATE sync_queue SET status = 'resolved', updated_at = ?2
         WHERE status IN ('pending', 'retrying') AND enqueued_at <= ?1",
        params![ts(&cutoff), ts(&now)],
    )?;
    Ok(changed as u64)
}

pub fn list(conn: &Connection, status: Option<SyncQueueStatus>, max: usize) -> DbResult<Vec<SyncQueueEntry>> {
    let sql = format!(
        "SELECT {} FROM sync_queue WHERE (?1 IS NULL OR status = ?1) ORDER BY id DESC LIMIT ?2",
        QUEUE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![status.map(|s| s.as_str()), limit(max)],
        QueueRow::from_row,
    )?;
    collect(rows)
}

pub fn health(conn: &Connection, now: DateTime<Utc>) -> DbResult<QueueHealth> {
    let mut health = QueueHealth::default();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, count) = row?;
        let count = count as u64;
        match SyncQueueStatus::parse(&status) {
            Some(SyncQueueStatus::Pending) => health.pending = count,
            Some(SyncQueueStatus::Retrying) => health.retrying = count,
            Some(SyncQueueStatus::Resolved) => health.resolved = count,
            Some(SyncQueueStatus::Abandoned) => health.abandoned = count,
            None => return Err(DbError::Corrupt(format!("queue status '{}'", status))),
        }
    }

    let oldest: Option<String> = conn.query_row(
        "SELECT MIN(enqueued_at) FROM sync_queue WHERE status IN ('pending', 'retrying')",
        [],
        |row| row.get(0),
    )?;
    health.oldest_pending_at = parse_opt_ts(oldest)?;
    health.oldest_pending_age_seconds = health
        .oldest_pending_at
        .map(|at| (now - at).num_seconds().max(0));
    Ok(health)
}
