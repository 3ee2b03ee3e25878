//! Audit log.

use bt_core::model::{AuditOutcome, AuditRecord, StoreKind};
use bt_core::OperationKind;
use rusqlite::{params, Connection, Row};

use super::{limit, parse_ts, ts};
use crate::error::{DbError, DbResult};

pub fn append(conn: &Connection, record: &AuditRecord) -> DbResult<()> {
    let stores: Vec<&str> = record.stores_touched.iter().map(StoreKind::as_str).collect();
    conn.execute(
        "INSERT INTO audit_log (id, operation, target_id, stores, primary_latency_ms,
                                graph_latency_ms, degraded, outcome, detail, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.id,
            record.operation.as_str(),
            record.target,
            serde_json::to_string(&stores)?,
            record.primary_latency_ms.map(|ms| ms as i64),
            record.graph_latency_ms.map(|ms| ms as i64),
            record.degraded,
            record.outcome.as_str(),
            record.detail,
            ts(&record.recorded_at),
        ],
    )?;
    Ok(())
}

type RawAudit = (
    String,
    String,
    String,
    String,
    Option<i64>,
    Option<i64>,
    bool,
    String,
    Option<String>,
    String,
);

fn raw(row: &Row<'_>) -> rusqlite::Result<RawAudit> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn into_record(raw: RawAudit) -> DbResult<AuditRecord> {
    let (id, operation, target, stores, primary_ms, graph_ms, degraded, outcome, detail, recorded_at) =
        raw;
    let stores: Vec<String> = serde_json::from_str(&stores)?;
    let stores_touched = stores
        .iter()
        .map(|s| StoreKind::parse(s).ok_or_else(|| DbError::Corrupt(format!("audit store '{}'", s))))
        .collect::<DbResult<Vec<_>>>()?;
    Ok(AuditRecord {
        operation: OperationKind::parse(&operation)
            .ok_or_else(|| DbError::Corrupt(format!("audit operation '{}'", operation)))?,
        outcome: AuditOutcome::parse(&outcome)
            .ok_or_else(|| DbError::Corrupt(format!("audit outcome '{}'", outcome)))?,
        id,
        target,
        stores_touched,
        primary_latency_ms: primary_ms.map(|ms| ms as u64),
        graph_latency_ms: graph_ms.map(|ms| ms as u64),
        degraded,
        detail,
        recorded_at: parse_ts(&recorded_at)?,
    })
}

/// Newest first.
pub fn recent(conn: &Connection, max: usize) -> DbResult<Vec<AuditRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, operation, target_id, stores, primary_latency_ms, graph_latency_ms,
                degraded, outcome, detail, recorded_at
         FROM audit_log
         ORDER BY recorded_at DESC, rowid DESC
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit(max)], raw)?;
    rows.map(|row| row.map_err(DbError::from).and_then(into_record))
        .collect()
}
