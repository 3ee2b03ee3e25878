//! Idempotency ledger.

use bt_core::OperationKind;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::ts;
use crate::error::DbResult;

/// Canonical payload recorded for a key, if the operation was applied before.
pub fn find_applied(conn: &Connection, kind: OperationKind, key: &str) -> DbResult<Option<String>> {
    let payload = conn
        .query_row(
            "SELECT payload FROM applied_operations WHERE op_kind = ?1 AND op_key = ?2",
            params![kind.as_str(), key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(payload)
}

pub fn mark_applied(
    conn: &Connection,
    kind: OperationKind,
    key: &str,
    payload: &str,
    at: DateTime<Utc>,
) -> DbResult<()> {
    conn.execute(
        "INSERT INTO applied_operations (op_kind, op_key, payload, applied_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![kind.as_str(), key, payload, ts(&at)],
    )?;
    Ok(())
}
