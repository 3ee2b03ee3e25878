//! Item queries.

use bt_core::model::{Item, ItemStatus};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{limit, parse_opt_ts, parse_ts, ts};
use crate::error::{DbError, DbResult};

const ITEM_COLUMNS: &str = "tag, status, current_location, routing, off_route, risk_score, \
     risk_updated_at, owner_ref, created_at, updated_at, last_seen_at";

/// Raw `items` row.
#[derive(Debug, Clone)]
pub struct ItemRow {
    pub tag: String,
    pub status: String,
    pub current_location: String,
    pub routing: String,
    pub off_route: bool,
    pub risk_score: f64,
    pub risk_updated_at: Option<String>,
    pub owner_ref: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_seen_at: String,
}

impl ItemRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            tag: row.get(0)?,
            status: row.get(1)?,
            current_location: row.get(2)?,
            routing: row.get(3)?,
            off_route: row.get(4)?,
            risk_score: row.get(5)?,
            risk_updated_at: row.get(6)?,
            owner_ref: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            last_seen_at: row.get(10)?,
        })
    }

    /// Convert into the domain model.
    pub fn into_item(self) -> DbResult<Item> {
        let status = ItemStatus::parse(&self.status)
            .ok_or_else(|| DbError::Corrupt(format!("item {} status '{}'", self.tag, self.status)))?;
        Ok(Item {
            status,
            routing: serde_json::from_str(&self.routing)?,
            off_route: self.off_route,
            risk_score: self.risk_score,
            risk_updated_at: parse_opt_ts(self.risk_updated_at)?,
            owner_ref: self.owner_ref,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            last_seen_at: parse_ts(&self.last_seen_at)?,
            current_location: self.current_location,
            tag: self.tag,
        })
    }
}

fn collect(rows: impl Iterator<Item = rusqlite::Result<ItemRow>>) -> DbResult<Vec<Item>> {
    rows.map(|row| row.map_err(DbError::from).and_then(ItemRow::into_item))
        .collect()
}

/// Insert or overwrite an item.
pub fn upsert_item(conn: &Connection, item: &Item) -> DbResult<()> {
    conn.execute(
        "INSERT INTO items (tag, status, current_location, routing, off_route, risk_score,
                            risk_updated_at, owner_ref, created_at, updated_at, last_seen_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(tag) DO UPDATE SET
             status = excluded.status,
             current_location = excluded.current_location,
             routing = excluded.routing,
             off_route = excluded.off_route,
             risk_score = excluded.risk_score,
             risk_updated_at = excluded.risk_updated_at,
             owner_ref = excluded.owner_ref,
             updated_at = excluded.updated_at,
             last_seen_at = excluded.last_seen_at",
        params![
            item.tag,
            item.status.as_str(),
            item.current_location,
            serde_json::to_string(&item.routing)?,
            item.off_route,
            item.risk_score,
            item.risk_updated_at.as_ref().map(ts),
            item.owner_ref,
            ts(&item.created_at),
            ts(&item.updated_at),
            ts(&item.last_seen_at),
        ],
    )?;
    Ok(())
}

pub fn get_item(conn: &Connection, tag: &str) -> DbResult<Option<Item>> {
    let sql = format!("SELECT {} FROM items WHERE tag = ?1", ITEM_COLUMNS);
    let row = conn
        .query_row(&sql, params![tag], ItemRow::from_row)
        .optional()?;
    row.map(ItemRow::into_item).transpose()
}

/// Cursor-paged listing ordered by tag.
pub fn list_items(
    conn: &Connection,
    after: Option<&str>,
    since: Option<DateTime<Utc>>,
    max: usize,
) -> DbResult<Vec<Item>> {
    let sql = format!(
        "SELECT {} FROM items
         WHERE (?1 IS NULL OR tag > ?1) AND (?2 IS NULL OR updated_at >= ?2)
         ORDER BY tag
         LIMIT ?3",
        ITEM_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![after, since.as_ref().map(ts), limit(max)],
        ItemRow::from_row,
    )?;
    collect(rows)
}

pub fn recent_items(conn: &Connection, max: usize) -> DbResult<Vec<Item>> {
    let sql = format!(
        "SELECT {} FROM items ORDER BY updated_at DESC, tag LIMIT ?1",
        ITEM_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit(max)], ItemRow::from_row)?;
    collect(rows)
}

pub fn count_items(conn: &Connection) -> DbResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))?;
    Ok(count as u64)
}
