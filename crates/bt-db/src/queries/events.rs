//! Event queries.

use bt_core::model::{Event, EventType};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{limit, parse_opt_ts, parse_ts, ts};
use crate::error::{DbError, DbResult};

const EVENT_COLUMNS: &str =
    "event_id, tag, event_type, location, occurred_at, payload, out_of_order, recorded_at";

/// Raw `events` row.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub event_id: String,
    pub tag: String,
    pub event_type: String,
    pub location: String,
    pub occurred_at: String,
    pub payload: String,
    pub out_of_order: bool,
    pub recorded_at: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            event_id: row.get(0)?,
            tag: row.get(1)?,
            event_type: row.get(2)?,
            location: row.get(3)?,
            occurred_at: row.get(4)?,
            payload: row.get(5)?,
            out_of_order: row.get(6)?,
            recorded_at: row.get(7)?,
        })
    }

    /// Convert into the domain model.
    pub fn into_event(self) -> DbResult<Event> {
        let event_type = EventType::parse(&self.event_type).ok_or_else(|| {
            DbError::Corrupt(format!("event {} type '{}'", self.event_id, self.event_type))
        })?;
        Ok(Event {
            event_type,
            timestamp: parse_ts(&self.occurred_at)?,
            payload: serde_json::from_str(&self.payload)?,
            out_of_order: self.out_of_order,
            recorded_at: parse_ts(&self.recorded_at)?,
            event_id: self.event_id,
            tag: self.tag,
            location: self.location,
        })
    }
}

fn collect(rows: impl Iterator<Item = rusqlite::Result<EventRow>>) -> DbResult<Vec<Event>> {
    rows.map(|row| row.map_err(DbError::from).and_then(EventRow::into_event))
        .collect()
}

pub fn insert_event(conn: &Connection, event: &Event) -> DbResult<()> {
    conn.execute(
        "INSERT INTO events (event_id, tag, event_type, location, occurred_at, payload,
                             out_of_order, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            event.event_id,
            event.tag,
            event.event_type.as_str(),
            event.location,
            ts(&event.timestamp),
            serde_json::to_string(&event.payload)?,
            event.out_of_order,
            ts(&event.recorded_at),
        ],
    )?;
    Ok(())
}

pub fn get_event(conn: &Connection, event_id: &str) -> DbResult<Option<Event>> {
    let sql = format!("SELECT {} FROM events WHERE event_id = ?1", EVENT_COLUMNS);
    let row = conn
        .query_row(&sql, params![event_id], EventRow::from_row)
        .optional()?;
    row.map(EventRow::into_event).transpose()
}

/// Journey order: timestamp, then event id.
pub fn events_for_item(conn: &Connection, tag: &str) -> DbResult<Vec<Event>> {
    let sql = format!(
        "SELECT {} FROM events WHERE tag = ?1 ORDER BY occurred_at, event_id",
        EVENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![tag], EventRow::from_row)?;
    collect(rows)
}

/// Latest event timestamp recorded for an item.
pub fn latest_event_at(conn: &Connection, tag: &str) -> DbResult<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn.query_row(
        "SELECT MAX(occurred_at) FROM events WHERE tag = ?1",
        params![tag],
        |row| row.get(0),
    )?;
    parse_opt_ts(raw)
}

/// Cursor-paged listing ordered by event id.
pub fn list_events(
    conn: &Connection,
    after: Option<&str>,
    since: Option<DateTime<Utc>>,
    max: usize,
) -> DbResult<Vec<Event>> {
    let sql = format!(
        "SELECT {} FROM events
         WHERE (?1 IS NULL OR event_id > ?1) AND (?2 IS NULL OR recorded_at >= ?2)
         ORDER BY event_id
         LIMIT ?3",
        EVENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![after, since.as_ref().map(ts), limit(max)],
        EventRow::from_row,
    )?;
    collect(rows)
}

pub fn recent_events(conn: &Connection, max: usize) -> DbResult<Vec<Event>> {
    let sql = format!(
        "SELECT {} FROM events ORDER BY recorded_at DESC, event_id LIMIT ?1",
        EVENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit(max)], EventRow::from_row)?;
    collect(rows)
}

pub fn count_events(conn: &Connection) -> DbResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
    Ok(count as u64)
}
