//! Table-level query functions.
//!
//! Everything takes a `&Connection` so callers decide the transaction scope.

pub mod audit;
pub mod events;
pub mod items;
pub mod operations;
pub mod sync_queue;
pub mod sync_runs;

use bt_core::time;
use chrono::{DateTime, Utc};

use crate::error::{DbError, DbResult};

pub(crate) fn ts(value: &DateTime<Utc>) -> String {
    time::to_storage(value)
}

pub(crate) fn parse_ts(raw: &str) -> DbResult<DateTime<Utc>> {
    time::from_storage(raw).map_err(|_| DbError::Timestamp(raw.to_string()))
}

pub(crate) fn parse_opt_ts(raw: Option<String>) -> DbResult<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

/// SQLite `LIMIT` takes a signed integer.
pub(crate) fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
