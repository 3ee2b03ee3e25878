//! Domain models.

pub mod audit;
pub mod event;
pub mod item;
pub mod sync_queue;

pub use audit::{AuditOutcome, AuditRecord, StoreKind};
pub use event::{Event, EventType};
pub use item::{Item, ItemStatus};
pub use sync_queue::{NewSyncEntry, QueueHealth, SyncQueueEntry, SyncQueueStatus, SyncTarget};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-entity-type record counts, as reported by either store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub items: u64,
    pub events: u64,
}

/// Bookkeeping for a completed sync run; clean runs advance the watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRunRecord {
    pub id: String,
    pub mode: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Watermark the next incremental run may start from.
    pub watermark: DateTime<Utc>,
    pub items_synced: u64,
    pub events_synced: u64,
    pub failures: u64,
    pub cancelled: bool,
}
