//! Sync queue entries: graph writes that still have to happen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::OperationKind;

/// A persisted, not-yet-reconciled graph write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueueEntry {
    pub id: i64,
    pub operation: OperationKind,
    pub target: SyncTarget,
    /// Snapshot of the graph mutations that failed.
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub attempts: u32,
    pub status: SyncQueueStatus,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What an entry has to bring up to date in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncTarget {
    Item { tag: String },
    Event { event_id: String, tag: String },
}

impl SyncTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Item { .. } => "item",
            Self::Event { .. } => "event",
        }
    }

    /// Identifier of the record itself (tag or event id).
    pub fn id(&self) -> &str {
        match self {
            Self::Item { tag } => tag,
            Self::Event { event_id, .. } => event_id,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Item { tag } | Self::Event { tag, .. } => tag,
        }
    }
}

/// Entry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncQueueStatus {
    Pending,
    Retrying,
    Resolved,
    Abandoned,
}

impl SyncQueueStatus {
    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "retrying" => Some(Self::Retrying),
            "resolved" => Some(Self::Resolved),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Resolved => "resolved",
            Self::Abandoned => "abandoned",
        }
    }

    /// Still owed to the graph store.
    pub fn is_due(&self) -> bool {
        matches!(self, Self::Pending | Self::Retrying)
    }
}

impl std::fmt::Display for SyncQueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data needed to enqueue a new entry.
#[derive(Debug, Clone)]
pub struct NewSyncEntry {
    pub operation: OperationKind,
    pub target: SyncTarget,
    pub payload: serde_json::Value,
    pub failure_reason: String,
    pub attempts: u32,
}

/// Aggregate health of the queue; the only way secondary failures surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueHealth {
    pub pending: u64,
    pub retrying: u64,
    pub abandoned: u64,
    pub resolved: u64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
    pub oldest_pending_age_seconds: Option<i64>,
}

impl QueueHealth {
    /// Entries still waiting to reach the graph.
    pub fn depth(&self) -> u64 {
        self.pending + self.retrying
    }
}
