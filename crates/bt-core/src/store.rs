//! Store adapter contracts.
//!
//! The coordinator, sync service and analytics engine only ever see these
//! traits; concrete stores are constructed at startup and injected.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::model::{
    AuditRecord, EntityCounts, Event, Item, ItemStatus, NewSyncEntry, QueueHealth,
    SyncQueueEntry, SyncQueueStatus, SyncRunRecord,
};
use crate::operation::{Operation, PrimaryWrite};
use crate::time;

/// Authoritative transactional store.
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Apply one operation in a single transaction.
    async fn write(&self, op: &Operation) -> StoreResult<PrimaryWrite>;

    async fn get_item(&self, tag: &str) -> StoreResult<Option<Item>>;

    async fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>>;

    /// Events of one item, ordered by timestamp then event id.
    async fn events_for_item(&self, tag: &str) -> StoreResult<Vec<Event>>;

    /// Items ordered by tag, starting after `after`, optionally only those
    /// updated at or after `since`.
    async fn list_items(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<Item>>;

    /// Events ordered by event id, starting after `after`, optionally only
    /// those recorded at or after `since`.
    async fn list_events(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<Event>>;

    /// Most recently updated items first.
    async fn recent_items(&self, limit: usize) -> StoreResult<Vec<Item>>;

    /// Most recently recorded events first.
    async fn recent_events(&self, limit: usize) -> StoreResult<Vec<Event>>;

    async fn counts(&self) -> StoreResult<EntityCounts>;

    async fn append_audit(&self, record: &AuditRecord) -> StoreResult<()>;

    /// Newest first.
    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditRecord>>;

    async fn record_sync_run(&self, run: &SyncRunRecord) -> StoreResult<()>;

    /// Watermark of the latest clean (non-dry, uncancelled, failure-free) run.
    async fn last_sync_watermark(&self) -> StoreResult<Option<DateTime<Utc>>>;
}

/// Durable queue of graph writes that still have to happen.
#[async_trait]
pub trait SyncQueue: Send + Sync {
    async fn enqueue(&self, entry: &NewSyncEntry) -> StoreResult<i64>;

    /// Pending and retrying entries ordered by id, starting after `after_id`.
    async fn due_entries(&self, after_id: Option<i64>, limit: usize)
        -> StoreResult<Vec<SyncQueueEntry>>;

    async fn mark(
        &self,
        id: i64,
        status: SyncQueueStatus,
        attempts: u32,
        failure_reason: Option<&str>,
    ) -> StoreResult<()>;

    /// Resolve every due entry enqueued at or before `cutoff`.
    async fn resolve_through(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn list(
        &self,
        status: Option<SyncQueueStatus>,
        limit: usize,
    ) -> StoreResult<Vec<SyncQueueEntry>>;

    async fn health(&self, now: DateTime<Utc>) -> StoreResult<QueueHealth>;
}

/// Relationship-optimized projection of items and events.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotent mutation.
    async fn apply(&self, mutation: &GraphMutation) -> StoreResult<()>;

    async fn get_item(&self, tag: &str) -> StoreResult<Option<Item>>;

    async fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>>;

    /// Nodes one `relation` hop away from `node`.
    async fn neighbors(
        &self,
        node: &NodeKey,
        relation: Relation,
        direction: Direction,
    ) -> StoreResult<Vec<GraphNode>>;

    /// Shortest directed path along `relation`, both ends included.
    async fn shortest_path(
        &self,
        from: &NodeKey,
        to: &NodeKey,
        relation: Relation,
    ) -> StoreResult<Option<Vec<NodeKey>>>;

    /// Items last seen within `window` that satisfy `predicate`.
    async fn items_matching(
        &self,
        window: &TimeWindow,
        predicate: &ItemPredicate,
    ) -> StoreResult<Vec<Item>>;

    async fn list_item_tags(&self) -> StoreResult<Vec<String>>;

    async fn counts(&self) -> StoreResult<EntityCounts>;

    /// Time of the most recent write, if the store tracks it.
    async fn last_write_at(&self) -> StoreResult<Option<DateTime<Utc>>>;
}

/// Graph-side mutation derived from a primary write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mutation", rename_all = "snake_case")]
pub enum GraphMutation {
    /// Item node, its current location and its routing legs.
    UpsertItem { item: Item },
    /// Event node linked to an existing item and to its location.
    UpsertEvent { event: Event },
    /// Remove an item and its events.
    DeleteItem { tag: String },
}

impl GraphMutation {
    /// Mutations that mirror a primary write into the graph, item first.
    pub fn for_write(write: &PrimaryWrite) -> Vec<GraphMutation> {
        let mut mutations = vec![GraphMutation::UpsertItem {
            item: write.item.clone(),
        }];
        if let Some(event) = &write.event {
            mutations.push(GraphMutation::UpsertEvent {
                event: event.clone(),
            });
        }
        mutations
    }
}

/// Identity of a graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "label", content = "key")]
pub enum NodeKey {
    Item(String),
    Event(String),
    Location(String),
}

impl NodeKey {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Item(_) => "Item",
            Self::Event(_) => "Event",
            Self::Location(_) => "Location",
        }
    }

    /// Name of the unique key property for the label.
    pub fn key_property(&self) -> &'static str {
        match self {
            Self::Item(_) => "tag",
            Self::Event(_) => "id",
            Self::Location(_) => "code",
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Item(k) | Self::Event(k) | Self::Location(k) => k,
        }
    }
}

/// A node with its properties.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphNode {
    Item(Item),
    Event(Event),
    Location(String),
}

impl GraphNode {
    pub fn key(&self) -> NodeKey {
        match self {
            Self::Item(item) => NodeKey::Item(item.tag.clone()),
            Self::Event(event) => NodeKey::Event(event.event_id.clone()),
            Self::Location(code) => NodeKey::Location(code.clone()),
        }
    }
}

/// Relationship types of the graph schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    /// `(:Item)-[:HAS_EVENT]->(:Event)`
    HasEvent,
    /// `(:Event)-[:AT]->(:Location)`
    At,
    /// `(:Item)-[:CURRENTLY_AT]->(:Location)`
    CurrentlyAt,
    /// `(:Location)-[:CONNECTS_TO]->(:Location)`
    ConnectsTo,
}

impl Relation {
    pub fn as_cypher(&self) -> &'static str {
        match self {
            Self::HasEvent => "HAS_EVENT",
            Self::At => "AT",
            Self::CurrentlyAt => "CURRENTLY_AT",
            Self::ConnectsTo => "CONNECTS_TO",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The `length` leading up to `end`. A start before year 0000 is clamped
    /// to [`time::earliest_storable`].
    pub fn ending_at(end: DateTime<Utc>, length: chrono::Duration) -> Self {
        let start = end
            .checked_sub_signed(length)
            .filter(time::is_storable)
            .unwrap_or_else(time::earliest_storable);
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

/// Attribute filter for [`GraphStore::items_matching`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPredicate {
    /// Keep only these statuses; `None` keeps all.
    pub statuses: Option<Vec<ItemStatus>>,
    pub location: Option<String>,
}

impl ItemPredicate {
    /// Items that are still moving through the network.
    pub fn active() -> Self {
        Self {
            statuses: Some(
                ItemStatus::ALL
                    .into_iter()
                    .filter(|s| !s.is_terminal())
                    .collect(),
            ),
            location: None,
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        let status_ok = self
            .statuses
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&item.status));
        let location_ok = self
            .location
            .as_ref()
            .map_or(true, |loc| *loc == item.current_location);
        status_ok && location_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::WriteDisposition;

    #[test]
    fn test_active_predicate_excludes_terminal() {
        let mut item = Item::checked_in("X1", vec!["A".into()], "A", None, 0.0, crate::time::now());
        let predicate = ItemPredicate::active();
        assert!(predicate.matches(&item));
        item.status = ItemStatus::Delivered;
        assert!(!predicate.matches(&item));
    }

    #[test]
    fn test_huge_window_clamps_instead_of_overflowing() {
        let end = time::now();
        let window = TimeWindow::ending_at(end, chrono::Duration::days(200_000_000));
        assert_eq!(window.start, time::earliest_storable());
        assert!(window.contains(end));

        let hour = TimeWindow::ending_at(end, chrono::Duration::hours(1));
        assert_eq!(hour.start, end - chrono::Duration::hours(1));
    }

    #[test]
    fn test_mutations_put_item_first() {
        let now = crate::time::now();
        let item = Item::checked_in("X1", vec!["A".into()], "A", None, 0.0, now);
        let event = Event {
            event_id: "E1".into(),
            tag: "X1".into(),
            event_type: crate::model::EventType::Load,
            location: "A".into(),
            timestamp: now,
            payload: serde_json::Value::Null,
            out_of_order: false,
            recorded_at: now,
        };
        let write = PrimaryWrite {
            disposition: WriteDisposition::Applied,
            item,
            event: Some(event),
        };
        let mutations = GraphMutation::for_write(&write);
        assert!(matches!(mutations[0], GraphMutation::UpsertItem { .. }));
        assert!(matches!(mutations[1], GraphMutation::UpsertEvent { .. }));
    }
}
