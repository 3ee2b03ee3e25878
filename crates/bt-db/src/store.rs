//! `PrimaryStore` and `SyncQueue` backed by SQLite.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bt_core::model::{
    AuditRecord, EntityCounts, Event, Item, NewSyncEntry, QueueHealth, SyncQueueEntry,
    SyncQueueStatus, SyncRunRecord,
};
use bt_core::operation::{DerivedField, Operation, PrimaryWrite, WriteDisposition};
use bt_core::store::{PrimaryStore, SyncQueue};
use bt_core::{time, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::migrations::run_migrations;
use crate::pool::DbPool;
use crate::queries::{audit, events, items, operations, sync_queue, sync_runs};

/// SQLite-backed primary store. Also hosts the durable sync queue.
#[derive(Clone)]
pub struct SqlitePrimaryStore {
    pool: DbPool,
}

impl SqlitePrimaryStore {
    /// Open a database file and bring its schema up to date.
    pub fn open(path: &Path, busy_timeout: Duration) -> DbResult<Self> {
        let pool = DbPool::open(path, busy_timeout)?;
        run_migrations(&pool)?;
        Ok(Self { pool })
    }

    /// Migrated in-memory database.
    pub fn in_memory() -> DbResult<Self> {
        let pool = DbPool::in_memory()?;
        run_migrations(&pool)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Run blocking SQLite work off the async executor.
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> DbResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.with_conn_mut(f))
            .await
            .map_err(|e| StoreError::Backend(format!("SQLite task failed: {}", e)))?
            .map_err(StoreError::from)
    }
}

/// Apply one operation inside a single transaction.
/// Timestamps that would not round-trip through storage never reach a row.
fn check_storable(op: &Operation) -> DbResult<()> {
    let ts = match op {
        Operation::RecordEvent(ev) => &ev.timestamp,
        Operation::UpdateDerivedField(update) => &update.computed_at,
        Operation::CreateItem(_) => return Ok(()),
    };
    if time::is_storable(ts) {
        Ok(())
    } else {
        Err(DbError::Timestamp(time::to_storage(ts)))
    }
}

fn apply_operation(conn: &mut Connection, op: &Operation, now: DateTime<Utc>) -> DbResult<PrimaryWrite> {
    check_storable(op)?;
    let tx = conn.transaction()?;
    let kind = op.kind();
    let key = op.idempotency_key();
    let payload = op.canonical_payload()?;

    if let Some(previous) = operations::find_applied(&tx, kind, key)? {
        if previous != payload {
            return Err(DbError::Conflict(format!(
                "{} '{}' was already applied with a different payload",
                kind, key
            )));
        }
        let item = items::get_item(&tx, op.tag())?
            .ok_or_else(|| DbError::not_found("item", op.tag()))?;
        let event = match op {
            Operation::RecordEvent(ev) => events::get_event(&tx, &ev.event_id)?,
            _ => None,
        };
        debug!(operation = %kind, key, "Replay detected, nothing to write");
        return Ok(PrimaryWrite {
            disposition: WriteDisposition::Replayed,
            item,
            event,
        });
    }

    let write = match op {
        Operation::CreateItem(create) => {
            if items::get_item(&tx, &create.tag)?.is_some() {
                return Err(DbError::Conflict(format!(
                    "item '{}' already exists",
                    create.tag
                )));
            }
            let item = Item::checked_in(
                &create.tag,
                create.routing.clone(),
                &create.origin,
                create.owner_ref.clone(),
                create.risk_score,
                now,
            );
            items::upsert_item(&tx, &item)?;
            PrimaryWrite {
                disposition: WriteDisposition::Applied,
                item,
                event: None,
            }
        }
        Operation::RecordEvent(record) => {
            let mut item = items::get_item(&tx, &record.tag)?
                .ok_or_else(|| DbError::not_found("item", &record.tag))?;
            if events::get_event(&tx, &record.event_id)?.is_some() {
                return Err(DbError::Conflict(format!(
                    "event '{}' already exists",
                    record.event_id
                )));
            }

            let latest = events::latest_event_at(&tx, &record.tag)?;
            let out_of_order = latest.is_some_and(|latest| record.timestamp < latest);
            let event = record.to_event(out_of_order, now);
            events::insert_event(&tx, &event)?;

            if out_of_order {
                debug!(tag = %record.tag, event_id = %record.event_id, "Out-of-order event stored without moving the item");
            } else {
                item.observe(&event, now);
                items::upsert_item(&tx, &item)?;
            }
            PrimaryWrite {
                disposition: WriteDisposition::Applied,
                item,
                event: Some(event),
            }
        }
        Operation::UpdateDerivedField(update) => {
            let mut item = items::get_item(&tx, &update.tag)?
                .ok_or_else(|| DbError::not_found("item", &update.tag))?;
            let disposition = match update.field {
                DerivedField::RiskScore(_)
                    if item
                        .risk_updated_at
                        .is_some_and(|current| update.computed_at < current) =>
                {
                    WriteDisposition::Superseded
                }
                DerivedField::RiskScore(score) => {
                    item.risk_score = score;
                    item.risk_updated_at = Some(update.computed_at);
                    WriteDisposition::Applied
                }
                DerivedField::Status(status) => {
                    item.status = status;
                    WriteDisposition::Applied
                }
            };
            if disposition.changed_state() {
                item.updated_at = now;
                items::upsert_item(&tx, &item)?;
            }
            PrimaryWrite {
                disposition,
                item,
                event: None,
            }
        }
    };

    operations::mark_applied(&tx, kind, key, &payload, now)?;
    tx.commit()?;
    Ok(write)
}

#[async_trait]
impl PrimaryStore for SqlitePrimaryStore {
    async fn write(&self, op: &Operation) -> StoreResult<PrimaryWrite> {
        let op = op.clone();
        self.blocking(move |conn| apply_operation(conn, &op, time::now()))
            .await
    }

    async fn get_item(&self, tag: &str) -> StoreResult<Option<Item>> {
        let tag = tag.to_string();
        self.blocking(move |conn| items::get_item(conn, &tag)).await
    }

    async fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>> {
        let event_id = event_id.to_string();
        self.blocking(move |conn| events::get_event(conn, &event_id))
            .await
    }

    async fn events_for_item(&self, tag: &str) -> StoreResult<Vec<Event>> {
        let tag = tag.to_string();
        self.blocking(move |conn| events::events_for_item(conn, &tag))
            .await
    }

    async fn list_items(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<Item>> {
        let after = after.map(str::to_string);
        self.blocking(move |conn| items::list_items(conn, after.as_deref(), since, limit))
            .await
    }

    async fn list_events(
        &self,
        after: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> StoreResult<Vec<Event>> {
        let after = after.map(str::to_string);
        self.blocking(move |conn| events::list_events(conn, after.as_deref(), since, limit))
            .await
    }

    async fn recent_items(&self, limit: usize) -> StoreResult<Vec<Item>> {
        self.blocking(move |conn| items::recent_items(conn, limit))
            .await
    }

    async fn recent_events(&self, limit: usize) -> StoreResult<Vec<Event>> {
        self.blocking(move |conn| events::recent_events(conn, limit))
            .await
    }

    async fn counts(&self) -> StoreResult<EntityCounts> {
        self.blocking(|conn| {
            Ok(EntityCounts {
                items: items::count_items(conn)?,
                events: events::count_events(conn)?,
            })
        })
        .await
    }

    async fn append_audit(&self, record: &AuditRecord) -> StoreResult<()> {
        let record = record.clone();
        self.blocking(move |conn| audit::append(conn, &record)).await
    }

    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditRecord>> {
        self.blocking(move |conn| audit::recent(conn, limit)).await
    }

    async fn record_sync_run(&self, run: &SyncRunRecord) -> StoreResult<()> {
        let run = run.clone();
        self.blocking(move |conn| sync_runs::insert(conn, &run)).await
    }

    async fn last_sync_watermark(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.blocking(|conn| sync_runs::last_watermark(conn)).await
    }
}

#[async_trait]
impl SyncQueue for SqlitePrimaryStore {
    async fn enqueue(&self, entry: &NewSyncEntry) -> StoreResult<i64> {
        let entry = entry.clone();
        self.blocking(move |conn| sync_queue::enqueue(conn, &entry, time::now()))
            .await
    }

    async fn due_entries(
        &self,
        after_id: Option<i64>,
        limit: usize,
    ) -> StoreResult<Vec<SyncQueueEntry>> {
        self.blocking(move |conn| sync_queue::due_entries(conn, after_id, limit))
            .await
    }

    async fn mark(
        &self,
        id: i64,
        status: SyncQueueStatus,
        attempts: u32,
        failure_reason: Option<&str>,
    ) -> StoreResult<()> {
        let reason = failure_reason.map(str::to_string);
        self.blocking(move |conn| {
            sync_queue::mark(conn, id, status, attempts, reason.as_deref(), time::now())
        })
        .await
    }

    async fn resolve_through(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.blocking(move |conn| sync_queue::resolve_through(conn, cutoff, time::now()))
            .await
    }

    async fn list(
        &self,
        status: Option<SyncQueueStatus>,
        limit: usize,
    ) -> StoreResult<Vec<SyncQueueEntry>> {
        self.blocking(move |conn| sync_queue::list(conn, status, limit))
            .await
    }

    async fn health(&self, now: DateTime<Utc>) -> StoreResult<QueueHealth> {
        self.blocking(move |conn| sync_queue::health(conn, now)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bt_core::model::{EventType, ItemStatus, SyncTarget};
    use bt_core::operation::{CreateItem, RecordEvent, UpdateDerivedField};
    use bt_core::OperationKind;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use pretty_assertions::assert_eq;

    fn store() -> SqlitePrimaryStore {
        SqlitePrimaryStore::in_memory().unwrap()
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, minute, 0).unwrap()
    }

    fn create(tag: &str) -> Operation {
        Operation::CreateItem(CreateItem {
            tag: tag.into(),
            routing: vec!["JFK".into(), "LHR".into(), "NBO".into()],
            origin: "JFK".into(),
            owner_ref: Some("PAX-42".into()),
            risk_score: 0.3,
        })
    }

    fn event(id: &str, tag: &str, kind: EventType, location: &str, minute: u32) -> Operation {
        Operation::RecordEvent(RecordEvent {
            event_id: id.into(),
            tag: tag.into(),
            event_type: kind,
            location: location.into(),
            timestamp: at(minute),
            payload: serde_json::json!({"scanner": "S-7"}),
        })
    }

    fn risk(request: &str, tag: &str, score: f64, minute: u32) -> Operation {
        Operation::UpdateDerivedField(UpdateDerivedField {
            request_id: request.into(),
            tag: tag.into(),
            field: DerivedField::RiskScore(score),
            computed_at: at(minute),
        })
    }

    #[tokio::test]
    async fn test_create_item_then_replay() {
        let store = store();
        let first = store.write(&create("X1")).await.unwrap();
        assert_eq!(first.disposition, WriteDisposition::Applied);
        assert_eq!(first.item.status, ItemStatus::CheckedIn);

        let second = store.write(&create("X1")).await.unwrap();
        assert_eq!(second.disposition, WriteDisposition::Replayed);
        assert_eq!(second.item, first.item);
        assert_eq!(store.counts().await.unwrap().items, 1);
    }

    #[tokio::test]
    async fn test_create_item_with_different_attributes_conflicts() {
        let store = store();
        store.write(&create("X1")).await.unwrap();

        let Operation::CreateItem(mut changed) = create("X1") else { unreachable!() };
        changed.routing = vec!["JFK".into(), "CDG".into()];
        let err = store.write(&Operation::CreateItem(changed)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_record_event_moves_item_and_is_idempotent() {
        let store = store();
        store.write(&create("X1")).await.unwrap();

        let op = event("E1", "X1", EventType::Sortation, "JFK", 10);
        let first = store.write(&op).await.unwrap();
        assert_eq!(first.item.status, ItemStatus::InTransit);
        assert_eq!(first.item.last_seen_at, at(10));

        let replay = store.write(&op).await.unwrap();
        assert_eq!(replay.disposition, WriteDisposition::Replayed);
        assert_eq!(replay.event, first.event);
        assert_eq!(store.events_for_item("X1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unstorable_timestamp_leaves_item_writable() {
        let store = store();
        store.write(&create("X1")).await.unwrap();

        let Operation::RecordEvent(mut far) = event("E1", "X1", EventType::Load, "JFK", 0) else {
            unreachable!()
        };
        far.timestamp = Utc.with_ymd_and_hms(12000, 1, 1, 0, 0, 0).unwrap();
        let err = store.write(&Operation::RecordEvent(far)).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.get_event("E1").await.unwrap().is_none());

        let next = store.write(&event("E2", "X1", EventType::Sortation, "JFK", 5)).await.unwrap();
        assert_eq!(next.item.last_seen_at, at(5));
        assert_eq!(store.events_for_item("X1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_event_id_reuse_with_other_payload_conflicts() {
        let store = store();
        store.write(&create("X1")).await.unwrap();
        store
            .write(&event("E1", "X1", EventType::Sortation, "JFK", 10))
            .await
            .unwrap();

        let err = store
            .write(&event("E1", "X1", EventType::Load, "JFK", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_event_for_unknown_item_is_not_found() {
        let store = store();
        let err = store
            .write(&event("E1", "NOPE", EventType::CheckIn, "JFK", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "item", .. }));
        assert_eq!(store.counts().await.unwrap(), EntityCounts::default());
    }

    #[tokio::test]
    async fn test_out_of_order_event_is_flagged_and_does_not_move_item() {
        let store = store();
        store.write(&create("X1")).await.unwrap();
        store
            .write(&event("E2", "X1", EventType::Load, "JFK", 30))
            .await
            .unwrap();

        let late = store
            .write(&event("E1", "X1", EventType::Sortation, "JFK", 10))
            .await
            .unwrap();
        let late_event = late.event.unwrap();
        assert!(late_event.out_of_order);
        assert_eq!(late.item.status, ItemStatus::Loaded);

        let journey = store.events_for_item("X1").await.unwrap();
        let ids: Vec<_> = journey.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E2"]);
    }

    #[tokio::test]
    async fn test_stale_risk_update_is_superseded() {
        let store = store();
        store.write(&create("X1")).await.unwrap();

        let newer = store.write(&risk("r2", "X1", 0.8, 20)).await.unwrap();
        assert_eq!(newer.disposition, WriteDisposition::Applied);

        let older = store.write(&risk("r1", "X1", 0.1, 5)).await.unwrap();
        assert_eq!(older.disposition, WriteDisposition::Superseded);
        assert_eq!(older.item.risk_score, 0.8);

        let stored = store.get_item("X1").await.unwrap().unwrap();
        assert_eq!(stored.risk_score, 0.8);
        assert_eq!(stored.risk_updated_at, Some(at(20)));
    }

    #[tokio::test]
    async fn test_status_update() {
        let store = store();
        store.write(&create("X1")).await.unwrap();
        let op = Operation::UpdateDerivedField(UpdateDerivedField {
            request_id: "s1".into(),
            tag: "X1".into(),
            field: DerivedField::Status(ItemStatus::Lost),
            computed_at: at(0),
        });
        let write = store.write(&op).await.unwrap();
        assert_eq!(write.item.status, ItemStatus::Lost);
    }

    #[tokio::test]
    async fn test_list_items_pages_and_filters() {
        let store = store();
        for tag in ["A1", "B2", "C3"] {
            store.write(&create(tag)).await.unwrap();
        }

        let first = store.list_items(None, None, 2).await.unwrap();
        assert_eq!(first.iter().map(|i| i.tag.as_str()).collect::<Vec<_>>(), vec!["A1", "B2"]);
        let rest = store.list_items(Some("B2"), None, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].tag, "C3");

        let future = time::now() + ChronoDuration::hours(1);
        assert!(store.list_items(None, Some(future), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_lifecycle_and_health() {
        let store = store();
        let entry = NewSyncEntry {
            operation: OperationKind::RecordEvent,
            target: SyncTarget::Event {
                event_id: "E1".into(),
                tag: "X1".into(),
            },
            payload: serde_json::json!([]),
            failure_reason: "graph offline".into(),
            attempts: 3,
        };
        let id = store.enqueue(&entry).await.unwrap();
        store.enqueue(&entry).await.unwrap();

        let due = store.due_entries(None, 10).await.unwrap();
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].target, entry.target);
        assert_eq!(due[0].status, SyncQueueStatus::Pending);

        store
            .mark(id, SyncQueueStatus::Retrying, 4, Some("still offline"))
            .await
            .unwrap();
        let health = store.health(time::now()).await.unwrap();
        assert_eq!(health.pending, 1);
        assert_eq!(health.retrying, 1);
        assert_eq!(health.depth(), 2);
        assert!(health.oldest_pending_age_seconds.is_some());

        let resolved = store.resolve_through(time::now()).await.unwrap();
        assert_eq!(resolved, 2);
        assert!(store.due_entries(None, 10).await.unwrap().is_empty());
        assert_eq!(store.health(time::now()).await.unwrap().resolved, 2);
    }

    #[tokio::test]
    async fn test_mark_unknown_entry_is_not_found() {
        let err = store()
            .mark(99, SyncQueueStatus::Resolved, 1, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_watermark_ignores_unclean_runs() {
        let store = store();
        assert_eq!(store.last_sync_watermark().await.unwrap(), None);

        let run = |id: &str, minute: u32, dry_run: bool, failures: u64| SyncRunRecord {
            id: id.into(),
            mode: "full".into(),
            dry_run,
            started_at: at(minute),
            finished_at: at(minute + 1),
            watermark: at(minute),
            items_synced: 1,
            events_synced: 1,
            failures,
            cancelled: false,
        };
        store.record_sync_run(&run("a", 1, false, 0)).await.unwrap();
        store.record_sync_run(&run("b", 5, true, 0)).await.unwrap();
        store.record_sync_run(&run("c", 9, false, 2)).await.unwrap();

        assert_eq!(store.last_sync_watermark().await.unwrap(), Some(at(1)));
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/primary.db");
        {
            let store = SqlitePrimaryStore::open(&path, Duration::from_millis(500)).unwrap();
            store.write(&create("X1")).await.unwrap();
        }
        let reopened = SqlitePrimaryStore::open(&path, Duration::from_millis(500)).unwrap();
        assert!(reopened.get_item("X1").await.unwrap().is_some());
    }
}
