//! End-to-end convergence of the primary and graph stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bt_core::config::{CoordinatorConfig, SyncConfig};
use bt_core::model::{EntityCounts, Event, EventType, Item, ItemStatus, SyncQueueStatus};
use bt_core::operation::{CreateItem, RecordEvent};
use bt_core::store::{
    Direction, GraphMutation, GraphNode, GraphStore, ItemPredicate, NodeKey, PrimaryStore,
    Relation, SyncQueue, TimeWindow,
};
use bt_core::{CancelToken, StoreResult};
use bt_db::SqlitePrimaryStore;
use bt_graph::InMemoryGraphStore;
use bt_sync::{Coordinator, SyncMode, SyncOptions, SyncService};
use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;

struct World {
    primary: SqlitePrimaryStore,
    graph: Arc<InMemoryGraphStore>,
    coordinator: Coordinator,
    sync: SyncService,
}

fn world() -> World {
    world_with(SyncConfig {
        batch_size: 2,
        sample_size: 50,
        max_attempts: 3,
    })
}

fn world_with(sync_config: SyncConfig) -> World {
    let primary = SqlitePrimaryStore::in_memory().unwrap();
    let graph = Arc::new(InMemoryGraphStore::new());
    let coordinator = Coordinator::new(
        Arc::new(primary.clone()),
        graph.clone(),
        Arc::new(primary.clone()),
        CoordinatorConfig {
            graph_retries: 1,
            primary_retries: 1,
            retry_backoff_ms: 1,
        },
    );
    let sync = SyncService::new(
        Arc::new(primary.clone()),
        Arc::new(primary.clone()),
        graph.clone(),
        sync_config,
    );
    World {
        primary,
        graph,
        coordinator,
        sync,
    }
}

fn bag(tag: &str) -> CreateItem {
    CreateItem {
        tag: tag.into(),
        routing: vec!["JFK".into(), "LHR".into(), "FRA".into()],
        origin: "JFK".into(),
        owner_ref: Some("PNR-77".into()),
        risk_score: 0.2,
    }
}

fn scan(id: &str, tag: &str, event_type: EventType, location: &str, minute: u32) -> RecordEvent {
    RecordEvent {
        event_id: id.into(),
        tag: tag.into(),
        event_type,
        location: location.into(),
        timestamp: Utc.with_ymd_and_hms(2026, 5, 4, 9, minute, 0).unwrap(),
        payload: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn test_repeated_event_appends_one_journey_entry() {
    let w = world();
    w.coordinator.create_item(bag("B1")).await.unwrap();
    let event = scan("E1", "B1", EventType::Sortation, "JFK", 10);

    let first = w.coordinator.record_event(event.clone()).await.unwrap();
    let second = w.coordinator.record_event(event).await.unwrap();

    assert_eq!(first.item, second.item);
    assert_eq!(w.primary.events_for_item("B1").await.unwrap().len(), 1);
    assert_eq!(w.graph.counts().await.unwrap().events, 1);
}

#[tokio::test]
async fn test_outage_then_incremental_sync_converges() {
    let w = world();
    w.coordinator.create_item(bag("B1")).await.unwrap();

    w.graph.set_offline(true);
    let degraded = w
        .coordinator
        .record_event(scan("E1", "B1", EventType::Load, "JFK", 20))
        .await
        .unwrap();
    assert!(degraded.degraded);
    assert_eq!(degraded.item.status, ItemStatus::Loaded);
    w.coordinator.create_item(bag("B2")).await.unwrap();
    assert_eq!(w.sync.queue_health().await.unwrap().pending, 2);

    w.graph.set_offline(false);
    let before = w.sync.verify_consistency().await.unwrap();
    assert!(!before.is_consistent());

    let report = w
        .sync
        .run_sync(SyncMode::Incremental, SyncOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.queue.resolved, 2);

    let after = w.sync.verify_consistency().await.unwrap();
    assert_eq!(after.mismatch_count(), 0);
    assert!(after.is_consistent());
    assert_eq!(w.sync.queue_health().await.unwrap().depth(), 0);

    let in_graph = w.graph.get_item("B1").await.unwrap().unwrap();
    assert_eq!(in_graph.status, ItemStatus::Loaded);
}

#[tokio::test]
async fn test_full_sync_backfills_and_resolves_queue() {
    let w = world();
    w.graph.set_offline(true);
    for tag in ["B1", "B2", "B3"] {
        w.coordinator.create_item(bag(tag)).await.unwrap();
    }
    w.coordinator
        .record_event(scan("E1", "B2", EventType::Sortation, "JFK", 5))
        .await
        .unwrap();
    w.graph.set_offline(false);

    let report = w
        .sync
        .run_sync(SyncMode::Full, SyncOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.items.synced, 3);
    assert_eq!(report.events.synced, 1);
    assert_eq!(report.queue_resolved, 4);
    assert!(w.sync.verify_consistency().await.unwrap().is_consistent());

    let pending = w.primary.list(Some(SyncQueueStatus::Pending), 10).await.unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_full_sync_prunes_graph_only_items() {
    let w = world();
    w.coordinator.create_item(bag("B1")).await.unwrap();

    let stray = w.primary.get_item("B1").await.unwrap().unwrap();
    let mut ghost = stray.clone();
    ghost.tag = "GHOST".into();
    w.graph.apply(&GraphMutation::UpsertItem { item: ghost }).await.unwrap();

    let verify = w.sync.verify_consistency().await.unwrap();
    assert_eq!(verify.orphans, vec!["GHOST".to_string()]);

    let report = w
        .sync
        .run_sync(SyncMode::Full, SyncOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.pruned.synced, 1);
    assert!(w.graph.get_item("GHOST").await.unwrap().is_none());
    assert!(w.sync.verify_consistency().await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_dry_run_writes_nothing() {
    let w = world();
    w.graph.set_offline(true);
    w.coordinator.create_item(bag("B1")).await.unwrap();
    w.graph.set_offline(false);
    let writes = w.graph.applied_mutations();

    let options = SyncOptions {
        dry_run: true,
        ..SyncOptions::default()
    };
    let report = w
        .sync
        .run_sync(SyncMode::Incremental, options, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(report.items.planned, 1);
    assert_eq!(report.items.synced, 0);
    assert_eq!(report.queue.examined, 1);
    assert_eq!(w.graph.applied_mutations(), writes);
    assert_eq!(w.sync.queue_health().await.unwrap().pending, 1);
    assert_eq!(w.primary.last_sync_watermark().await.unwrap(), None);
}

#[tokio::test]
async fn test_cancelled_run_is_reported_and_not_used_as_watermark() {
    let w = world();
    w.coordinator.create_item(bag("B1")).await.unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let report = w
        .sync
        .run_sync(SyncMode::Full, SyncOptions::default(), &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert!(!report.is_clean());
    assert_eq!(report.items.synced, 0);
    assert_eq!(w.primary.last_sync_watermark().await.unwrap(), None);
}

/// Graph store that trips a cancel token once `after` mutations have landed.
struct CancelAfter {
    inner: Arc<InMemoryGraphStore>,
    cancel: CancelToken,
    after: usize,
    applied: AtomicUsize,
}

#[async_trait]
impl GraphStore for CancelAfter {
    async fn apply(&self, mutation: &GraphMutation) -> StoreResult<()> {
        self.inner.apply(mutation).await?;
        if self.applied.fetch_add(1, Ordering::SeqCst) + 1 >= self.after {
            self.cancel.cancel();
        }
        Ok(())
    }

    async fn get_item(&self, tag: &str) -> StoreResult<Option<Item>> {
        self.inner.get_item(tag).await
    }

    async fn get_event(&self, event_id: &str) -> StoreResult<Option<Event>> {
        self.inner.get_event(event_id).await
    }

    async fn neighbors(
        &self,
        node: &NodeKey,
        relation: Relation,
        direction: Direction,
    ) -> StoreResult<Vec<GraphNode>> {
        self.inner.neighbors(node, relation, direction).await
    }

    async fn shortest_path(
        &self,
        from: &NodeKey,
        to: &NodeKey,
        relation: Relation,
    ) -> StoreResult<Option<Vec<NodeKey>>> {
        self.inner.shortest_path(from, to, relation).await
    }

    async fn items_matching(
        &self,
        window: &TimeWindow,
        predicate: &ItemPredicate,
    ) -> StoreResult<Vec<Item>> {
        self.inner.items_matching(window, predicate).await
    }

    async fn list_item_tags(&self) -> StoreResult<Vec<String>> {
        self.inner.list_item_tags().await
    }

    async fn counts(&self) -> StoreResult<EntityCounts> {
        self.inner.counts().await
    }

    async fn last_write_at(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.inner.last_write_at().await
    }
}

#[tokio::test]
async fn test_cancel_between_batches_leaves_state_resumable() {
    let w = world();
    w.graph.set_offline(true);
    for tag in ["B1", "B2", "B3", "B4", "B5"] {
        w.coordinator.create_item(bag(tag)).await.unwrap();
    }
    w.graph.set_offline(false);

    let cancel = CancelToken::new();
    let tripping = Arc::new(CancelAfter {
        inner: w.graph.clone(),
        cancel: cancel.clone(),
        after: 2,
        applied: AtomicUsize::new(0),
    });
    let interrupted = SyncService::new(
        Arc::new(w.primary.clone()),
        Arc::new(w.primary.clone()),
        tripping,
        SyncConfig {
            batch_size: 2,
            sample_size: 50,
            max_attempts: 3,
        },
    );

    let report = interrupted
        .run_sync(SyncMode::Full, SyncOptions::default(), &cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.items.synced, 2);
    assert_eq!(report.queue_resolved, 0);
    assert_eq!(w.graph.counts().await.unwrap().items, 2);
    assert_eq!(w.primary.last_sync_watermark().await.unwrap(), None);
    assert_eq!(w.sync.queue_health().await.unwrap().pending, 5);

    let resumed = w
        .sync
        .run_sync(SyncMode::Full, SyncOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert!(resumed.is_clean());
    assert_eq!(resumed.items.synced, 5);
    assert_eq!(resumed.queue_resolved, 5);
    assert!(w.sync.verify_consistency().await.unwrap().is_consistent());
    assert!(w.primary.last_sync_watermark().await.unwrap().is_some());
}

#[tokio::test]
async fn test_incremental_sync_uses_last_clean_watermark() {
    let w = world();
    w.coordinator.create_item(bag("B1")).await.unwrap();
    w.sync
        .run_sync(SyncMode::Full, SyncOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert!(w.primary.last_sync_watermark().await.unwrap().is_some());

    w.coordinator.create_item(bag("B2")).await.unwrap();
    let report = w
        .sync
        .run_sync(SyncMode::Incremental, SyncOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.items.planned, 1);
    assert!(report.watermark.is_some());
}

#[tokio::test]
async fn test_unreachable_graph_abandons_entries_after_max_attempts() {
    let w = world_with(SyncConfig {
        batch_size: 10,
        sample_size: 10,
        max_attempts: 3,
    });
    w.graph.set_offline(true);
    w.coordinator.create_item(bag("B1")).await.unwrap();

    // The coordinator already made two attempts; the next failure is the last.
    let entry = &w.primary.list(None, 10).await.unwrap()[0];
    assert_eq!(entry.attempts, 2);

    let drained = w.sync.drain_queue(false, &CancelToken::new()).await.unwrap();
    assert_eq!(drained.abandoned, 1);

    let health = w.sync.queue_health().await.unwrap();
    assert_eq!(health.abandoned, 1);
    assert_eq!(health.depth(), 0);

    let abandoned = w.primary.list(Some(SyncQueueStatus::Abandoned), 10).await.unwrap();
    assert_eq!(abandoned.len(), 1);
    assert!(abandoned[0].failure_reason.contains("offline"));
}

#[tokio::test]
async fn test_verify_mode_reports_without_writing() {
    let w = world();
    w.graph.set_offline(true);
    w.coordinator.create_item(bag("B1")).await.unwrap();
    w.graph.set_offline(false);
    let writes = w.graph.applied_mutations();

    let report = w
        .sync
        .run_sync(SyncMode::Verify, SyncOptions::default(), &CancelToken::new())
        .await
        .unwrap();
    let verification = report.verification.unwrap();
    assert_eq!(verification.items.primary, 1);
    assert_eq!(verification.items.graph, 0);
    assert_eq!(verification.mismatches.len(), 1);
    assert_eq!(w.graph.applied_mutations(), writes);
}
