//! Reconciliation sync service.
//!
//! Brings the graph back in line with the primary store: full backfill,
//! incremental catch-up from a watermark plus queue drain, and a read-only
//! verification pass. Upserts are idempotent, so runs can overlap live
//! traffic and a cancelled run leaves nothing half-written.

mod drain;
mod report;
mod upsert;
mod verify;

use std::collections::HashSet;
use std::sync::Arc;

use bt_core::config::SyncConfig;
use bt_core::model::{QueueHealth, SyncRunRecord};
use bt_core::store::{GraphStore, PrimaryStore, SyncQueue};
use bt_core::{time, BtResult, CancelToken};
use tracing::{info, warn};
use uuid::Uuid;

pub use report::{
    ConsistencyReport, CountComparison, DrainReport, EntityTally, Mismatch, MismatchKind,
    RecordFailure, SyncMode, SyncOptions, SyncReport, MAX_LISTED_FAILURES,
};

/// Batch job reconciling the graph with the primary store.
#[derive(Clone)]
pub struct SyncService {
    primary: Arc<dyn PrimaryStore>,
    queue: Arc<dyn SyncQueue>,
    graph: Arc<dyn GraphStore>,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        queue: Arc<dyn SyncQueue>,
        graph: Arc<dyn GraphStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            primary,
            queue,
            graph,
            config,
        }
    }

    pub async fn queue_health(&self) -> BtResult<QueueHealth> {
        Ok(self.queue.health(time::now()).await?)
    }

    /// Compare both stores without touching either.
    pub async fn verify_consistency(&self) -> BtResult<ConsistencyReport> {
        self.verify(&CancelToken::new()).await
    }

    /// Run one sync pass.
    pub async fn run_sync(
        &self,
        mode: SyncMode,
        options: SyncOptions,
        cancel: &CancelToken,
    ) -> BtResult<SyncReport> {
        let started = time::now();
        let mut report = SyncReport::new(Uuid::new_v4().to_string(), mode, options.dry_run, started);
        info!(run_id = %report.run_id, mode = %mode, dry_run = options.dry_run, "Starting graph sync");

        match mode {
            SyncMode::Verify => {
                let verification = self.verify(cancel).await?;
                report.cancelled = verification.cancelled;
                report.verification = Some(verification);
            }
            SyncMode::Full => {
                self.upsert_all(&mut report, None, cancel).await?;
                if !report.cancelled {
                    self.prune_orphans(&mut report).await?;
                }
            }
            SyncMode::Incremental => {
                let watermark = match options.watermark {
                    Some(watermark) => Some(watermark),
                    None => self.primary.last_sync_watermark().await?,
                };
                if watermark.is_none() {
                    info!("No watermark recorded yet, syncing everything");
                }
                self.upsert_all(&mut report, watermark, cancel).await?;
                if !report.cancelled {
                    report.queue = self.drain_queue(options.dry_run, cancel).await?;
                    report.cancelled = report.queue.cancelled;
                }
            }
        }

        report.finished_at = time::now();
        if mode != SyncMode::Verify && !options.dry_run {
            self.finish_run(&mut report).await;
        }

        info!(
            run_id = %report.run_id,
            mode = %mode,
            items = report.items.synced,
            events = report.events.synced,
            pruned = report.pruned.synced,
            queue_resolved = report.queue.resolved + report.queue_resolved,
            failures = report.failure_count,
            cancelled = report.cancelled,
            "Graph sync complete"
        );
        Ok(report)
    }

    /// Settle the queue after a clean full run and record the run.
    async fn finish_run(&self, report: &mut SyncReport) {
        if report.mode == SyncMode::Full && report.is_clean() {
            match self.queue.resolve_through(report.started_at).await {
                Ok(resolved) => report.queue_resolved = resolved,
                Err(e) => warn!(error = %e, "Failed to resolve queue entries after full sync"),
            }
        }

        let run = SyncRunRecord {
            id: report.run_id.clone(),
            mode: report.mode.as_str().to_string(),
            dry_run: report.dry_run,
            started_at: report.started_at,
            finished_at: report.finished_at,
            watermark: report.started_at,
            items_synced: report.items.synced,
            events_synced: report.events.synced,
            failures: report.failure_count,
            cancelled: report.cancelled,
        };
        if let Err(e) = self.primary.record_sync_run(&run).await {
            warn!(run_id = %run.id, error = %e, "Failed to record sync run");
        }
    }

    /// Every item tag in the primary store.
    async fn primary_tags(&self) -> BtResult<HashSet<String>> {
        let mut tags = HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let batch = self
                .primary
                .list_items(cursor.as_deref(), None, self.config.batch_size)
                .await?;
            let done = batch.len() < self.config.batch_size;
            cursor = batch.last().map(|item| item.tag.clone());
            tags.extend(batch.into_iter().map(|item| item.tag));
            if done || cursor.is_none() {
                return Ok(tags);
            }
        }
    }
}
