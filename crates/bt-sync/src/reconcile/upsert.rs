//! Full and incremental upsert passes, and orphan pruning.

use bt_core::store::GraphMutation;
use bt_core::{BtResult, CancelToken};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{SyncReport, SyncService};

impl SyncService {
    /// Upsert items, then events, changed at or after `since` (all if `None`).
    pub(super) async fn upsert_all(
        &self,
        report: &mut SyncReport,
        since: Option<DateTime<Utc>>,
        cancel: &CancelToken,
    ) -> BtResult<()> {
        report.watermark = since;
        let batch_size = self.config.batch_size;

        let mut cursor: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }
            let batch = self.primary.list_items(cursor.as_deref(), since, batch_size).await?;
            let Some(last) = batch.last() else { break };
            cursor = Some(last.tag.clone());

            for item in &batch {
                report.items.planned += 1;
                if report.dry_run {
                    continue;
                }
                let mutation = GraphMutation::UpsertItem { item: item.clone() };
                match self.graph.apply(&mutation).await {
                    Ok(()) => report.items.synced += 1,
                    Err(e) => {
                        warn!(tag = %item.tag, error = %e, "Failed to sync item");
                        report.items.failed += 1;
                        report.record_failure("item", &item.tag, e);
                    }
                }
            }
            debug!(batch = batch.len(), "Item batch processed");
            if batch.len() < batch_size {
                break;
            }
        }
        info!(planned = report.items.planned, synced = report.items.synced, "Items synced");

        let mut cursor: Option<String> = None;
        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(());
            }
            let batch = self.primary.list_events(cursor.as_deref(), since, batch_size).await?;
            let Some(last) = batch.last() else { break };
            cursor = Some(last.event_id.clone());

            for event in &batch {
                report.events.planned += 1;
                if report.dry_run {
                    continue;
                }
                let mutation = GraphMutation::UpsertEvent { event: event.clone() };
                match self.graph.apply(&mutation).await {
                    Ok(()) => report.events.synced += 1,
                    Err(e) => {
                        warn!(event_id = %event.event_id, tag = %event.tag, error = %e, "Failed to sync event");
                        report.events.failed += 1;
                        report.record_failure("event", &event.event_id, e);
                    }
                }
            }
            debug!(batch = batch.len(), "Event batch processed");
            if batch.len() < batch_size {
                break;
            }
        }
        info!(planned = report.events.planned, synced = report.events.synced, "Events synced");
        Ok(())
    }

    /// Remove graph items the primary store does not know. The primary wins.
    pub(super) async fn prune_orphans(&self, report: &mut SyncReport) -> BtResult<()> {
        let graph_tags = match self.graph.list_item_tags().await {
            Ok(tags) => tags,
            Err(e) => {
                warn!(error = %e, "Could not list graph items, skipping orphan pruning");
                report.record_failure("item", "*", e);
                return Ok(());
            }
        };
        let primary_tags = self.primary_tags().await?;

        for tag in graph_tags.iter().filter(|tag| !primary_tags.contains(*tag)) {
            report.pruned.planned += 1;
            if report.dry_run {
                continue;
            }
            match self.graph.apply(&GraphMutation::DeleteItem { tag: tag.clone() }).await {
                Ok(()) => {
                    info!(tag = %tag, "Pruned graph-only item");
                    report.pruned.synced += 1;
                }
                Err(e) => {
                    warn!(tag = %tag, error = %e, "Failed to prune graph-only item");
                    report.pruned.failed += 1;
                    report.record_failure("item", tag, e);
                }
            }
        }
        Ok(())
    }
}
