//! Sync queue drain.

use bt_core::model::{SyncQueueEntry, SyncQueueStatus, SyncTarget};
use bt_core::store::GraphMutation;
use bt_core::{BtResult, CancelToken, StoreResult};
use tracing::{debug, info, warn};

use super::{DrainReport, SyncService};

impl SyncService {
    /// Replay due queue entries against the graph.
    ///
    /// Entries carry a snapshot from when they failed, but the replay always
    /// uses the target's current primary state.
    pub async fn drain_queue(&self, dry_run: bool, cancel: &CancelToken) -> BtResult<DrainReport> {
        let mut report = DrainReport::default();
        let mut after: Option<i64> = None;

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let batch = self.queue.due_entries(after, self.config.batch_size).await?;
            let Some(last) = batch.last() else { break };
            after = Some(last.id);

            for entry in &batch {
                report.examined += 1;
                if dry_run {
                    continue;
                }
                self.settle(entry, &mut report).await;
            }
            if batch.len() < self.config.batch_size {
                break;
            }
        }

        info!(
            examined = report.examined,
            resolved = report.resolved,
            retrying = report.retrying,
            abandoned = report.abandoned,
            "Sync queue drained"
        );
        Ok(report)
    }

    async fn settle(&self, entry: &SyncQueueEntry, report: &mut DrainReport) {
        let (status, attempts, reason) = match self.replay(&entry.target).await {
            Ok(()) => {
                report.resolved += 1;
                (SyncQueueStatus::Resolved, entry.attempts, None)
            }
            Err(e) => {
                let attempts = entry.attempts + 1;
                let status = if attempts >= self.config.max_attempts {
                    report.abandoned += 1;
                    warn!(entry_id = entry.id, target = %entry.target.id(), attempts, error = %e, "Abandoning sync queue entry");
                    SyncQueueStatus::Abandoned
                } else {
                    report.retrying += 1;
                    SyncQueueStatus::Retrying
                };
                (status, attempts, Some(e.to_string()))
            }
        };

        if let Err(e) = self
            .queue
            .mark(entry.id, status, attempts, reason.as_deref())
            .await
        {
            warn!(entry_id = entry.id, error = %e, "Failed to update sync queue entry");
        } else {
            debug!(entry_id = entry.id, status = %status, attempts, "Sync queue entry updated");
        }
    }

    async fn replay(&self, target: &SyncTarget) -> StoreResult<()> {
        let tag = target.tag();
        let Some(item) = self.primary.get_item(tag).await? else {
            // Unknown to the primary: make sure the graph agrees.
            return self
                .graph
                .apply(&GraphMutation::DeleteItem { tag: tag.to_string() })
                .await;
        };
        self.graph.apply(&GraphMutation::UpsertItem { item }).await?;

        if let SyncTarget::Event { event_id, .. } = target {
            if let Some(event) = self.primary.get_event(event_id).await? {
                self.graph.apply(&GraphMutation::UpsertEvent { event }).await?;
            }
        }
        Ok(())
    }
}
