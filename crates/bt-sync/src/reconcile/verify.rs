//! Read-only consistency verification.

use bt_core::store::GraphStore;
use bt_core::{time, BtResult, CancelToken};
use futures::stream::{self, StreamExt};
use tracing::info;

use super::{ConsistencyReport, CountComparison, Mismatch, MismatchKind, SyncService};

/// Concurrent graph reads while sampling.
const SAMPLE_CONCURRENCY: usize = 8;

impl SyncService {
    pub(super) async fn verify(&self, cancel: &CancelToken) -> BtResult<ConsistencyReport> {
        let primary_counts = self.primary.counts().await?;
        let graph_counts = self.graph.counts().await?;
        let mut report = ConsistencyReport {
            checked_at: time::now(),
            items: CountComparison {
                primary: primary_counts.items,
                graph: graph_counts.items,
            },
            events: CountComparison {
                primary: primary_counts.events,
                graph: graph_counts.events,
            },
            sampled_items: 0,
            sampled_events: 0,
            mismatches: Vec::new(),
            orphans: Vec::new(),
            cancelled: false,
        };

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }
        let graph: &dyn GraphStore = self.graph.as_ref();

        let items = self.primary.recent_items(self.config.sample_size).await?;
        report.sampled_items = items.len();
        let checked: Vec<_> = stream::iter(items)
            .map(|item| async move {
                let found = graph.get_item(&item.tag).await;
                (item, found)
            })
            .buffer_unordered(SAMPLE_CONCURRENCY)
            .collect()
            .await;
        for (item, found) in checked {
            let kind = match found? {
                None => MismatchKind::MissingInGraph,
                Some(graph_item) if !graph_item.same_state(&item) => MismatchKind::Stale,
                Some(_) => continue,
            };
            report.mismatches.push(Mismatch {
                entity: "item",
                id: item.tag,
                kind,
            });
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let events = self.primary.recent_events(self.config.sample_size).await?;
        report.sampled_events = events.len();
        let checked: Vec<_> = stream::iter(events)
            .map(|event| async move {
                let found = graph.get_event(&event.event_id).await;
                (event, found)
            })
            .buffer_unordered(SAMPLE_CONCURRENCY)
            .collect()
            .await;
        for (event, found) in checked {
            if found?.is_none() {
                report.mismatches.push(Mismatch {
                    entity: "event",
                    id: event.event_id,
                    kind: MismatchKind::MissingInGraph,
                });
            }
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }

        let primary_tags = self.primary_tags().await?;
        report.orphans = graph
            .list_item_tags()
            .await?
            .into_iter()
            .filter(|tag| !primary_tags.contains(tag))
            .collect();

        // Sampling order is nondeterministic; keep reports stable.
        report
            .mismatches
            .sort_by(|a, b| (a.entity, &a.id).cmp(&(b.entity, &b.id)));

        info!(
            items_primary = report.items.primary,
            items_graph = report.items.graph,
            events_primary = report.events.primary,
            events_graph = report.events.graph,
            mismatches = report.mismatch_count(),
            "Consistency verified"
        );
        Ok(report)
    }
}
