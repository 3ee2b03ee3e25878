//! Consistency coordinator.
//!
//! Every operation goes to the primary store first. Only once that write is
//! durable is the graph updated; a graph failure never fails the call, it is
//! queued for reconciliation and the result is flagged `degraded`.

use std::sync::Arc;
use std::time::Instant;

use bt_core::config::CoordinatorConfig;
use bt_core::model::{AuditOutcome, AuditRecord, NewSyncEntry, QueueHealth, StoreKind, SyncTarget};
use bt_core::operation::{
    CreateItem, Operation, OperationKind, OperationResult, PrimaryWrite, RecordEvent,
    UpdateDerivedField, WriteDisposition,
};
use bt_core::store::{GraphMutation, GraphStore, PrimaryStore, SyncQueue};
use bt_core::{time, validation, BtError, BtResult, StoreError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::retry::{with_retry, RetryError, RetryPolicy};

/// Sequences each operation across the primary and graph stores.
#[derive(Clone)]
pub struct Coordinator {
    primary: Arc<dyn PrimaryStore>,
    graph: Arc<dyn GraphStore>,
    queue: Arc<dyn SyncQueue>,
    config: CoordinatorConfig,
}

/// Per-call facts collected for the audit record.
struct Trace {
    operation: OperationKind,
    target: String,
    stores_touched: Vec<StoreKind>,
    primary_latency_ms: Option<u64>,
    graph_latency_ms: Option<u64>,
}

impl Coordinator {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        graph: Arc<dyn GraphStore>,
        queue: Arc<dyn SyncQueue>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            primary,
            graph,
            queue,
            config,
        }
    }

    pub async fn create_item(&self, op: CreateItem) -> BtResult<OperationResult> {
        self.apply(Operation::CreateItem(op)).await
    }

    pub async fn record_event(&self, op: RecordEvent) -> BtResult<OperationResult> {
        self.apply(Operation::RecordEvent(op)).await
    }

    pub async fn update_derived_field(&self, op: UpdateDerivedField) -> BtResult<OperationResult> {
        self.apply(Operation::UpdateDerivedField(op)).await
    }

    /// Secondary failures surface only here, as aggregate queue health.
    pub async fn queue_health(&self) -> BtResult<QueueHealth> {
        Ok(self.queue.health(time::now()).await?)
    }

    /// Apply one operation. Appends exactly one audit record.
    pub async fn apply(&self, op: Operation) -> BtResult<OperationResult> {
        let mut trace = Trace {
            operation: op.kind(),
            target: op.idempotency_key().to_string(),
            stores_touched: Vec::new(),
            primary_latency_ms: None,
            graph_latency_ms: None,
        };

        let op = match validation::validate(op) {
            Ok(op) => op,
            Err(e) => {
                self.audit(&trace, false, AuditOutcome::Rejected, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let write = match self.write_primary(&op, &mut trace).await {
            Ok(write) => write,
            Err(e) => {
                let outcome = match e {
                    BtError::Conflict(_) | BtError::NotFound(_) => AuditOutcome::Rejected,
                    _ => AuditOutcome::Failed,
                };
                self.audit(&trace, false, outcome, Some(e.to_string())).await;
                return Err(e);
            }
        };

        let mut result = OperationResult {
            operation: trace.operation,
            target: trace.target.clone(),
            disposition: write.disposition,
            degraded: false,
            item: write.item.clone(),
            queued_entry: None,
            primary_latency_ms: trace.primary_latency_ms.unwrap_or(0),
            graph_latency_ms: None,
        };

        // Nothing changed in the primary, so nothing to mirror.
        if !write.disposition.changed_state() {
            let outcome = match write.disposition {
                WriteDisposition::Superseded => AuditOutcome::Superseded,
                _ => AuditOutcome::Replayed,
            };
            debug!(operation = %trace.operation, target = %trace.target, disposition = ?write.disposition, "Graph write skipped");
            self.audit(&trace, false, outcome, None).await;
            return Ok(result);
        }

        let mutations = GraphMutation::for_write(&write);
        let graph_outcome = self.write_graph(&mutations, &mut trace).await;
        result.graph_latency_ms = trace.graph_latency_ms;

        match graph_outcome {
            Ok(()) => {
                self.audit(&trace, false, AuditOutcome::Applied, None).await;
            }
            Err(failure) => {
                warn!(
                    operation = %trace.operation,
                    target = %trace.target,
                    attempts = failure.attempts,
                    error = %failure.source,
                    "Graph write failed, queueing for reconciliation"
                );
                result.degraded = true;
                result.queued_entry = self.enqueue(&op, &write, &mutations, &failure).await;
                self.audit(
                    &trace,
                    true,
                    AuditOutcome::Degraded,
                    Some(failure.source.to_string()),
                )
                .await;
            }
        }

        Ok(result)
    }

    async fn write_primary(&self, op: &Operation, trace: &mut Trace) -> BtResult<PrimaryWrite> {
        let policy = RetryPolicy::fixed(self.config.primary_retries, self.config.retry_backoff());
        let started = Instant::now();
        let outcome = with_retry(policy, "primary write", || self.primary.write(op)).await;
        trace.primary_latency_ms = Some(elapsed_ms(started));
        trace.stores_touched.push(StoreKind::Primary);

        outcome.map_err(|RetryError { source, attempts }| match source {
            StoreError::Conflict(msg) => BtError::Conflict(msg),
            StoreError::NotFound { entity, id } => BtError::NotFound(format!("{} {}", entity, id)),
            other => BtError::PrimaryWrite(format!("{} (after {} attempt(s))", other, attempts)),
        })
    }

    async fn write_graph(
        &self,
        mutations: &[GraphMutation],
        trace: &mut Trace,
    ) -> Result<(), RetryError> {
        let policy = RetryPolicy::fixed(self.config.graph_retries, self.config.retry_backoff());
        let started = Instant::now();
        let outcome = with_retry(policy, "graph write", || async {
            for mutation in mutations {
                self.graph.apply(mutation).await?;
            }
            Ok::<(), StoreError>(())
        })
        .await;
        trace.graph_latency_ms = Some(elapsed_ms(started));
        trace.stores_touched.push(StoreKind::Graph);
        outcome
    }

    async fn enqueue(
        &self,
        op: &Operation,
        write: &PrimaryWrite,
        mutations: &[GraphMutation],
        failure: &RetryError,
    ) -> Option<i64> {
        let target = match &write.event {
            Some(event) => SyncTarget::Event {
                event_id: event.event_id.clone(),
                tag: event.tag.clone(),
            },
            None => SyncTarget::Item {
                tag: write.item.tag.clone(),
            },
        };
        let payload = match serde_json::to_value(mutations) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Could not snapshot graph mutations");
                serde_json::Value::Null
            }
        };
        let entry = NewSyncEntry {
            operation: op.kind(),
            target,
            payload,
            failure_reason: failure.source.to_string(),
            attempts: failure.attempts,
        };

        match self.queue.enqueue(&entry).await {
            Ok(id) => {
                debug!(entry_id = id, target = %entry.target.id(), "Queued graph write");
                Some(id)
            }
            Err(e) => {
                error!(
                    operation = %entry.operation,
                    target = %entry.target.id(),
                    error = %e,
                    "Failed to persist sync queue entry; a full sync will be needed"
                );
                None
            }
        }
    }

    /// Best-effort: the tracing event always fires, the stored row may not.
    async fn audit(&self, trace: &Trace, degraded: bool, outcome: AuditOutcome, detail: Option<String>) {
        let record = AuditRecord {
            id: Uuid::new_v4().to_string(),
            operation: trace.operation,
            target: trace.target.clone(),
            stores_touched: trace.stores_touched.clone(),
            primary_latency_ms: trace.primary_latency_ms,
            graph_latency_ms: trace.graph_latency_ms,
            degraded,
            outcome,
            detail,
            recorded_at: time::now(),
        };

        info!(
            target: "bagtrail::audit",
            id = %record.id,
            operation = %record.operation,
            target_id = %record.target,
            outcome = record.outcome.as_str(),
            degraded = record.degraded,
            primary_ms = ?record.primary_latency_ms,
            graph_ms = ?record.graph_latency_ms,
            "operation applied"
        );

        if let Err(e) = self.primary.append_audit(&record).await {
            warn!(id = %record.id, error = %e, "Failed to store audit record");
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
