//! Reconciliation, verification, queue and audit commands.

use anyhow::Result;
use bt_core::model::SyncQueueStatus;
use bt_core::store::{PrimaryStore, SyncQueue};
use bt_core::CancelToken;
use bt_sync::{SyncMode, SyncOptions};
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use serde_json::json;
use tracing::warn;

use crate::output;
use crate::progress::Spinner;
use crate::stores::Stores;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SyncModeArg {
    /// Upsert everything, prune graph-only items
    Full,
    /// Upsert changes since the last clean run, then drain the queue
    Incremental,
}

impl From<SyncModeArg> for SyncMode {
    fn from(mode: SyncModeArg) -> Self {
        match mode {
            SyncModeArg::Full => SyncMode::Full,
            SyncModeArg::Incremental => SyncMode::Incremental,
        }
    }
}

#[derive(Args)]
pub struct SyncArgs {
    #[arg(value_enum)]
    pub mode: SyncModeArg,

    /// Override the incremental watermark, RFC 3339
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Report what would be written without writing
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct QueueArgs {
    /// pending, retrying, resolved or abandoned
    #[arg(long, value_parser = parse_queue_status)]
    pub status: Option<SyncQueueStatus>,

    /// Maximum entries to list
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

#[derive(Args)]
pub struct AuditArgs {
    /// Maximum records to list
    #[arg(long, default_value = "20")]
    pub limit: usize,
}

/// Run a sync pass. Ctrl-C stops it after the current batch.
pub async fn run(args: SyncArgs, stores: &Stores, json: bool) -> Result<()> {
    let service = stores.sync_service();
    let mode = SyncMode::from(args.mode);
    let options = SyncOptions {
        watermark: args.since,
        dry_run: args.dry_run,
    };

    let cancel = CancelToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping after the current batch");
                cancel.cancel();
            }
        })
    };

    let spinner = Spinner::start(&format!("Running {} sync...", mode), !json);
    let outcome = service.run_sync(mode, options, &cancel).await;
    interrupt.abort();

    let report = match outcome {
        Ok(report) => {
            spinner.finish_clear();
            report
        }
        Err(e) => {
            spinner.finish_err("Sync failed");
            return Err(e.into());
        }
    };

    if json {
        return output::print_json(&report);
    }
    output::print_sync_report(&report);
    Ok(())
}

pub async fn verify(stores: &Stores, json: bool) -> Result<()> {
    let spinner = Spinner::start("Comparing stores...", !json);
    let report = stores.sync_service().verify_consistency().await;
    spinner.finish_clear();
    let report = report?;

    if json {
        return output::print_json(&report);
    }
    output::print_consistency(&report);
    Ok(())
}

pub async fn queue(args: QueueArgs, stores: &Stores, json: bool) -> Result<()> {
    let health = stores.sync_service().queue_health().await?;
    let entries = stores.primary.list(args.status, args.limit).await?;

    if json {
        return output::print_json(&json!({
            "health": health,
            "entries": entries,
        }));
    }
    output::print_queue_health(&health);
    println!();
    output::print_queue_entries(&entries);
    Ok(())
}

pub async fn audit(args: AuditArgs, stores: &Stores, json: bool) -> Result<()> {
    let records = stores.primary.recent_audit(args.limit).await?;
    if json {
        return output::print_json(&records);
    }
    output::print_audit(&records);
    Ok(())
}

fn parse_queue_status(s: &str) -> Result<SyncQueueStatus, String> {
    SyncQueueStatus::parse(s).ok_or_else(|| {
        format!(
            "unknown queue status '{}', expected pending, retrying, resolved or abandoned",
            s
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_mapping() {
        assert_eq!(SyncMode::from(SyncModeArg::Full), SyncMode::Full);
        assert_eq!(SyncMode::from(SyncModeArg::Incremental), SyncMode::Incremental);
    }

    #[test]
    fn test_parse_queue_status() {
        assert_eq!(parse_queue_status("abandoned"), Ok(SyncQueueStatus::Abandoned));
        assert!(parse_queue_status("stuck").is_err());
    }
}
