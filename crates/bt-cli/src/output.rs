//! Terminal output formatting.

use anyhow::Result;
use bt_core::model::{
    AuditOutcome, AuditRecord, Event, ItemStatus, QueueHealth, SyncQueueEntry, SyncQueueStatus,
};
use bt_core::operation::{OperationResult, WriteDisposition};
use bt_graph::analytics::bottleneck::Bottleneck;
use bt_graph::analytics::journey::CurrentLocation;
use bt_graph::analytics::risk::{RiskAssessment, RiskTier};
use bt_graph::analytics::route::Route;
use bt_graph::DataFreshness;
use bt_sync::{ConsistencyReport, SyncReport};
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use serde::Serialize;

/// Pretty-printed JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the outcome of a write.
pub fn print_operation(result: &OperationResult) {
    let (mark, verb) = match result.disposition {
        WriteDisposition::Applied => ("✓".green().bold(), "applied"),
        WriteDisposition::Replayed => ("=".cyan().bold(), "already applied, nothing changed"),
        WriteDisposition::Superseded => ("↷".yellow().bold(), "superseded by a newer value"),
    };
    println!("{} {} {} {}", mark, result.operation.to_string().bold(), result.target.cyan(), verb);

    let item = &result.item;
    println!("  Item:     {} [{}]", item.tag.cyan(), status_colored(item.status));
    println!("  Location: {}{}", item.current_location, off_route_marker(item.off_route));
    println!("  Risk:     {:.2}", item.risk_score);
    match result.graph_latency_ms {
        Some(graph_ms) => println!(
            "  Latency:  primary {}ms, graph {}ms",
            result.primary_latency_ms, graph_ms
        ),
        None => println!("  Latency:  primary {}ms", result.primary_latency_ms),
    }

    if result.degraded {
        println!();
        let queued = result
            .queued_entry
            .map(|id| format!("queued as #{}", id))
            .unwrap_or_else(|| "NOT queued, run a full sync".to_string());
        println!(
            "{} Graph write failed; saved in the primary store, {}",
            "⚠".yellow().bold(),
            queued
        );
    }
}

/// Print a journey as a timeline.
pub fn print_journey(tag: &str, events: &[Event]) {
    println!("{} {}", "Journey of".bold(), tag.cyan());
    println!("{}", "─".repeat(60));

    if events.is_empty() {
        println!("{}", "No events recorded.".dimmed());
        return;
    }

    for event in events {
        let late = if event.out_of_order {
            format!(" {}", "(late)".yellow())
        } else {
            String::new()
        };
        println!(
            "  {}  {:<10} {:<8} {}{}",
            format_ts(&event.timestamp).dimmed(),
            event.event_type.as_str(),
            event.location.bold(),
            event.event_id.dimmed(),
            late
        );
    }

    println!();
    println!("{} event(s)", events.len());
}

pub fn print_location(location: &CurrentLocation) {
    println!(
        "{} is at {}{}",
        location.tag.cyan(),
        location.location.bold(),
        off_route_marker(location.off_route)
    );
    match &location.event_id {
        Some(event_id) => println!(
            "  Seen {} by event {}",
            format_ts(&location.observed_at),
            event_id.dimmed()
        ),
        None => println!(
            "  {} (registered {})",
            "No scans yet".dimmed(),
            format_ts(&location.observed_at)
        ),
    }
}

pub fn print_risk(assessment: &RiskAssessment) {
    println!(
        "{} {} on {}",
        "Connection risk for".bold(),
        assessment.tag.cyan(),
        assessment.leg.yellow()
    );
    println!("{}", "─".repeat(50));
    println!(
        "  Score: {:.3}  [{}]",
        assessment.score,
        tier_colored(assessment.tier)
    );
    println!(
        "  Budget: {} min (minimum connection {} min)",
        assessment.budget_minutes, assessment.min_connection_minutes
    );

    if assessment.factors.is_empty() {
        return;
    }
    println!();
    println!("{}", "Factors".bold());
    for factor in &assessment.factors {
        println!(
            "  {} {:+.3}  {}",
            "•".dimmed(),
            factor.contribution,
            factor.detail
        );
    }
}

pub fn print_bottlenecks(bottlenecks: &[Bottleneck], window_minutes: i64, min_count: usize) {
    println!(
        "{} (last {} min, at least {} items)",
        "Bottlenecks".bold(),
        window_minutes,
        min_count
    );
    println!("{}", "─".repeat(60));

    if bottlenecks.is_empty() {
        println!("{}", "No bottlenecks detected.".dimmed());
        return;
    }

    println!("  {:<10} {:>6} {:>10}  {:<10} {}", "Location", "Items", "Mean risk", "Severity", "Tags");
    for b in bottlenecks {
        println!(
            "  {:<10} {:>6} {:>10.2}  {:<10} {}",
            b.location.bold(),
            b.item_count,
            b.mean_risk,
            tier_colored(b.severity),
            truncate(&b.tags.join(","), 40).dimmed()
        );
    }
}

pub fn print_route(tag: &str, route: Option<&Route>) {
    match route {
        Some(route) if route.legs() == 0 => {
            println!("{} is already at its destination {}", tag.cyan(), route.to.bold());
        }
        Some(route) => {
            println!(
                "{} {} → {} ({} leg(s))",
                tag.cyan(),
                route.from.bold(),
                route.to.bold(),
                route.legs()
            );
            println!("  {}", route.stops.join(" → "));
        }
        None => println!(
            "{} No known route from the current location of {} to its destination.",
            "⚠".yellow().bold(),
            tag.cyan()
        ),
    }
}

/// Staleness caveat printed under every analytics result.
pub fn print_freshness(freshness: Option<&DataFreshness>) {
    match freshness {
        Some(f) => println!(
            "\n{}",
            format!(
                "Graph data as of {} ({}s ago)",
                format_ts(&f.graph_as_of),
                f.age_seconds
            )
            .dimmed()
        ),
        None => println!("\n{}", "Graph holds no data yet.".dimmed()),
    }
}

pub fn print_sync_report(report: &SyncReport) {
    let title = format!(
        "{} sync{}",
        report.mode,
        if report.dry_run { " (dry run)" } else { "" }
    );
    let headline = if report.cancelled {
        format!("{} cancelled", title).yellow().bold()
    } else if report.is_clean() {
        format!("{} complete", title).green().bold()
    } else {
        format!("{} finished with failures", title).red().bold()
    };
    println!("{}", headline);
    println!("{}", "─".repeat(50));

    match report.watermark {
        Some(watermark) => println!("  Since:        {}", format_ts(&watermark)),
        None => println!("  Since:        {}", "beginning".dimmed()),
    }
    println!(
        "  Items:        {} synced / {} planned",
        report.items.synced.to_string().cyan(),
        report.items.planned
    );
    println!(
        "  Events:       {} synced / {} planned",
        report.events.synced.to_string().cyan(),
        report.events.planned
    );
    if report.pruned.planned > 0 {
        println!(
            "  Pruned:       {} / {} graph-only item(s)",
            report.pruned.synced, report.pruned.planned
        );
    }
    if report.queue.examined > 0 {
        println!(
            "  Queue:        {} examined, {} resolved, {} retrying, {} abandoned",
            report.queue.examined,
            report.queue.resolved.to_string().green(),
            report.queue.retrying.to_string().yellow(),
            report.queue.abandoned.to_string().red()
        );
    }
    if report.queue_resolved > 0 {
        println!("  Queue settled: {}", report.queue_resolved.to_string().green());
    }
    println!(
        "  Duration:     {}ms",
        (report.finished_at - report.started_at).num_milliseconds()
    );

    if report.failure_count > 0 {
        println!();
        println!("{} ({})", "Failures".red().bold(), report.failure_count);
        for failure in &report.failures {
            println!("  {} {} {}: {}", "✗".red(), failure.entity, failure.id.bold(), failure.error.dimmed());
        }
        let unlisted = report.failure_count as usize - report.failures.len();
        if unlisted > 0 {
            println!("  {} more not listed", unlisted);
        }
    }
}

pub fn print_consistency(report: &ConsistencyReport) {
    println!("{}", "Consistency Check".bold());
    println!("{}", "─".repeat(50));
    println!("  {:<8} {:>10} {:>10}", "", "primary", "graph");
    for (name, counts) in [("Items", report.items), ("Events", report.events)] {
        let graph = if counts.matches() {
            counts.graph.to_string().green()
        } else {
            counts.graph.to_string().red()
        };
        println!("  {:<8} {:>10} {:>10}", name, counts.primary, graph);
    }
    println!(
        "  Sampled {} item(s) and {} event(s)",
        report.sampled_items, report.sampled_events
    );

    for mismatch in &report.mismatches {
        println!(
            "  {} {} {} ({:?})",
            "✗".red(),
            mismatch.entity,
            mismatch.id.bold(),
            mismatch.kind
        );
    }
    for orphan in &report.orphans {
        println!("  {} item {} exists only in the graph", "✗".red(), orphan.bold());
    }

    println!();
    if report.is_consistent() {
        println!("{} Stores are consistent", "✓".green().bold());
    } else {
        println!(
            "{} {} mismatch(es); run `bagtrail sync incremental` or `bagtrail sync full`",
            "⚠".yellow().bold(),
            report.mismatch_count()
        );
    }
}

pub fn print_queue_health(health: &QueueHealth) {
    println!("{}", "Sync Queue".bold());
    println!("{}", "─".repeat(40));
    println!("  Pending:   {}", health.pending.to_string().yellow());
    println!("  Retrying:  {}", health.retrying.to_string().yellow());
    println!("  Abandoned: {}", health.abandoned.to_string().red());
    println!("  Resolved:  {}", health.resolved.to_string().green());
    match (health.oldest_pending_at, health.oldest_pending_age_seconds) {
        (Some(at), Some(age)) => println!("  Oldest:    {} ({}s)", format_ts(&at), age),
        _ => println!("  Oldest:    {}", "none".dimmed()),
    }
}

pub fn print_queue_entries(entries: &[SyncQueueEntry]) {
    if entries.is_empty() {
        println!("{}", "No queue entries.".dimmed());
        return;
    }

    println!(
        "{:<6} {:<10} {:<22} {:<9} {:<8} {}",
        "ID", "Status", "Operation", "Attempts", "Target", "Reason"
    );
    println!("{}", "─".repeat(80));
    for entry in entries {
        println!(
            "{:<6} {:<10} {:<22} {:<9} {:<8} {}",
            entry.id,
            queue_status_colored(entry.status),
            entry.operation.as_str(),
            entry.attempts,
            truncate(entry.target.id(), 8),
            truncate(&entry.failure_reason, 40).dimmed()
        );
    }
}

pub fn print_audit(records: &[AuditRecord]) {
    if records.is_empty() {
        println!("{}", "No audit records.".dimmed());
        return;
    }

    println!(
        "{:<20} {:<22} {:<16} {:<10} {:>8} {:>8}",
        "Time", "Operation", "Target", "Outcome", "Primary", "Graph"
    );
    println!("{}", "─".repeat(90));
    for record in records {
        println!(
            "{:<20} {:<22} {:<16} {:<10} {:>8} {:>8}",
            format_ts(&record.recorded_at),
            record.operation.as_str(),
            truncate(&record.target, 16),
            outcome_colored(record.outcome),
            latency(record.primary_latency_ms),
            latency(record.graph_latency_ms)
        );
    }
}

fn status_colored(status: ItemStatus) -> ColoredString {
    match status {
        ItemStatus::Delivered => status.as_str().green(),
        ItemStatus::Lost | ItemStatus::Misrouted => status.as_str().red(),
        ItemStatus::Loaded => status.as_str().cyan(),
        ItemStatus::InTransit => status.as_str().yellow(),
        ItemStatus::CheckedIn => status.as_str().normal(),
    }
}

fn tier_colored(tier: RiskTier) -> ColoredString {
    match tier {
        RiskTier::Low => tier.as_str().green(),
        RiskTier::Medium => tier.as_str().yellow(),
        RiskTier::High => tier.as_str().red(),
        RiskTier::Critical => tier.as_str().red().bold(),
    }
}

fn queue_status_colored(status: SyncQueueStatus) -> ColoredString {
    match status {
        SyncQueueStatus::Pending | SyncQueueStatus::Retrying => status.as_str().yellow(),
        SyncQueueStatus::Resolved => status.as_str().green(),
        SyncQueueStatus::Abandoned => status.as_str().red(),
    }
}

fn outcome_colored(outcome: AuditOutcome) -> ColoredString {
    match outcome {
        AuditOutcome::Applied => outcome.as_str().green(),
        AuditOutcome::Replayed | AuditOutcome::Superseded => outcome.as_str().cyan(),
        AuditOutcome::Degraded => outcome.as_str().yellow(),
        AuditOutcome::Rejected | AuditOutcome::Failed => outcome.as_str().red(),
    }
}

fn off_route_marker(off_route: bool) -> ColoredString {
    if off_route {
        " (off route)".red()
    } else {
        "".normal()
    }
}

fn latency(ms: Option<u64>) -> String {
    ms.map(|ms| format!("{}ms", ms)).unwrap_or_else(|| "-".to_string())
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Truncate a string to a maximum number of characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
