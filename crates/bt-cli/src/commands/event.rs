//! Event commands.

use anyhow::{Context, Result};
use bt_core::model::EventType;
use bt_core::operation::RecordEvent;
use bt_core::time;
use chrono::{DateTime, Utc};
use clap::Subcommand;

use crate::output;
use crate::stores::Stores;

#[derive(Subcommand)]
pub enum EventCommands {
    /// Record a scan or status event
    Record {
        /// Event id; resubmitting the same id is a no-op
        #[arg(long)]
        id: String,

        /// Item tag
        #[arg(long)]
        tag: String,

        /// check_in, sortation, load, arrival or custom
        #[arg(long = "type", value_parser = parse_event_type)]
        event_type: EventType,

        /// Location code
        #[arg(long)]
        location: String,

        /// Scan time, RFC 3339 (defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Raw scanner payload as JSON
        #[arg(long)]
        payload: Option<String>,
    },
}

pub async fn execute(cmd: EventCommands, stores: &Stores, json: bool) -> Result<()> {
    match cmd {
        EventCommands::Record {
            id,
            tag,
            event_type,
            location,
            at,
            payload,
        } => {
            let payload = match payload {
                Some(raw) => serde_json::from_str(&raw).context("--payload is not valid JSON")?,
                None => serde_json::Value::Null,
            };
            let result = stores
                .coordinator()
                .record_event(RecordEvent {
                    event_id: id,
                    tag,
                    event_type,
                    location,
                    timestamp: at.unwrap_or_else(time::now),
                    payload,
                })
                .await?;

            if json {
                output::print_json(&result)
            } else {
                output::print_operation(&result);
                Ok(())
            }
        }
    }
}

fn parse_event_type(s: &str) -> Result<EventType, String> {
    EventType::parse(s).ok_or_else(|| {
        format!(
            "unknown event type '{}', expected check_in, sortation, load, arrival or custom",
            s
        )
    })
}
