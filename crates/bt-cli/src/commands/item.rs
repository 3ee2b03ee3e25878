//! Item commands.

use anyhow::Result;
use bt_core::model::ItemStatus;
use bt_core::operation::{CreateItem, DerivedField, UpdateDerivedField};
use bt_core::time;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use uuid::Uuid;

use crate::output;
use crate::stores::Stores;

#[derive(Subcommand)]
pub enum ItemCommands {
    /// Register a checked-in item
    Create {
        /// Item tag
        #[arg(long)]
        tag: String,

        /// Planned route, comma-separated location codes
        #[arg(long, value_delimiter = ',', required = true)]
        routing: Vec<String>,

        /// Check-in location (defaults to the first routing stop)
        #[arg(long)]
        origin: Option<String>,

        /// Owner reference, e.g. a booking code
        #[arg(long)]
        owner: Option<String>,

        /// Initial risk score in [0, 1]
        #[arg(long, default_value = "0.0")]
        risk: f64,
    },

    /// Set an item's risk score
    SetRisk {
        /// Item tag
        tag: String,
        /// Score in [0, 1]
        score: f64,
        /// Idempotency key (generated when omitted)
        #[arg(long)]
        request_id: Option<String>,
        /// When the score was computed (defaults to now)
        #[arg(long)]
        computed_at: Option<DateTime<Utc>>,
    },

    /// Override an item's status
    SetStatus {
        /// Item tag
        tag: String,
        /// One of: checked_in, in_transit, loaded, delivered, lost, misrouted
        #[arg(value_parser = parse_status)]
        status: ItemStatus,
        /// Idempotency key (generated when omitted)
        #[arg(long)]
        request_id: Option<String>,
    },
}

pub async fn execute(cmd: ItemCommands, stores: &Stores, json: bool) -> Result<()> {
    let coordinator = stores.coordinator();

    let result = match cmd {
        ItemCommands::Create {
            tag,
            routing,
            origin,
            owner,
            risk,
        } => {
            let origin = origin
                .or_else(|| routing.first().cloned())
                .unwrap_or_default();
            coordinator
                .create_item(CreateItem {
                    tag,
                    routing,
                    origin,
                    owner_ref: owner,
                    risk_score: risk,
                })
                .await?
        }
        ItemCommands::SetRisk {
            tag,
            score,
            request_id,
            computed_at,
        } => {
            coordinator
                .update_derived_field(UpdateDerivedField {
                    request_id: request_id.unwrap_or_else(new_request_id),
                    tag,
                    field: DerivedField::RiskScore(score),
                    computed_at: computed_at.unwrap_or_else(time::now),
                })
                .await?
        }
        ItemCommands::SetStatus {
            tag,
            status,
            request_id,
        } => {
            coordinator
                .update_derived_field(UpdateDerivedField {
                    request_id: request_id.unwrap_or_else(new_request_id),
                    tag,
                    field: DerivedField::Status(status),
                    computed_at: time::now(),
                })
                .await?
        }
    };

    if json {
        output::print_json(&result)
    } else {
        output::print_operation(&result);
        Ok(())
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn parse_status(s: &str) -> Result<ItemStatus, String> {
    ItemStatus::parse(s).ok_or_else(|| {
        let known: Vec<&str> = ItemStatus::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown status '{}', expected one of: {}", s, known.join(", "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("LOST"), Ok(ItemStatus::Lost));
        let err = parse_status("gone").unwrap_err();
        assert!(err.contains("misrouted"));
    }
}
