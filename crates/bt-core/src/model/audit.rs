//! Audit trail of coordinator calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::operation::OperationKind;

/// One record per `apply` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub operation: OperationKind,
    pub target: String,
    pub stores_touched: Vec<StoreKind>,
    pub primary_latency_ms: Option<u64>,
    pub graph_latency_ms: Option<u64>,
    pub degraded: bool,
    pub outcome: AuditOutcome,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Primary,
    Graph,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Graph => "graph",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "primary" => Some(Self::Primary),
            "graph" => Some(Self::Graph),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Applied,
    Replayed,
    Superseded,
    Degraded,
    Rejected,
    Failed,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Replayed => "replayed",
            Self::Superseded => "superseded",
            Self::Degraded => "degraded",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "applied" => Some(Self::Applied),
            "replayed" => Some(Self::Replayed),
            "superseded" => Some(Self::Superseded),
            "degraded" => Some(Self::Degraded),
            "rejected" => Some(Self::Rejected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
