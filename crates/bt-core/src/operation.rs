//! Write operations accepted by the consistency coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Event, EventType, Item, ItemStatus};

/// A state-changing command from the decision layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    CreateItem(CreateItem),
    RecordEvent(RecordEvent),
    UpdateDerivedField(UpdateDerivedField),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateItem(_) => OperationKind::CreateItem,
            Self::RecordEvent(_) => OperationKind::RecordEvent,
            Self::UpdateDerivedField(_) => OperationKind::UpdateDerivedField,
        }
    }

    /// Caller-supplied key that makes the operation idempotent.
    pub fn idempotency_key(&self) -> &str {
        match self {
            Self::CreateItem(op) => &op.tag,
            Self::RecordEvent(op) => &op.event_id,
            Self::UpdateDerivedField(op) => &op.request_id,
        }
    }

    /// Tag of the item the operation mutates.
    pub fn tag(&self) -> &str {
        match self {
            Self::CreateItem(op) => &op.tag,
            Self::RecordEvent(op) => &op.tag,
            Self::UpdateDerivedField(op) => &op.tag,
        }
    }

    /// Stable JSON used to tell a replay from a conflicting reuse of a key.
    ///
    /// Object keys come out sorted, so equal operations give equal strings.
    pub fn canonical_payload(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        serde_json::to_string(&sorted_keys(value))
    }
}

/// Rebuild objects with keys in sorted order, whatever map backs `Value`.
fn sorted_keys(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sorted_keys(v)))
                    .collect(),
            )
        }
        serde_json::Value::Array(values) => {
            serde_json::Value::Array(values.into_iter().map(sorted_keys).collect())
        }
        other => other,
    }
}

/// Register a bag at check-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateItem {
    pub tag: String,
    pub routing: Vec<String>,
    /// Check-in location.
    pub origin: String,
    #[serde(default)]
    pub owner_ref: Option<String>,
    #[serde(default)]
    pub risk_score: f64,
}

/// Record a scan or status event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEvent {
    pub event_id: String,
    pub tag: String,
    pub event_type: EventType,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RecordEvent {
    /// Materialize the stored event.
    pub fn to_event(&self, out_of_order: bool, recorded_at: DateTime<Utc>) -> Event {
        Event {
            event_id: self.event_id.clone(),
            tag: self.tag.clone(),
            event_type: self.event_type,
            location: self.location.clone(),
            timestamp: self.timestamp,
            payload: self.payload.clone(),
            out_of_order,
            recorded_at,
        }
    }
}

/// Set a field computed outside this core (risk agents, operators).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDerivedField {
    pub request_id: String,
    pub tag: String,
    pub field: DerivedField,
    /// When the value was computed; older risk values never overwrite newer ones.
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum DerivedField {
    RiskScore(f64),
    Status(ItemStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    CreateItem,
    RecordEvent,
    UpdateDerivedField,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateItem => "create_item",
            Self::RecordEvent => "record_event",
            Self::UpdateDerivedField => "update_derived_field",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create_item" => Some(Self::CreateItem),
            "record_event" => Some(Self::RecordEvent),
            "update_derived_field" => Some(Self::UpdateDerivedField),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the primary store did with an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteDisposition {
    Applied,
    /// Same key, same payload: nothing changed.
    Replayed,
    /// Accepted but older than what is stored: nothing changed.
    Superseded,
}

impl WriteDisposition {
    pub fn changed_state(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Outcome of a primary write, carrying the state the graph has to mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryWrite {
    pub disposition: WriteDisposition,
    pub item: Item,
    pub event: Option<Event>,
}

/// What `apply` returns to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub operation: OperationKind,
    pub target: String,
    pub disposition: WriteDisposition,
    /// Primary write succeeded, graph write is queued.
    pub degraded: bool,
    pub item: Item,
    pub queued_entry: Option<i64>,
    pub primary_latency_ms: u64,
    pub graph_latency_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(payload: serde_json::Value) -> Operation {
        Operation::RecordEvent(RecordEvent {
            event_id: "E1".into(),
            tag: "X1".into(),
            event_type: EventType::Sortation,
            location: "JFK".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap(),
            payload,
        })
    }

    #[test]
    fn test_canonical_payload_ignores_key_order() {
        let a = record(serde_json::json!({"belt": 4, "scanner": "S1"}));
        let b = record(serde_json::json!({"scanner": "S1", "belt": 4}));
        assert_eq!(a.canonical_payload().unwrap(), b.canonical_payload().unwrap());
    }

    #[test]
    fn test_canonical_payload_differs_on_content() {
        let a = record(serde_json::json!({"belt": 4}));
        let b = record(serde_json::json!({"belt": 5}));
        assert_ne!(a.canonical_payload().unwrap(), b.canonical_payload().unwrap());
    }

    #[test]
    fn test_operation_json_shape() {
        let op = Operation::UpdateDerivedField(UpdateDerivedField {
            request_id: "r-1".into(),
            tag: "X1".into(),
            field: DerivedField::RiskScore(0.7),
            computed_at: Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap(),
        });
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["op"], "update_derived_field");
        assert_eq!(value["field"]["field"], "risk_score");
        assert_eq!(op.idempotency_key(), "r-1");

        let back: Operation = serde_json::from_value(value).unwrap();
        assert_eq!(back, op);
    }
}
