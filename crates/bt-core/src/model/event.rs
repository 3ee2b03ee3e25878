//! Scan/status event model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable observation of an item at a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Externally supplied; replays with the same id are no-ops.
    pub event_id: String,
    pub tag: String,
    pub event_type: EventType,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    /// Opaque, kept for audit.
    pub payload: serde_json::Value,
    /// Earlier than an event already recorded for the same item.
    pub out_of_order: bool,
    /// When the primary store accepted the event.
    pub recorded_at: DateTime<Utc>,
}

impl Event {
    /// Ordering key used everywhere a journey is sorted.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.timestamp, self.event_id.as_str())
    }
}

/// Kind of scan or status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CheckIn,
    Sortation,
    Load,
    Arrival,
    Custom,
}

impl EventType {
    /// Parse from string. Accepts `check_in`, `check-in` and `checkin`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "check_in" | "checkin" => Some(Self::CheckIn),
            "sortation" => Some(Self::Sortation),
            "load" => Some(Self::Load),
            "arrival" => Some(Self::Arrival),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "check_in",
            Self::Sortation => "sortation",
            Self::Load => "load",
            Self::Arrival => "arrival",
            Self::Custom => "custom",
        }
    }

    /// Sortation and loading count as "ready" for a connection.
    pub fn is_handling_stage(&self) -> bool {
        matches!(self, Self::Sortation | Self::Load)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
