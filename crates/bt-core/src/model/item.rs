//! Item (bag) domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::{Event, EventType};

/// A tracked bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub tag: String,
    pub status: ItemStatus,
    pub current_location: String,
    /// Planned itinerary, in order.
    pub routing: Vec<String>,
    /// Set exactly when `current_location` is not part of `routing`.
    pub off_route: bool,
    pub risk_score: f64,
    pub risk_updated_at: Option<DateTime<Utc>>,
    pub owner_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Timestamp of the most recent in-order event (creation time before any).
    pub last_seen_at: DateTime<Utc>,
}

impl Item {
    /// Build a freshly checked-in item.
    pub fn checked_in(
        tag: &str,
        routing: Vec<String>,
        origin: &str,
        owner_ref: Option<String>,
        risk_score: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let off_route = !routing.iter().any(|stop| stop == origin);
        Self {
            tag: tag.to_string(),
            status: ItemStatus::CheckedIn,
            current_location: origin.to_string(),
            routing,
            off_route,
            risk_score,
            risk_updated_at: None,
            owner_ref,
            created_at: now,
            updated_at: now,
            last_seen_at: now,
        }
    }

    /// Final stop of the itinerary.
    pub fn destination(&self) -> Option<&str> {
        self.routing.last().map(String::as_str)
    }

    pub fn is_on_route(&self, location: &str) -> bool {
        self.routing.iter().any(|stop| stop == location)
    }

    /// Move the item according to an in-order event.
    ///
    /// Out-of-order events must not be passed here; they are stored but
    /// never move the item.
    pub fn observe(&mut self, event: &Event, now: DateTime<Utc>) {
        self.current_location = event.location.clone();
        self.off_route = !self.is_on_route(&event.location);
        self.last_seen_at = event.timestamp;
        self.updated_at = now;

        if self.status.is_terminal() {
            return;
        }

        let next = match event.event_type {
            EventType::Custom => self.status,
            _ if self.off_route => ItemStatus::Misrouted,
            EventType::CheckIn => ItemStatus::CheckedIn,
            EventType::Sortation => ItemStatus::InTransit,
            EventType::Load => ItemStatus::Loaded,
            EventType::Arrival if self.destination() == Some(event.location.as_str()) => {
                ItemStatus::Delivered
            }
            EventType::Arrival => ItemStatus::InTransit,
        };
        self.status = next;
    }

    /// Field-level equality of what both stores hold for this item.
    ///
    /// `updated_at` is excluded: it reflects write time, not item state.
    pub fn same_state(&self, other: &Item) -> bool {
        self.tag == other.tag
            && self.status == other.status
            && self.current_location == other.current_location
            && self.routing == other.routing
            && self.off_route == other.off_route
            && (self.risk_score - other.risk_score).abs() < 1e-9
            && self.risk_updated_at == other.risk_updated_at
            && self.owner_ref == other.owner_ref
            && self.last_seen_at == other.last_seen_at
    }
}

/// Item lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    CheckedIn,
    InTransit,
    Loaded,
    Delivered,
    Lost,
    Misrouted,
}

impl ItemStatus {
    pub const ALL: [ItemStatus; 6] = [
        Self::CheckedIn,
        Self::InTransit,
        Self::Loaded,
        Self::Delivered,
        Self::Lost,
        Self::Misrouted,
    ];

    /// Parse from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "checked_in" => Some(Self::CheckedIn),
            "in_transit" => Some(Self::InTransit),
            "loaded" => Some(Self::Loaded),
            "delivered" => Some(Self::Delivered),
            "lost" => Some(Self::Lost),
            "misrouted" => Some(Self::Misrouted),
            _ => None,
        }
    }

    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckedIn => "checked_in",
            Self::InTransit => "in_transit",
            Self::Loaded => "loaded",
            Self::Delivered => "delivered",
            Self::Lost => "lost",
            Self::Misrouted => "misrouted",
        }
    }

    /// Delivered and lost items are never moved again by events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Lost)
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 10, min, 0).unwrap()
    }

    fn route() -> Vec<String> {
        vec!["JFK".into(), "LHR".into(), "NBO".into()]
    }

    fn event(kind: EventType, location: &str, at: DateTime<Utc>) -> Event {
        Event {
            event_id: format!("ev-{}", at.timestamp()),
            tag: "X1".into(),
            event_type: kind,
            location: location.into(),
            timestamp: at,
            payload: serde_json::Value::Null,
            out_of_order: false,
            recorded_at: at,
        }
    }

    #[test]
    fn test_checked_in_flags_off_route_origin() {
        let on = Item::checked_in("X1", route(), "JFK", None, 0.1, ts(0));
        assert!(!on.off_route);
        let off = Item::checked_in("X2", route(), "ORD", None, 0.1, ts(0));
        assert!(off.off_route);
    }

    #[test]
    fn test_observe_walks_lifecycle() {
        let mut item = Item::checked_in("X1", route(), "JFK", None, 0.0, ts(0));

        item.observe(&event(EventType::Sortation, "JFK", ts(5)), ts(5));
        assert_eq!(item.status, ItemStatus::InTransit);

        item.observe(&event(EventType::Load, "JFK", ts(20)), ts(20));
        assert_eq!(item.status, ItemStatus::Loaded);

        item.observe(&event(EventType::Arrival, "LHR", ts(40)), ts(40));
        assert_eq!(item.status, ItemStatus::InTransit);
        assert_eq!(item.current_location, "LHR");

        item.observe(&event(EventType::Arrival, "NBO", ts(59)), ts(59));
        assert_eq!(item.status, ItemStatus::Delivered);
        assert_eq!(item.last_seen_at, ts(59));
    }

    #[test]
    fn test_off_route_scan_marks_misrouted() {
        let mut item = Item::checked_in("X1", route(), "JFK", None, 0.0, ts(0));
        item.observe(&event(EventType::Arrival, "CDG", ts(30)), ts(30));
        assert_eq!(item.status, ItemStatus::Misrouted);
        assert!(item.off_route);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut item = Item::checked_in("X1", route(), "JFK", None, 0.0, ts(0));
        item.status = ItemStatus::Lost;
        item.observe(&event(EventType::Sortation, "LHR", ts(10)), ts(10));
        assert_eq!(item.status, ItemStatus::Lost);
        assert_eq!(item.current_location, "LHR");
    }

    #[test]
    fn test_custom_event_keeps_status() {
        let mut item = Item::checked_in("X1", route(), "JFK", None, 0.0, ts(0));
        item.observe(&event(EventType::Load, "JFK", ts(3)), ts(3));
        item.observe(&event(EventType::Custom, "JFK", ts(4)), ts(4));
        assert_eq!(item.status, ItemStatus::Loaded);
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in ItemStatus::ALL {
            assert_eq!(ItemStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ItemStatus::parse("teleported"), None);
    }
}
