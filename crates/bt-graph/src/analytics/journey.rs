//! Journey reconstruction and current-location resolution.

use bt_core::model::{Event, Item};
use bt_core::store::{Direction, GraphNode, GraphStore, NodeKey, Relation};
use bt_core::validation::validate_tag;
use bt_core::{BtError, BtResult};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where an item is, according to the graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentLocation {
    pub tag: String,
    pub location: String,
    /// Event the location was taken from; `None` before the first scan.
    pub event_id: Option<String>,
    pub observed_at: DateTime<Utc>,
    pub off_route: bool,
}

/// Load an item node or fail with `NotFound`.
pub(crate) async fn require_item(graph: &dyn GraphStore, tag: &str) -> BtResult<Item> {
    validate_tag(tag)?;
    graph
        .get_item(tag)
        .await?
        .ok_or_else(|| BtError::NotFound(format!("item {}", tag)))
}

/// Events of an item via `HAS_EVENT`, ordered by timestamp then event id.
///
/// An item without events yields an empty journey.
pub async fn get_journey(graph: &dyn GraphStore, tag: &str) -> BtResult<Vec<Event>> {
    require_item(graph, tag).await?;
    load_events(graph, tag).await
}

pub(crate) async fn load_events(graph: &dyn GraphStore, tag: &str) -> BtResult<Vec<Event>> {
    let nodes = graph
        .neighbors(&NodeKey::Item(tag.to_string()), Relation::HasEvent, Direction::Outgoing)
        .await?;
    let mut events: Vec<Event> = nodes
        .into_iter()
        .filter_map(|node| match node {
            GraphNode::Event(event) => Some(event),
            _ => None,
        })
        .collect();
    events.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    Ok(events)
}

/// Location of the latest event, ties broken by event id.
pub async fn get_current_location(graph: &dyn GraphStore, tag: &str) -> BtResult<CurrentLocation> {
    let item = require_item(graph, tag).await?;
    let events = load_events(graph, tag).await?;

    Ok(match events.last() {
        Some(latest) => CurrentLocation {
            tag: item.tag.clone(),
            location: latest.location.clone(),
            event_id: Some(latest.event_id.clone()),
            observed_at: latest.timestamp,
            off_route: !item.is_on_route(&latest.location),
        },
        None => CurrentLocation {
            tag: item.tag.clone(),
            location: item.current_location.clone(),
            event_id: None,
            observed_at: item.last_seen_at,
            off_route: item.off_route,
        },
    })
}
