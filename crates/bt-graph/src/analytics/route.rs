//! Remaining route to an item's destination over `CONNECTS_TO` legs.

use bt_core::store::{GraphStore, NodeKey, Relation};
use bt_core::BtResult;
use serde::Serialize;

use super::journey::require_item;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub from: String,
    pub to: String,
    /// Location codes, both ends included.
    pub stops: Vec<String>,
}

impl Route {
    pub fn legs(&self) -> usize {
        self.stops.len().saturating_sub(1)
    }
}

/// Shortest leg path from the current location to the final routing stop.
///
/// `None` when no path exists, e.g. for a misrouted item whose location has
/// no outbound legs.
pub async fn route_to_destination(graph: &dyn GraphStore, tag: &str) -> BtResult<Option<Route>> {
    let item = require_item(graph, tag).await?;
    let Some(destination) = item.destination() else {
        return Ok(None);
    };

    let path = graph
        .shortest_path(
            &NodeKey::Location(item.current_location.clone()),
            &NodeKey::Location(destination.to_string()),
            Relation::ConnectsTo,
        )
        .await?;

    Ok(path.map(|keys| Route {
        from: item.current_location.clone(),
        to: destination.to_string(),
        stops: keys.iter().map(|k| k.key().to_string()).collect(),
    }))
}
