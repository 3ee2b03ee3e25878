//! Read-only analytics over the graph store.
//!
//! The graph lags the primary store, so every answer carries a
//! `data_freshness` stamp derived from the newest record the graph holds.

pub mod bottleneck;
pub mod journey;
pub mod risk;
pub mod route;

use std::sync::Arc;

use bt_core::config::RiskConfig;
use bt_core::model::Event;
use bt_core::store::GraphStore;
use bt_core::{time, BtResult};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

pub use bottleneck::Bottleneck;
pub use journey::CurrentLocation;
pub use risk::{RiskAssessment, RiskFactor, RiskFactorKind, RiskTier};
pub use route::Route;

/// How current the graph was when a result was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataFreshness {
    /// Newest write the graph has absorbed.
    pub graph_as_of: DateTime<Utc>,
    pub age_seconds: i64,
}

/// A query result plus its freshness caveat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fresh<T> {
    pub data: T,
    /// `None` when the graph is empty or does not track write times.
    pub data_freshness: Option<DataFreshness>,
}

/// Graph analytics entry point.
#[derive(Clone)]
pub struct AnalyticsEngine {
    graph: Arc<dyn GraphStore>,
    risk: RiskConfig,
}

impl AnalyticsEngine {
    pub fn new(graph: Arc<dyn GraphStore>, risk: RiskConfig) -> Self {
        Self { graph, risk }
    }

    async fn fresh<T>(&self, data: T) -> BtResult<Fresh<T>> {
        let data_freshness = self.graph.last_write_at().await?.map(|graph_as_of| DataFreshness {
            graph_as_of,
            age_seconds: (time::now() - graph_as_of).num_seconds().max(0),
        });
        Ok(Fresh {
            data,
            data_freshness,
        })
    }

    pub async fn get_journey(&self, tag: &str) -> BtResult<Fresh<Vec<Event>>> {
        let events = journey::get_journey(self.graph.as_ref(), tag).await?;
        debug!(tag, events = events.len(), "Journey reconstructed");
        self.fresh(events).await
    }

    pub async fn get_current_location(&self, tag: &str) -> BtResult<Fresh<CurrentLocation>> {
        let location = journey::get_current_location(self.graph.as_ref(), tag).await?;
        self.fresh(location).await
    }

    pub async fn assess_connection_risk(
        &self,
        tag: &str,
        leg: &str,
        budget_minutes: f64,
    ) -> BtResult<Fresh<RiskAssessment>> {
        let assessment =
            risk::assess_connection_risk(self.graph.as_ref(), &self.risk, tag, leg, budget_minutes)
                .await?;
        debug!(tag, leg, score = assessment.score, tier = %assessment.tier, "Connection risk assessed");
        self.fresh(assessment).await
    }

    /// Locations holding at least `min_count` active items seen within
    /// `window`. The threshold is inclusive: `min_count` items is a bottleneck.
    pub async fn detect_bottlenecks(
        &self,
        window: Duration,
        min_count: usize,
    ) -> BtResult<Fresh<Vec<Bottleneck>>> {
        self.detect_bottlenecks_at(time::now(), window, min_count).await
    }

    /// [`Self::detect_bottlenecks`] with an explicit clock.
    pub async fn detect_bottlenecks_at(
        &self,
        now: DateTime<Utc>,
        window: Duration,
        min_count: usize,
    ) -> BtResult<Fresh<Vec<Bottleneck>>> {
        let found =
            bottleneck::detect_bottlenecks_at(self.graph.as_ref(), now, window, min_count).await?;
        self.fresh(found).await
    }

    pub async fn route_to_destination(&self, tag: &str) -> BtResult<Fresh<Option<Route>>> {
        let found = route::route_to_destination(self.graph.as_ref(), tag).await?;
        self.fresh(found).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryGraphStore;
    use bt_core::model::{EventType, Item};
    use bt_core::store::GraphMutation;
    use bt_core::BtError;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, hour, minute, 0).unwrap()
    }

    fn routing() -> Vec<String> {
        vec!["JFK".into(), "LHR".into(), "NBO".into()]
    }

    async fn put_item(graph: &InMemoryGraphStore, item: Item) {
        graph
            .apply(&GraphMutation::UpsertItem { item })
            .await
            .unwrap();
    }

    async fn put_event(graph: &InMemoryGraphStore, id: &str, tag: &str, kind: EventType, location: &str, ts: DateTime<Utc>) {
        let event = Event {
            event_id: id.into(),
            tag: tag.into(),
            event_type: kind,
            location: location.into(),
            timestamp: ts,
            payload: serde_json::Value::Null,
            out_of_order: false,
            recorded_at: ts,
        };
        graph
            .apply(&GraphMutation::UpsertEvent { event })
            .await
            .unwrap();
    }

    fn engine(graph: Arc<InMemoryGraphStore>) -> AnalyticsEngine {
        AnalyticsEngine::new(graph, RiskConfig::default())
    }

    #[tokio::test]
    async fn test_journey_is_time_ordered_whatever_the_insert_order() {
        let graph = Arc::new(InMemoryGraphStore::new());
        put_item(&graph, Item::checked_in("X1", routing(), "JFK", None, 0.1, at(8, 0))).await;
        put_event(&graph, "E3", "X1", EventType::Arrival, "LHR", at(9, 30)).await;
        put_event(&graph, "E1", "X1", EventType::CheckIn, "JFK", at(8, 5)).await;
        put_event(&graph, "E2", "X1", EventType::Load, "JFK", at(8, 45)).await;

        let journey = engine(graph).get_journey("X1").await.unwrap();
        let ids: Vec<_> = journey.data.iter().map(|e| e.event_id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E2", "E3"]);
        assert_eq!(journey.data_freshness.map(|f| f.graph_as_of), Some(at(9, 30)));
    }

    #[tokio::test]
    async fn test_items_without_events_have_empty_journeys() {
        let graph = Arc::new(InMemoryGraphStore::new());
        put_item(&graph, Item::checked_in("X1", routing(), "JFK", None, 0.1, at(8, 0))).await;
        put_item(&graph, Item::checked_in("X2", routing(), "JFK", None, 0.1, at(8, 0))).await;
        let engine = engine(graph);

        assert!(engine.get_journey("X1").await.unwrap().data.is_empty());
        assert!(engine.get_journey("X2").await.unwrap().data.is_empty());
        assert!(matches!(
            engine.get_journey("NEVER").await,
            Err(BtError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_current_location_breaks_ties_by_event_id() {
        let graph = Arc::new(InMemoryGraphStore::new());
        put_item(&graph, Item::checked_in("X1", routing(), "JFK", None, 0.1, at(8, 0))).await;
        let engine = engine(graph.clone());

        let before = engine.get_current_location("X1").await.unwrap().data;
        assert_eq!(before.location, "JFK");
        assert_eq!(before.event_id, None);

        put_event(&graph, "E-b", "X1", EventType::Sortation, "LHR", at(9, 0)).await;
        put_event(&graph, "E-a", "X1", EventType::Sortation, "JFK", at(9, 0)).await;
        let now = engine.get_current_location("X1").await.unwrap().data;
        assert_eq!(now.location, "LHR");
        assert_eq!(now.event_id.as_deref(), Some("E-b"));
    }

    #[tokio::test]
    async fn test_short_connection_after_sortation_is_at_least_medium() {
        let graph = Arc::new(InMemoryGraphStore::new());
        put_item(&graph, Item::checked_in("X1", routing(), "JFK", None, 0.3, at(8, 0))).await;
        put_event(&graph, "E1", "X1", EventType::Sortation, "JFK", at(8, 10)).await;

        let assessment = engine(graph)
            .assess_connection_risk("X1", "BA117", 35.0)
            .await
            .unwrap()
            .data;
        assert!(assessment.tier >= RiskTier::Medium);
        assert!(assessment
            .factors
            .iter()
            .any(|f| f.kind == RiskFactorKind::TimeDeficit));
    }

    #[tokio::test]
    async fn test_risk_rejects_bad_input() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let engine = engine(graph);
        assert!(matches!(
            engine.assess_connection_risk("X1", "", 30.0).await,
            Err(BtError::Validation(_))
        ));
        assert!(matches!(
            engine.assess_connection_risk("X1", "BA117", f64::NAN).await,
            Err(BtError::Validation(_))
        ));
        assert!(matches!(
            engine.assess_connection_risk("X1", "BA117", 30.0).await,
            Err(BtError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_single_bottleneck_in_two_hour_window() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let now = at(12, 0);
        for n in 0..8 {
            let mut item = Item::checked_in(&format!("A{}", n), vec!["A".into(), "Z".into()], "A", None, 0.4, at(11, 0));
            item.last_seen_at = at(11, n);
            put_item(&graph, item).await;
        }
        for n in 0..2 {
            put_item(&graph, Item::checked_in(&format!("B{}", n), vec!["B".into(), "Z".into()], "B", None, 0.4, at(11, 0))).await;
        }
        // Outside the window and delivered items do not count.
        put_item(&graph, Item::checked_in("OLD", vec!["A".into()], "A", None, 0.4, at(6, 0))).await;
        let mut done = Item::checked_in("DONE", vec!["A".into()], "A", None, 0.4, at(11, 0));
        done.status = bt_core::ItemStatus::Delivered;
        put_item(&graph, done).await;

        let found = engine(graph)
            .detect_bottlenecks_at(now, Duration::hours(2), 5)
            .await
            .unwrap()
            .data;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].location, "A");
        assert_eq!(found[0].item_count, 8);
        assert_eq!(found[0].severity, RiskTier::Medium);
    }

    #[tokio::test]
    async fn test_huge_bottleneck_window_covers_all_history() {
        let graph = Arc::new(InMemoryGraphStore::new());
        put_item(&graph, Item::checked_in("OLD", vec!["A".into()], "A", None, 0.4, at(6, 0))).await;
        put_item(&graph, Item::checked_in("NEW", vec!["A".into()], "A", None, 0.4, at(11, 0))).await;

        let found = engine(graph)
            .detect_bottlenecks_at(at(12, 0), Duration::days(200_000_000), 2)
            .await
            .unwrap()
            .data;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].item_count, 2);
    }

    #[tokio::test]
    async fn test_route_follows_remaining_legs() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let mut item = Item::checked_in("X1", routing(), "JFK", None, 0.1, at(8, 0));
        put_item(&graph, item.clone()).await;
        let engine = engine(graph.clone());

        let route = engine.route_to_destination("X1").await.unwrap().data.unwrap();
        assert_eq!(route.stops, vec!["JFK", "LHR", "NBO"]);
        assert_eq!(route.legs(), 2);

        item.current_location = "CDG".into();
        item.off_route = true;
        item.updated_at = at(9, 0);
        put_item(&graph, item).await;
        assert_eq!(engine.route_to_destination("X1").await.unwrap().data, None);
    }

    #[tokio::test]
    async fn test_offline_graph_surfaces_transient_error() {
        let graph = Arc::new(InMemoryGraphStore::new());
        graph.set_offline(true);
        assert!(matches!(
            engine(graph).get_journey("X1").await,
            Err(BtError::TransientStore(_))
        ));
    }
}
