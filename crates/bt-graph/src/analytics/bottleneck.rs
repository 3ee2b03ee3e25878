//! Bottleneck detection over active items.

use std::collections::BTreeMap;

use bt_core::model::Item;
use bt_core::store::{GraphStore, ItemPredicate, TimeWindow};
use bt_core::{BtError, BtResult};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::risk::RiskTier;

/// A location holding too many active items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bottleneck {
    pub location: String,
    pub item_count: usize,
    pub mean_risk: f64,
    pub severity: RiskTier,
    pub tags: Vec<String>,
}

pub async fn detect_bottlenecks_at(
    graph: &dyn GraphStore,
    now: DateTime<Utc>,
    window: Duration,
    min_count: usize,
) -> BtResult<Vec<Bottleneck>> {
    if window <= Duration::zero() {
        return Err(BtError::validation("bottleneck window must be positive"));
    }
    if min_count == 0 {
        return Err(BtError::validation("minimum item count must be at least 1"));
    }

    let items = graph
        .items_matching(&TimeWindow::ending_at(now, window), &ItemPredicate::active())
        .await?;
    Ok(rank(items, min_count))
}

/// Group by current location, keep those with at least `min_count` items,
/// most crowded first.
pub fn rank(items: Vec<Item>, min_count: usize) -> Vec<Bottleneck> {
    let mut by_location: BTreeMap<String, Vec<Item>> = BTreeMap::new();
    for item in items {
        by_location
            .entry(item.current_location.clone())
            .or_default()
            .push(item);
    }

    let mut bottlenecks: Vec<Bottleneck> = by_location
        .into_iter()
        .filter(|(_, items)| items.len() >= min_count)
        .map(|(location, items)| {
            let item_count = items.len();
            let mean_risk = items.iter().map(|i| i.risk_score).sum::<f64>() / item_count as f64;
            let mut severity = RiskTier::from_score(mean_risk);
            if item_count >= min_count.saturating_mul(2) {
                severity = severity.escalate();
            }
            Bottleneck {
                location,
                item_count,
                mean_risk,
                severity,
                tags: items.into_iter().map(|i| i.tag).collect(),
            }
        })
        .collect();

    bottlenecks.sort_by(|a, b| {
        b.item_count
            .cmp(&a.item_count)
            .then(b.mean_risk.total_cmp(&a.mean_risk))
            .then_with(|| a.location.cmp(&b.location))
    });
    bottlenecks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(tag: &str, location: &str, risk: f64) -> Item {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap();
        Item::checked_in(tag, vec![location.into()], location, None, risk, now)
    }

    #[test]
    fn test_ranks_by_count_then_risk() {
        let mut items = Vec::new();
        for n in 0..3 {
            items.push(item(&format!("A{}", n), "AAA", 0.1));
            items.push(item(&format!("B{}", n), "BBB", 0.7));
        }
        items.push(item("C0", "CCC", 0.9));
        items.push(item("C1", "CCC", 0.9));
        items.push(item("C2", "CCC", 0.9));
        items.push(item("C3", "CCC", 0.9));

        let ranked = rank(items, 3);
        let order: Vec<_> = ranked.iter().map(|b| b.location.as_str()).collect();
        assert_eq!(order, vec!["CCC", "BBB", "AAA"]);
        assert_eq!(ranked[1].severity, RiskTier::High);
        assert_eq!(ranked[2].severity, RiskTier::Low);
    }

    #[test]
    fn test_double_threshold_escalates_severity() {
        let items = (0..4).map(|n| item(&format!("T{}", n), "HUB", 0.1)).collect();
        let ranked = rank(items, 2);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].severity, RiskTier::Medium);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let items = (0..5).map(|n| item(&format!("T{}", n), "HUB", 0.5)).collect();
        assert_eq!(rank(items, 5).len(), 1);
    }
}
