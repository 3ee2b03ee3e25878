//! Connection-risk scoring.
//!
//! `score = clamp(base_weight * risk + deficit_weight * deficit + readiness_weight * readiness)`
//! where the deficit grows linearly as the connection budget drops below the
//! minimum connection time and saturates at 1 once the budget is gone, and
//! readiness is 1 until the item has been seen in sortation or loading.

use bt_core::config::RiskConfig;
use bt_core::model::EventType;
use bt_core::store::GraphStore;
use bt_core::{BtError, BtResult};
use serde::Serialize;

use super::journey::{load_events, require_item};

/// Discrete risk band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::Critical
        } else if score >= 0.6 {
            Self::High
        } else if score >= 0.3 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// One band up, saturating at critical.
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactorKind {
    BaseRisk,
    TimeDeficit,
    LocationReadiness,
}

/// One term of the score, kept for explainability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskFactor {
    pub kind: RiskFactorKind,
    /// Raw term value in [0, 1].
    pub value: f64,
    pub weight: f64,
    pub contribution: f64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub tag: String,
    pub leg: String,
    pub budget_minutes: f64,
    pub min_connection_minutes: f64,
    pub score: f64,
    pub tier: RiskTier,
    pub factors: Vec<RiskFactor>,
}

/// Deficit term: 0 with enough time, 1 with none, linear in between.
pub fn time_deficit(budget_minutes: f64, min_connection_minutes: f64) -> f64 {
    if budget_minutes >= min_connection_minutes {
        0.0
    } else if budget_minutes <= 0.0 {
        1.0
    } else {
        ((min_connection_minutes - budget_minutes) / min_connection_minutes).clamp(0.0, 1.0)
    }
}

/// Score an item's connection from its base risk and latest handling stage.
pub fn score_connection(
    base_risk: f64,
    budget_minutes: f64,
    latest_stage: Option<EventType>,
    config: &RiskConfig,
) -> (f64, RiskTier, Vec<RiskFactor>) {
    let deficit = time_deficit(budget_minutes, config.min_connection_minutes);
    let ready = latest_stage.is_some_and(|stage| stage.is_handling_stage());
    let readiness = if ready { 0.0 } else { 1.0 };

    let terms = [
        (
            RiskFactorKind::BaseRisk,
            base_risk,
            config.base_weight,
            format!("item carries a base risk of {:.2}", base_risk),
        ),
        (
            RiskFactorKind::TimeDeficit,
            deficit,
            config.deficit_weight,
            format!(
                "{:.0} min available against a {:.0} min minimum connection time",
                budget_minutes, config.min_connection_minutes
            ),
        ),
        (
            RiskFactorKind::LocationReadiness,
            readiness,
            config.readiness_weight,
            match latest_stage {
                Some(stage) => format!("last observed at {} stage", stage),
                None => "no scans recorded yet".to_string(),
            },
        ),
    ];

    let factors: Vec<RiskFactor> = terms
        .into_iter()
        .filter(|(_, value, _, _)| *value > 0.0)
        .map(|(kind, value, weight, detail)| RiskFactor {
            kind,
            value,
            weight,
            contribution: value * weight,
            detail,
        })
        .collect();

    let score = factors
        .iter()
        .map(|f| f.contribution)
        .sum::<f64>()
        .clamp(0.0, 1.0);
    (score, RiskTier::from_score(score), factors)
}

pub async fn assess_connection_risk(
    graph: &dyn GraphStore,
    config: &RiskConfig,
    tag: &str,
    leg: &str,
    budget_minutes: f64,
) -> BtResult<RiskAssessment> {
    if leg.trim().is_empty() {
        return Err(BtError::validation("connecting leg is required"));
    }
    if !budget_minutes.is_finite() {
        return Err(BtError::validation("connection budget must be a finite number of minutes"));
    }

    let item = require_item(graph, tag).await?;
    let events = load_events(graph, tag).await?;
    let latest_stage = events.last().map(|e| e.event_type);

    let (score, tier, factors) =
        score_connection(item.risk_score, budget_minutes, latest_stage, config);

    Ok(RiskAssessment {
        tag: item.tag,
        leg: leg.to_string(),
        budget_minutes,
        min_connection_minutes: config.min_connection_minutes,
        score,
        tier,
        factors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(RiskTier::from_score(0.0), RiskTier::Low);
        assert_eq!(RiskTier::from_score(0.29), RiskTier::Low);
        assert_eq!(RiskTier::from_score(0.3), RiskTier::Medium);
        assert_eq!(RiskTier::from_score(0.6), RiskTier::High);
        assert_eq!(RiskTier::from_score(0.8), RiskTier::Critical);
        assert_eq!(RiskTier::Critical.escalate(), RiskTier::Critical);
    }

    #[test]
    fn test_deficit_saturates() {
        assert_eq!(time_deficit(60.0, 45.0), 0.0);
        assert_eq!(time_deficit(45.0, 45.0), 0.0);
        assert_eq!(time_deficit(0.0, 45.0), 1.0);
        assert_eq!(time_deficit(-15.0, 45.0), 1.0);
        assert!((time_deficit(35.0, 45.0) - 10.0 / 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_sorted_item_short_connection_is_medium() {
        let (score, tier, factors) =
            score_connection(0.3, 35.0, Some(EventType::Sortation), &RiskConfig::default());
        assert!((score - (0.3 + 0.5 * 10.0 / 45.0)).abs() < 1e-9);
        assert!(tier >= RiskTier::Medium);
        assert!(factors.iter().any(|f| f.kind == RiskFactorKind::TimeDeficit));
        assert!(!factors.iter().any(|f| f.kind == RiskFactorKind::LocationReadiness));
    }

    #[test]
    fn test_shrinking_budget_never_lowers_score() {
        let config = RiskConfig::default();
        let mut previous = 0.0;
        for budget in (10..=60).rev().step_by(5) {
            let (score, _, _) = score_connection(0.3, budget as f64, None, &config);
            assert!(score >= previous, "budget {} scored {} < {}", budget, score, previous);
            previous = score;
        }
    }

    #[test]
    fn test_unscanned_item_gets_readiness_penalty() {
        let (_, _, factors) = score_connection(0.0, 90.0, None, &RiskConfig::default());
        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].kind, RiskFactorKind::LocationReadiness);
        assert_eq!(factors[0].contribution, 0.2);
    }

    #[test]
    fn test_score_is_clamped() {
        let (score, tier, _) = score_connection(1.0, -5.0, None, &RiskConfig::default());
        assert_eq!(score, 1.0);
        assert_eq!(tier, RiskTier::Critical);
    }
}
