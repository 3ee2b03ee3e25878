//! Graph analytics commands. All read-only.

use anyhow::{anyhow, Result};
use clap::Args;

use crate::output;
use crate::stores::Stores;

#[derive(Args)]
pub struct RiskArgs {
    /// Item tag
    pub tag: String,

    /// Connection leg, e.g. a flight number
    #[arg(long)]
    pub leg: String,

    /// Minutes left before the connection closes
    #[arg(long, allow_negative_numbers = true)]
    pub budget: f64,
}

#[derive(Args)]
pub struct BottleneckArgs {
    /// Only count items seen within this many minutes
    #[arg(long, default_value = "60")]
    pub window_minutes: i64,

    /// Minimum number of items at a location
    #[arg(long, default_value = "5")]
    pub min_count: usize,
}

pub async fn journey(stores: &Stores, tag: &str, json: bool) -> Result<()> {
    let journey = stores.analytics().get_journey(tag).await?;
    if json {
        return output::print_json(&journey);
    }
    output::print_journey(tag, &journey.data);
    output::print_freshness(journey.data_freshness.as_ref());
    Ok(())
}

pub async fn location(stores: &Stores, tag: &str, json: bool) -> Result<()> {
    let location = stores.analytics().get_current_location(tag).await?;
    if json {
        return output::print_json(&location);
    }
    output::print_location(&location.data);
    output::print_freshness(location.data_freshness.as_ref());
    Ok(())
}

pub async fn risk(args: RiskArgs, stores: &Stores, json: bool) -> Result<()> {
    let assessment = stores
        .analytics()
        .assess_connection_risk(&args.tag, &args.leg, args.budget)
        .await?;
    if json {
        return output::print_json(&assessment);
    }
    output::print_risk(&assessment.data);
    output::print_freshness(assessment.data_freshness.as_ref());
    Ok(())
}

pub async fn bottlenecks(args: BottleneckArgs, stores: &Stores, json: bool) -> Result<()> {
    let window = window_duration(args.window_minutes)?;
    let found = stores
        .analytics()
        .detect_bottlenecks(window, args.min_count)
        .await?;
    if json {
        return output::print_json(&found);
    }
    output::print_bottlenecks(&found.data, args.window_minutes, args.min_count);
    output::print_freshness(found.data_freshness.as_ref());
    Ok(())
}

pub async fn route(stores: &Stores, tag: &str, json: bool) -> Result<()> {
    let route = stores.analytics().route_to_destination(tag).await?;
    if json {
        return output::print_json(&route);
    }
    output::print_route(tag, route.data.as_ref());
    output::print_freshness(route.data_freshness.as_ref());
    Ok(())
}

fn window_duration(minutes: i64) -> Result<chrono::Duration> {
    chrono::Duration::try_minutes(minutes)
        .ok_or_else(|| anyhow!("--window-minutes {} is too large", minutes))
}
