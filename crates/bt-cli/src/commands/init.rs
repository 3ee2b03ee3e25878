//! Store initialization command.

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;

use crate::output;
use crate::stores::Stores;

pub async fn execute(stores: &Stores, json: bool) -> Result<()> {
    // Opening the primary store already ran its migrations.
    let primary_path = stores.config.primary.path.display().to_string();

    let graph_status = match &stores.neo4j {
        Some(neo4j) => {
            neo4j
                .ping()
                .await
                .with_context(|| format!("Neo4j at {} is not reachable", stores.config.graph.uri))?;
            bt_graph::initialize_schema(neo4j.client())
                .await
                .context("Failed to initialize graph schema")?;
            format!("neo4j schema ready ({})", stores.config.graph.uri)
        }
        None => "in-memory graph, no schema needed".to_string(),
    };

    if json {
        return output::print_json(&json!({
            "primary": primary_path,
            "graph": graph_status,
        }));
    }

    println!("{} Primary store migrated: {}", "✓".green().bold(), primary_path.cyan());
    println!("{} Graph: {}", "✓".green().bold(), graph_status);
    println!();
    println!("{}", "Next steps:".bold());
    println!("  bagtrail item create --tag <tag> --routing A,B,C");
    println!("  bagtrail event record --id <id> --tag <tag> --type check_in --location A");
    println!("  bagtrail sync full        # backfill the graph from the primary store");

    Ok(())
}
