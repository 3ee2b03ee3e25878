//! Neo4j schema initialization (constraints and indexes).

use anyhow::Result;
use neo4rs::Query;
use tracing::info;

use crate::GraphClient;

/// Cypher statements for schema initialization.
const SCHEMA_STATEMENTS: &[&str] = &[
    // Uniqueness constraints
    "CREATE CONSTRAINT item_tag IF NOT EXISTS FOR (i:Item) REQUIRE i.tag IS UNIQUE",
    "CREATE CONSTRAINT event_id IF NOT EXISTS FOR (e:Event) REQUIRE e.id IS UNIQUE",
    "CREATE CONSTRAINT location_code IF NOT EXISTS FOR (l:Location) REQUIRE l.code IS UNIQUE",
    // Window scans for bottleneck detection and freshness
    "CREATE INDEX item_last_seen IF NOT EXISTS FOR (i:Item) ON (i.last_seen_at)",
    "CREATE INDEX item_updated IF NOT EXISTS FOR (i:Item) ON (i.updated_at)",
    "CREATE INDEX event_recorded IF NOT EXISTS FOR (e:Event) ON (e.recorded_at)",
];

/// Initialize Neo4j schema with constraints and indexes.
///
/// Safe to run multiple times - uses IF NOT EXISTS clauses.
pub async fn initialize_schema(client: &GraphClient) -> Result<()> {
    info!("Initializing Neo4j schema...");

    for statement in SCHEMA_STATEMENTS {
        client.execute(Query::new(statement.to_string())).await?;
    }

    info!("Neo4j schema initialized ({} statements)", SCHEMA_STATEMENTS.len());
    Ok(())
}
