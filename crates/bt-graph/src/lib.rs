//! # BagTrail Graph
//!
//! Graph store adapters and the analytics engine.
//!
//! Provides the Neo4j-backed `GraphStore`, an in-memory one for tests and
//! local runs, schema setup, and read-only journey, risk and bottleneck
//! queries.

pub mod analytics;
pub mod client;
pub mod memory;
pub mod neo4j;
pub mod schema;

pub use analytics::{AnalyticsEngine, DataFreshness, Fresh};
pub use client::GraphClient;
pub use memory::InMemoryGraphStore;
pub use neo4j::Neo4jGraphStore;
pub use schema::initialize_schema;
