//! Store wiring shared by every command.

use std::sync::Arc;

use anyhow::{Context, Result};
use bt_core::config::{AppConfig, GraphBackend};
use bt_core::store::GraphStore;
use bt_db::SqlitePrimaryStore;
use bt_graph::{AnalyticsEngine, InMemoryGraphStore, Neo4jGraphStore};
use bt_sync::{Coordinator, SyncService};
use tracing::{debug, warn};

pub struct Stores {
    pub config: AppConfig,
    pub primary: SqlitePrimaryStore,
    pub graph: Arc<dyn GraphStore>,
    /// Set when the graph backend is Neo4j.
    pub neo4j: Option<Arc<Neo4jGraphStore>>,
}

impl Stores {
    /// Open the primary store and build the configured graph store.
    ///
    /// Neo4j connects lazily, so an unreachable graph does not stop writes.
    pub async fn open(config: AppConfig) -> Result<Self> {
        let primary = SqlitePrimaryStore::open(
            &config.primary.path,
            std::time::Duration::from_millis(config.primary.busy_timeout_ms),
        )
        .with_context(|| format!("Failed to open primary store {}", config.primary.path.display()))?;
        debug!(path = %config.primary.path.display(), "Primary store ready");

        let (graph, neo4j) = match config.graph.backend {
            GraphBackend::Neo4j => {
                let store = Arc::new(
                    Neo4jGraphStore::connect(&config.graph)
                        .await
                        .context("Failed to configure Neo4j client")?,
                );
                let graph: Arc<dyn GraphStore> = store.clone();
                (graph, Some(store))
            }
            GraphBackend::Memory => {
                warn!("Using the in-memory graph store; graph state is lost when the command exits");
                let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
                (graph, None)
            }
        };

        Ok(Self {
            config,
            primary,
            graph,
            neo4j,
        })
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::new(
            Arc::new(self.primary.clone()),
            self.graph.clone(),
            Arc::new(self.primary.clone()),
            self.config.coordinator.clone(),
        )
    }

    pub fn sync_service(&self) -> SyncService {
        SyncService::new(
            Arc::new(self.primary.clone()),
            Arc::new(self.primary.clone()),
            self.graph.clone(),
            self.config.sync.clone(),
        )
    }

    pub fn analytics(&self) -> AnalyticsEngine {
        AnalyticsEngine::new(self.graph.clone(), self.config.risk.clone())
    }
}
