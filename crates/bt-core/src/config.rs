//! Configuration loaded from `bagtrail.toml` plus environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BtError, BtResult};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "bagtrail.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub primary: PrimaryConfig,
    pub graph: GraphConfig,
    pub coordinator: CoordinatorConfig,
    pub sync: SyncConfig,
    pub risk: RiskConfig,
}

/// SQLite primary store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".bagtrail/primary.db"),
            busy_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphBackend {
    Neo4j,
    Memory,
}

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: GraphBackend,
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Upper bound of the bolt connection pool.
    pub max_connections: usize,
    /// Longest a single graph call may wait, pool acquisition included.
    pub acquire_timeout_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::Neo4j,
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "bagtrail_dev".to_string(),
            database: "neo4j".to_string(),
            max_connections: 8,
            acquire_timeout_ms: 1500,
        }
    }
}

impl GraphConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// Dual-write behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Immediate retries of a failed graph write before queueing it.
    pub graph_retries: u32,
    /// Retries of a transient primary failure before giving up.
    pub primary_retries: u32,
    /// Fixed pause between retries.
    pub retry_backoff_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            graph_retries: 2,
            primary_retries: 2,
            retry_backoff_ms: 50,
        }
    }
}

impl CoordinatorConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Reconciliation batch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: usize,
    /// Items compared field by field during verification.
    pub sample_size: usize,
    /// Queue entries are abandoned after this many failed attempts.
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            sample_size: 50,
            max_attempts: 5,
        }
    }
}

/// Connection-risk weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub min_connection_minutes: f64,
    pub base_weight: f64,
    pub deficit_weight: f64,
    pub readiness_weight: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_connection_minutes: 45.0,
            base_weight: 1.0,
            deficit_weight: 0.5,
            readiness_weight: 0.2,
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from [`DEFAULT_CONFIG_FILE`] when `None`.
    ///
    /// A missing file yields defaults; environment overrides apply either way.
    pub fn load(path: Option<&Path>) -> BtResult<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                BtError::config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            Self::from_toml(&raw)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml(raw: &str) -> BtResult<Self> {
        toml::from_str(raw).map_err(|e| BtError::config(format!("Invalid config: {}", e)))
    }

    /// Apply `BAGTRAIL_*` and `NEO4J_*` overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("BAGTRAIL_DB") {
            self.primary.path = PathBuf::from(path);
        }
        if let Some(backend) = lookup("BAGTRAIL_GRAPH_BACKEND") {
            match backend.to_lowercase().as_str() {
                "memory" => self.graph.backend = GraphBackend::Memory,
                "neo4j" => self.graph.backend = GraphBackend::Neo4j,
                other => tracing::warn!(backend = other, "Ignoring unknown graph backend"),
            }
        }
        if let Some(uri) = lookup("NEO4J_URI") {
            self.graph.uri = uri;
        }
        if let Some(user) = lookup("NEO4J_USER") {
            self.graph.user = user;
        }
        if let Some(password) = lookup("NEO4J_PASSWORD") {
            self.graph.password = password;
        }
    }

    /// Reject settings that would make the system misbehave.
    pub fn validate(&self) -> BtResult<()> {
        if self.graph.max_connections == 0 {
            return Err(BtError::config("graph.max_connections must be at least 1"));
        }
        if self.sync.batch_size == 0 {
            return Err(BtError::config("sync.batch_size must be at least 1"));
        }
        if self.sync.max_attempts == 0 {
            return Err(BtError::config("sync.max_attempts must be at least 1"));
        }
        let risk = &self.risk;
        if !(risk.min_connection_minutes > 0.0) {
            return Err(BtError::config("risk.min_connection_minutes must be positive"));
        }
        for (name, weight) in [
            ("base_weight", risk.base_weight),
            ("deficit_weight", risk.deficit_weight),
            ("readiness_weight", risk.readiness_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(BtError::config(format!("risk.{} must be non-negative", name)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [graph]
            backend = "memory"
            max_connections = 2

            [risk]
            min_connection_minutes = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.graph.backend, GraphBackend::Memory);
        assert_eq!(config.graph.max_connections, 2);
        assert_eq!(config.graph.uri, "bolt://localhost:7687");
        assert_eq!(config.risk.min_connection_minutes, 30.0);
        assert_eq!(config.risk.base_weight, 1.0);
        assert_eq!(config.coordinator, CoordinatorConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            "BAGTRAIL_DB" => Some("/tmp/bags.db".to_string()),
            "BAGTRAIL_GRAPH_BACKEND" => Some("MEMORY".to_string()),
            "NEO4J_URI" => Some("bolt://graph:7687".to_string()),
            _ => None,
        });
        assert_eq!(config.primary.path, PathBuf::from("/tmp/bags.db"));
        assert_eq!(config.graph.backend, GraphBackend::Memory);
        assert_eq!(config.graph.uri, "bolt://graph:7687");
        assert_eq!(config.graph.user, "neo4j");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.sync.batch_size = 0;
        assert!(matches!(config.validate(), Err(BtError::Config(_))));

        let mut config = AppConfig::default();
        config.risk.deficit_weight = -0.1;
        assert!(matches!(config.validate(), Err(BtError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync]\nbatch_size = 10\nsample_size = 3").unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.sync.batch_size, 10);
        assert_eq!(config.sync.sample_size, 3);
        assert_eq!(config.sync.max_attempts, 5);
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sync\nbatch_size = ").unwrap();
        assert!(matches!(
            AppConfig::load(Some(file.path())),
            Err(BtError::Config(_))
        ));
    }
}
