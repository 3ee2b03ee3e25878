//! Centralized error types for BagTrail.
//!
//! Two layers: [`StoreError`] is what every store adapter surfaces, whatever
//! backend sits behind it. [`BtError`] is what callers of the coordinator,
//! the sync service and the analytics engine see.

use thiserror::Error;

/// Uniform error taxonomy shared by the primary and graph adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection, pool exhaustion, lock or timeout problems. Worth retrying.
    #[error("Transient store error: {0}")]
    Transient(String),

    #[error("Record not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    /// Idempotency key reused with a different payload.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other store failure. Not retried.
    #[error("Store error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for store adapter calls.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Main error type for BagTrail operations.
#[derive(Error, Debug)]
pub enum BtError {
    /// Malformed input, rejected before any write.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The authoritative write failed. The caller must resubmit.
    #[error("Primary store write failed: {0}")]
    PrimaryWrite(String),

    /// Never returned from `apply`; secondary failures are absorbed into the sync queue.
    #[error("Graph store write failed: {0}")]
    SecondaryWrite(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transient store error: {0}")]
    TransientStore(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for BagTrail operations.
pub type BtResult<T> = Result<T, BtError>;

impl BtError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Read-path mapping. Write paths map explicitly because the target kind
/// depends on which store failed.
impl From<StoreError> for BtError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transient(msg) => Self::TransientStore(msg),
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{} {}", entity, id)),
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::Backend(msg) => Self::Store(msg),
            StoreError::Serialization(e) => Self::Store(e.to_string()),
        }
    }
}
