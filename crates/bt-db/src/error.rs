//! Database error types.

use bt_core::StoreError;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors raised by the SQLite layer.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid timestamp '{0}'")]
    Timestamp(String),

    /// A stored value no longer parses (unknown enum variant and the like).
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Connection lock poisoned: {0}")]
    Lock(String),

    #[error("Record not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Busy and locked databases are the transient cases for SQLite.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => matches!(
            e.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
        ),
        _ => false,
    }
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Sqlite(ref e) if is_transient(e) => StoreError::Transient(err.to_string()),
            DbError::NotFound { entity, id } => StoreError::NotFound { entity, id },
            DbError::Conflict(msg) => StoreError::Conflict(msg),
            DbError::Serialization(e) => StoreError::Serialization(e),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
