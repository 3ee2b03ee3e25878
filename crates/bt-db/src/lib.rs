//! BagTrail Database Layer
//!
//! SQLite persistence for the primary store: items, events, the idempotency
//! ledger, the sync queue, the audit log and sync-run bookkeeping.

pub mod error;
pub mod migrations;
pub mod pool;
pub mod queries;
pub mod store;

pub use error::{DbError, DbResult};
pub use migrations::run_migrations;
pub use pool::DbPool;
pub use store::SqlitePrimaryStore;
