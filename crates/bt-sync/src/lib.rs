//! BagTrail Sync
//!
//! The consistency coordinator that dual-writes every operation, and the
//! reconciliation service that repairs graph lag afterwards.

pub mod coordinator;
pub mod reconcile;
pub mod retry;

pub use coordinator::Coordinator;
pub use reconcile::{ConsistencyReport, SyncMode, SyncOptions, SyncReport, SyncService};
pub use retry::{with_retry, RetryError, RetryPolicy};
