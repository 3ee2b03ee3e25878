//! BagTrail Core Library
//!
//! Domain model, write operations, error taxonomy, configuration and the
//! store contracts shared by the primary store, the graph store, the
//! consistency coordinator and the analytics engine.

pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod operation;
pub mod store;
pub mod time;
pub mod validation;

pub use cancel::CancelToken;
pub use config::AppConfig;
pub use error::{BtError, BtResult, StoreError, StoreResult};
pub use model::{Event, EventType, Item, ItemStatus};
pub use operation::{Operation, OperationKind, OperationResult};
pub use store::{GraphStore, PrimaryStore, SyncQueue};
