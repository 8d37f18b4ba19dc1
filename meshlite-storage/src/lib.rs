//! Operation log storage for meshlite.
//!
//! Pairs an append-only [`OperationLog`] with an external relational
//! [`ExecutionEngine`]. The default engine is an in-memory SQLite database
//! driven through rusqlite.
//!
//! # Architecture
//!
//! - Every statement that has an effect is appended to the log after it
//!   runs, stamped with a local monotonic counter
//! - Snapshots move the whole engine state as an opaque blob and never
//!   touch the log
//! - Peers reconcile by exchanging logs and replaying the remote suffix
//!   (see [`LogStore::sync_with`])

mod engine;
mod error;
mod log;
mod store;

pub use engine::{ExecOutput, ExecutionEngine, SqliteEngine, Value};
pub use error::{StorageError, StorageResult};
pub use log::OperationLog;
pub use store::{LogStore, SyncReport};
