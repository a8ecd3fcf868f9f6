//! # StashDB Core
//!
//! Async, retrying storage over a transactional object-store host.
//!
//! This crate provides:
//! - A schema registry of named, versioned database configs
//! - A connection manager that opens each database once, coalesces
//!   concurrent first use and evicts connections on version change
//! - An operation executor running caller code inside host transactions
//! - A bounded retry policy for single-shot operations
//! - Diagnostics: capacity estimate, teardown, database reports
//!
//! Every operation returns an [`OperationResult`] carrying either data or
//! a classified [`StoreError`], plus the wall-clock duration.
//!
//! ## Example
//!
//! ```rust
//! use stashdb_core::{DatabaseConfig, IndexConfig, Storage, StoreConfig};
//! use stashdb_host::KeyRange;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Task {
//!     id: u32,
//!     priority: u32,
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let storage = Storage::in_memory();
//! storage
//!     .register_database(DatabaseConfig::new("app", 1).with_store(
//!         StoreConfig::new("tasks")
//!             .key_path("id")
//!             .with_index(IndexConfig::new("by_priority", "priority")),
//!     ))
//!     .unwrap();
//!
//! for (id, priority) in [(1, 3), (2, 1), (3, 2)] {
//!     storage.put("app", "tasks", &Task { id, priority }).await;
//! }
//!
//! let urgent = storage
//!     .query::<Task>("app", "tasks", "by_priority", Some(KeyRange::upper_bound(2, false)))
//!     .await
//!     .into_result()
//!     .unwrap();
//! assert_eq!(urgent.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 3]);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blocking;
mod config;
mod connection;
mod diagnostics;
mod error;
mod executor;
mod result;
mod retry;
mod schema;
mod storage;
mod transaction;

pub use config::StorageConfig;
pub use connection::{Connection, ConnectionManager};
pub use diagnostics::{DatabaseReport, StoreReport};
pub use error::{ErrorInfo, ErrorKind, StoreError, StoreResult};
pub use executor::OperationExecutor;
pub use result::OperationResult;
pub use retry::RetryPolicy;
pub use schema::{load_schema_json, DatabaseConfig, IndexConfig, SchemaRegistry, StoreConfig};
pub use storage::Storage;
pub use transaction::Transaction;

pub use stashdb_host::{Key, KeyPath, KeyRange, StorageEstimate, TransactionMode};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
