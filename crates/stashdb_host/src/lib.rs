//! # StashDB Host
//!
//! The transactional, versioned object store that StashDB runs on.
//!
//! A host keeps named databases. Each database has a schema version and a
//! set of object stores holding JSON records ordered by [`Key`]. Schema
//! changes only happen inside the upgrade callback passed to
//! [`Host::open`]; data changes only happen inside transactions on a
//! [`HostConnection`].
//!
//! All host calls are synchronous. StashDB's async layer runs them on a
//! blocking thread pool, one call per request.
//!
//! ## Available Hosts
//!
//! - [`MemoryHost`] - For tests and ephemeral data
//! - [`FileHost`] - One snapshot file per database in a locked directory
//! - [`InstrumentedHost`] - Wrapper that counts calls and injects faults
//!
//! ## Example
//!
//! ```rust
//! use stashdb_host::{Host, Key, KeyPath, MemoryHost, StoreParams, TransactionMode};
//! use serde_json::json;
//!
//! let host = MemoryHost::new();
//! let conn = host
//!     .open("app", 1, &mut |tx| {
//!         tx.create_store("users", StoreParams {
//!             key_path: Some(KeyPath::from("id")),
//!             auto_increment: false,
//!         })
//!     })
//!     .unwrap();
//!
//! let scope = vec!["users".to_owned()];
//! conn.transaction(&scope, TransactionMode::ReadWrite, &mut |tx| {
//!     tx.add("users", json!({"id": 1, "name": "Ada"}), None).map(|_| ())
//! })
//! .unwrap();
//!
//! let mut found = None;
//! conn.transaction(&scope, TransactionMode::ReadOnly, &mut |tx| {
//!     found = tx.get("users", &Key::from(1))?;
//!     Ok(())
//! })
//! .unwrap();
//! assert_eq!(found, Some(json!({"id": 1, "name": "Ada"})));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod engine;
mod error;
mod file;
mod instrumented;
mod key;
mod memory;
mod snapshot;

pub use backend::{
    DatabaseInfo, Host, HostConnection, HostTransaction, IndexOptions, StorageEstimate,
    StoreParams, TransactionBody, TransactionMode, UpgradeFn, UpgradeTransaction,
    VersionChangeEvent, VersionChangeHandler,
};
pub use error::{HostError, HostResult};
pub use file::FileHost;
pub use instrumented::InstrumentedHost;
pub use key::{Key, KeyPath, KeyRange};
pub use memory::MemoryHost;
