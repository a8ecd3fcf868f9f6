//! # StashDB Testkit
//!
//! Test utilities for StashDB.
//!
//! This crate provides:
//! - Storage fixtures over instrumented in-memory or temporary file hosts
//! - Property-based test generators using proptest
//! - Concurrency stress helpers
//!
//! ## Usage
//!
//! ```rust
//! use stashdb_testkit::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let fixture = TestStorage::memory();
//! fixture.register_database(items_config("T", 1)).unwrap();
//! assert!(fixture.count("T", "items").await.is_success());
//! assert_eq!(fixture.host().open_calls(), 1);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
