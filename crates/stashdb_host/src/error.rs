//! Error types for host operations.

use std::io;
use thiserror::Error;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Errors raised by a host object store.
#[derive(Debug, Error)]
pub enum HostError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The named object store does not exist (or is outside the transaction scope).
    #[error("object store not found: {0}")]
    StoreNotFound(String),

    /// The named index does not exist on the store.
    #[error("index {index} not found on store {store}")]
    IndexNotFound {
        /// Store that was searched.
        store: String,
        /// Missing index name.
        index: String,
    },

    /// An object store with this name already exists.
    #[error("object store already exists: {0}")]
    StoreExists(String),

    /// An index with this name already exists on the store.
    #[error("index {index} already exists on store {store}")]
    IndexExists {
        /// Store owning the index.
        store: String,
        /// Duplicate index name.
        index: String,
    },

    /// A key or unique-index constraint was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A value could not be used as a key, or a key could not be derived.
    #[error("data error: {0}")]
    Data(String),

    /// A write was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The requested version is older than the stored version.
    #[error("requested version {requested} of {name} is lower than stored version {stored}")]
    VersionConflict {
        /// Database name.
        name: String,
        /// Version the caller asked for.
        requested: u32,
        /// Version already persisted.
        stored: u32,
    },

    /// Other connections stayed open through a version change.
    #[error("{name} is blocked by {open} open connection(s)")]
    Blocked {
        /// Database name.
        name: String,
        /// Number of connections still open.
        open: usize,
    },

    /// The connection has been closed.
    #[error("connection to {0} is closed")]
    Closed(String),

    /// The transaction was aborted by its body.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// The upgrade callback failed; the stored schema is unchanged.
    #[error("upgrade of {name} failed: {message}")]
    UpgradeFailed {
        /// Database name.
        name: String,
        /// Description of the failure.
        message: String,
    },

    /// Another process holds the storage directory.
    #[error("storage locked: another process has exclusive access")]
    Locked,

    /// Persisted data could not be decoded.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A retryable host fault (contention, interrupted request).
    #[error("transient host fault: {0}")]
    Transient(String),
}

impl HostError {
    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint(message.into())
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates a transient fault.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }
}
