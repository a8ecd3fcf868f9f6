//! Error types for storage operations.

use serde::{Serialize, Serializer};
use stashdb_host::HostError;
use std::fmt;
use thiserror::Error;

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Classification of a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The database name was never registered.
    NotRegistered,
    /// A database config failed validation at registration.
    InvalidConfig,
    /// A key or unique index already holds the value.
    KeyConflict,
    /// Opening, upgrading or addressing the schema failed.
    SchemaError,
    /// A retryable contention or I/O fault.
    TransientStoreError,
    /// The request itself is malformed.
    InvalidRequest,
    /// Caller code aborted its transaction.
    TransactionAborted,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Errors raised by storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Operation against a database that was never registered.
    #[error("database not registered: {name}")]
    NotRegistered {
        /// Database name.
        name: String,
    },

    /// Rejected database config.
    #[error("invalid database config: {message}")]
    InvalidConfig {
        /// What is wrong with the config.
        message: String,
    },

    /// `add` against an existing key, or a unique index violation.
    #[error("key conflict: {message}")]
    KeyConflict {
        /// Host description of the conflict.
        message: String,
    },

    /// The upgrade failed or the schema does not match the request.
    #[error("schema error: {message}")]
    Schema {
        /// Description of the failure.
        message: String,
    },

    /// Retryable fault.
    #[error("transient store error: {message}")]
    Transient {
        /// Description of the fault.
        message: String,
    },

    /// Malformed request: bad key, missing in-line key, bad range, etc.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// Caller code aborted the transaction.
    #[error("transaction aborted: {reason}")]
    Aborted {
        /// Reason given by the caller.
        reason: String,
    },
}

impl StoreError {
    /// Creates a not-registered error.
    pub fn not_registered(name: impl Into<String>) -> Self {
        Self::NotRegistered { name: name.into() }
    }

    /// Creates an invalid-config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Creates a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Aborts a transaction from caller code.
    ///
    /// Returning this from a [`crate::Storage::transaction`] body rolls the
    /// transaction back and reports `TransactionAborted`.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotRegistered { .. } => ErrorKind::NotRegistered,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::KeyConflict { .. } => ErrorKind::KeyConflict,
            Self::Schema { .. } => ErrorKind::SchemaError,
            Self::Transient { .. } => ErrorKind::TransientStoreError,
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::Aborted { .. } => ErrorKind::TransactionAborted,
        }
    }

    /// Returns true if another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Kind and message, as carried in an [`crate::OperationResult`].
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<HostError> for StoreError {
    fn from(err: HostError) -> Self {
        let message = err.to_string();
        match err {
            HostError::Constraint(_) => Self::KeyConflict { message },
            HostError::StoreNotFound(_)
            | HostError::IndexNotFound { .. }
            | HostError::StoreExists(_)
            | HostError::IndexExists { .. }
            | HostError::VersionConflict { .. }
            | HostError::UpgradeFailed { .. }
            | HostError::Corrupted(_) => Self::Schema { message },
            HostError::Data(_) | HostError::ReadOnly => Self::InvalidRequest { message },
            HostError::Aborted(reason) => Self::Aborted { reason },
            HostError::Io(_)
            | HostError::Blocked { .. }
            | HostError::Closed(_)
            | HostError::Locked
            | HostError::Transient(_) => Self::Transient { message },
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_request(format!("serialization failed: {err}"))
    }
}

/// Serializable error summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    /// Classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
}

impl Serialize for StoreError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.info().serialize(serializer)
    }
}
