//! Error types for recdb core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in recdb core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The record does not exist, is deleted or has expired.
    #[error("database entry not found")]
    NotFound,

    /// The caller's scope may not see this record.
    #[error("access to database record denied")]
    PermissionDenied,

    /// The database does not accept writes.
    #[error("database is read only")]
    ReadOnly,

    /// The database system is shutting down.
    #[error("database is shutting down")]
    ShuttingDown,

    /// A query producer gave up because its consumer stopped reading.
    #[error("query timeout: consumer did not receive within {millis} ms")]
    ScanTimeout {
        /// How long the producer waited.
        millis: u64,
    },

    /// A subscriber fell too far behind and its feed overflowed.
    #[error("subscription feed overflowed after {capacity} pending events")]
    SubscriptionOverflow {
        /// Feed capacity.
        capacity: usize,
    },

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] recdb_codec::CodecError),

    /// Storage device or log error.
    #[error("storage error: {0}")]
    Storage(#[from] recdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The record or envelope is malformed.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the problem.
        message: String,
    },

    /// The query is malformed.
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Description of the problem.
        message: String,
    },

    /// A field could not be read or written through an accessor.
    #[error("accessor error: {message}")]
    Accessor {
        /// Description of the problem.
        message: String,
    },

    /// No database with this name is registered.
    #[error("database {name:?} is not registered")]
    UnknownDatabase {
        /// Requested name.
        name: String,
    },

    /// No storage backend is registered under this type name.
    #[error("storage type {storage_type:?} is not registered")]
    UnknownStorage {
        /// Requested type name.
        storage_type: String,
    },

    /// Database names must be at least three characters of `[A-Za-z0-9_-]`.
    #[error("invalid database name {name:?}")]
    InvalidDatabaseName {
        /// The rejected name.
        name: String,
    },

    /// The registry file is malformed.
    #[error("registry error: {message}")]
    Registry {
        /// Description of the problem.
        message: String,
    },

    /// The data directory is locked by another process.
    #[error("data directory locked: another process has exclusive access")]
    DirectoryLocked,

    /// An async operation was started outside a tokio runtime.
    #[error("no async runtime available: {message}")]
    NoRuntime {
        /// What was attempted.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates an accessor error.
    pub fn accessor(message: impl Into<String>) -> Self {
        Self::Accessor {
            message: message.into(),
        }
    }

    /// Creates a registry error.
    pub fn registry(message: impl Into<String>) -> Self {
        Self::Registry {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a missing runtime error.
    pub fn no_runtime(message: impl Into<String>) -> Self {
        Self::NoRuntime {
            message: message.into(),
        }
    }

    /// Returns true for [`CoreError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}
