//! Error types for KV backends.

use std::io;
use thiserror::Error;

/// Result type for KV operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors that can occur in a KV backend.
#[derive(Debug, Error)]
pub enum KvError {
    /// Another transaction committed a conflicting write first.
    #[error("commit conflict on key {key:?}")]
    CommitConflict {
        /// The first key the conflict was detected on.
        key: Vec<u8>,
    },

    /// The transaction was already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,

    /// A write was attempted through a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// I/O error from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Backend-specific failure.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

impl KvError {
    /// Creates a commit conflict error.
    #[must_use]
    pub fn commit_conflict(key: impl Into<Vec<u8>>) -> Self {
        Self::CommitConflict { key: key.into() }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns true if this error is a commit conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::CommitConflict { .. })
    }
}
