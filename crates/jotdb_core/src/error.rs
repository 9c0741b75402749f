//! Error types for the document engine.

use jotdb_kv::KvError;
use thiserror::Error;

/// Result type for engine operations.
pub type DbResult<T> = Result<T, DbError>;

/// Coarse classification of an engine error, for callers that branch on
/// error category rather than the specific variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input, schema violation or bad query. Never retried.
    Validation,
    /// Missing collection or document.
    NotFound,
    /// Unique-index collision or store commit conflict. The caller may
    /// retry the whole transaction.
    Conflict,
    /// Invariant violation or use of a closed transaction. A defect.
    Internal,
    /// The operation was canceled by the caller.
    Canceled,
}

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Malformed input, schema violation or bad query.
    #[error("validation: {message}")]
    Validation {
        /// Description of what failed validation.
        message: String,
    },

    /// Missing collection or document.
    #[error("not found: {message}")]
    NotFound {
        /// What was not found.
        message: String,
    },

    /// Unique-index collision or store commit conflict.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Invariant violation or use of a closed transaction.
    #[error("internal: {message}")]
    Internal {
        /// Description of the defect.
        message: String,
    },

    /// The operation was canceled via the caller's cancellation token.
    #[error("operation canceled")]
    Canceled,

    /// Error from the key-value store.
    #[error("storage error: {0}")]
    Storage(#[source] KvError),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DbError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the coarse classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::Serialization(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Internal { .. } | Self::Storage(_) => ErrorKind::Internal,
            Self::Canceled => ErrorKind::Canceled,
        }
    }
}

impl From<KvError> for DbError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::CommitConflict { .. } => Self::Conflict {
                message: err.to_string(),
            },
            other => Self::Storage(other),
        }
    }
}
