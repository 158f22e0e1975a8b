//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while the store applies a batch or runs a query.
///
/// Command indices refer to positions in the submitted [`crate::SaveBatch`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A foreign-key constraint rejected the command.
    #[error("constraint violation in command {command}: {message}")]
    ConstraintViolation {
        /// Index of the failing command.
        command: usize,
        /// Description of the violated constraint.
        message: String,
    },

    /// An insert collided with an existing row.
    #[error("duplicate key in table {table} (command {command})")]
    DuplicateKey {
        /// Index of the failing command.
        command: usize,
        /// Table that already holds the key.
        table: String,
    },

    /// An update or delete matched no row.
    #[error("no row matched command {command} in table {table}")]
    RowNotFound {
        /// Index of the failing command.
        command: usize,
        /// Table that was searched.
        table: String,
    },

    /// A column referenced a command that has not run yet.
    #[error("column {column} of command {command} references an unresolved value")]
    UnresolvedOrigin {
        /// Index of the failing command.
        command: usize,
        /// Column whose origin could not be resolved.
        column: String,
    },

    /// The store is not able to serve requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Returns the index of the command that failed, if the error names one.
    #[must_use]
    pub fn command(&self) -> Option<usize> {
        match self {
            StorageError::ConstraintViolation { command, .. }
            | StorageError::DuplicateKey { command, .. }
            | StorageError::RowNotFound { command, .. }
            | StorageError::UnresolvedOrigin { command, .. } => Some(*command),
            StorageError::Unavailable(_) => None,
        }
    }
}
