//! Error types for chatsync core.

use crate::types::{EntityKind, RowId};
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A row referenced by a write does not exist.
    #[error("{kind} not found: {id}")]
    RowNotFound {
        /// Kind of the missing row.
        kind: EntityKind,
        /// Id of the missing row.
        id: RowId,
    },

    /// A write would violate a uniqueness constraint.
    #[error("unique constraint violated on {kind}.{field}")]
    UniqueViolation {
        /// Kind of the row being written.
        kind: EntityKind,
        /// Name of the unique field.
        field: &'static str,
    },

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a row not found error.
    pub fn row_not_found(kind: EntityKind, id: RowId) -> Self {
        Self::RowNotFound { kind, id }
    }

    /// Creates a unique violation error.
    pub fn unique_violation(kind: EntityKind, field: &'static str) -> Self {
        Self::UniqueViolation { kind, field }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
