//! Error types for the fleet state store.

use thiserror::Error;

use crate::types::CentralStatus;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("central {id} is {actual}, expected {expected}")]
    StatusMismatch {
        id: String,
        expected: CentralStatus,
        actual: CentralStatus,
    },

    #[error("invalid transition {from} -> {to} for central {id}")]
    InvalidTransition {
        id: String,
        from: CentralStatus,
        to: CentralStatus,
    },

    #[error("schema error: {0}")]
    Schema(String),
}

impl StateError {
    /// Concurrent-writer outcomes a reconciler can safely ignore.
    pub fn is_benign_conflict(&self) -> bool {
        matches!(
            self,
            StateError::Conflict(_) | StateError::StatusMismatch { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }
}
