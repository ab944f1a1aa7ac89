//! Driver error types, classified for the lifecycle retry policy.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Timeouts and dropped connections; retried next tick.
    #[error("transient error: {0}")]
    Transient(String),

    /// The request itself was rejected; retrying will not help.
    #[error("client error: {0}")]
    Client(String),

    /// The backend failed (5xx, partial outage).
    #[error("server error: {0}")]
    Server(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
    }

    pub fn is_client(&self) -> bool {
        matches!(self, ProviderError::Client(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;
