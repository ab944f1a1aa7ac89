//! Reconciler error types.

use thiserror::Error;

use fleet_state::{CentralStatus, StateError};

/// Errors a reconcile tick reports. None of them stop the worker.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("provider error for central {central}: {source}")]
    Provider {
        central: String,
        #[source]
        source: fleet_providers::ProviderError,
    },

    #[error("placement error: {0}")]
    Placement(#[from] fleet_placement::PlacementError),

    #[error("central {id} cannot move from {from} to {to}")]
    NotAllowed {
        id: String,
        from: CentralStatus,
        to: CentralStatus,
    },

    #[error("pod label error: {0}")]
    Label(String),

    #[error("lease error: {0}")]
    Lease(String),
}

impl ReconcileError {
    pub fn provider(central: &str, source: fleet_providers::ProviderError) -> Self {
        ReconcileError::Provider {
            central: central.to_string(),
            source,
        }
    }
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
