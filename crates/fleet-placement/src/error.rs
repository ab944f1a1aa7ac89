//! Placement error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
