//! API error type and the JSON error envelope.
//!
//! Every error response carries a stable numeric code:
//!
//! ```json
//! { "kind": "Error", "id": "7", "href": "/api/rhacs/v1/errors/7",
//!   "code": "RHACS-MGMT-7", "reason": "central abc not found" }
//! ```

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use fleet_reconcile::ReconcileError;
use fleet_state::StateError;

pub const ERRORS_HREF: &str = "/api/rhacs/v1/errors";

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Forbidden(String),

    #[error("forbidden to create more instances than the maximum allowed ({0})")]
    MaxAllowedInstances(u32),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("cloud provider {0:?} is not supported")]
    ProviderNotSupported(String),

    #[error("region {0:?} is not supported")]
    RegionNotSupported(String),

    #[error("{0}")]
    MalformedName(String),

    #[error("synchronous action is not supported, use async=true parameter")]
    SyncNotSupported,
}

impl ApiError {
    pub fn code(&self) -> u32 {
        match self {
            ApiError::Forbidden(_) => 4,
            ApiError::MaxAllowedInstances(_) => 5,
            ApiError::Conflict(_) => 6,
            ApiError::NotFound(_) => 7,
            ApiError::Validation(_) => 8,
            ApiError::Internal(_) => 9,
            ApiError::Unauthenticated(_) => 15,
            ApiError::BadRequest(_) => 21,
            ApiError::ProviderNotSupported(_) => 30,
            ApiError::RegionNotSupported(_) => 31,
            ApiError::MalformedName(_) => 32,
            ApiError::SyncNotSupported => 103,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Forbidden(_) | ApiError::MaxAllowedInstances(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_)
            | ApiError::BadRequest(_)
            | ApiError::ProviderNotSupported(_)
            | ApiError::RegionNotSupported(_)
            | ApiError::MalformedName(_)
            | ApiError::SyncNotSupported => StatusCode::BAD_REQUEST,
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        ApiError::NotFound(format!("{what} not found"))
    }
}

/// The wire form of an error.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub kind: &'static str,
    pub id: String,
    pub href: String,
    pub code: String,
    pub reason: String,
}

impl From<&ApiError> for ErrorEnvelope {
    fn from(err: &ApiError) -> Self {
        let code = err.code();
        ErrorEnvelope {
            kind: "Error",
            id: code.to_string(),
            href: format!("{ERRORS_HREF}/{code}"),
            code: format!("RHACS-MGMT-{code}"),
            reason: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(reason) = &self {
            error!(%reason, "request failed");
        }
        (self.status(), Json(ErrorEnvelope::from(&self))).into_response()
    }
}

impl From<StateError> for ApiError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => ApiError::not_found(what),
            StateError::Conflict(_)
            | StateError::StatusMismatch { .. }
            | StateError::InvalidTransition { .. } => ApiError::Conflict(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::State(e) => e.into(),
            ReconcileError::NotAllowed { .. } => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_state::CentralStatus;

    #[test]
    fn envelope_carries_code_and_href() {
        let envelope = ErrorEnvelope::from(&ApiError::not_found("central abc"));
        assert_eq!(envelope.kind, "Error");
        assert_eq!(envelope.id, "7");
        assert_eq!(envelope.href, "/api/rhacs/v1/errors/7");
        assert_eq!(envelope.code, "RHACS-MGMT-7");
        assert_eq!(envelope.reason, "central abc not found");
    }

    #[test]
    fn store_errors_map_to_http_classes() {
        let conflict: ApiError = StateError::StatusMismatch {
            id: "a".to_string(),
            expected: CentralStatus::Failed,
            actual: CentralStatus::Ready,
        }
        .into();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let missing: ApiError = StateError::NotFound("central a".to_string()).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let io: ApiError = StateError::Write("disk full".to_string()).into();
        assert_eq!(io.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn sync_requests_are_rejected_with_stable_code() {
        let err = ApiError::SyncNotSupported;
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), 103);
    }
}
