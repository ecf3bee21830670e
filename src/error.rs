use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// PortalError
///
/// The single error type surfaced by every fallible operation in the portal.
/// Each variant maps to one failure kind from the domain contract and carries
/// enough context for a user-facing message. Handlers never swallow these:
/// every failure becomes a JSON response with an explicit `kind` field.
#[derive(Debug, Error)]
pub enum PortalError {
    /// An unknown territory code, doctor reference, or record id.
    #[error("{0} not found")]
    NotFound(String),

    /// A required field was missing or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The territory already holds image sets for two distinct doctors.
    #[error("territory '{0}' already has images for two doctors; cannot add another")]
    CapacityExceeded(String),

    /// The doctor id is already registered (globally unique constraint).
    #[error("doctor id '{0}' is already registered")]
    Conflict(String),

    /// The images root is missing or a file write failed.
    #[error("image storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Bad credentials or a missing/revoked session token.
    #[error("invalid username or password")]
    AuthFailure,

    /// Authenticated, but the caller's role does not permit the operation.
    #[error("operation requires the admin role")]
    Forbidden,

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PortalError {
    /// Stable machine-readable kind string, used in response bodies and asserted by tests.
    pub fn kind(&self) -> &'static str {
        match self {
            PortalError::NotFound(_) => "not_found",
            PortalError::InvalidInput(_) => "invalid_input",
            PortalError::CapacityExceeded(_) => "capacity_exceeded",
            PortalError::Conflict(_) => "conflict",
            PortalError::StorageUnavailable(_) => "storage_unavailable",
            PortalError::AuthFailure => "auth_failure",
            PortalError::Forbidden => "forbidden",
            PortalError::Database(_) => "database",
            PortalError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            PortalError::NotFound(_) => StatusCode::NOT_FOUND,
            PortalError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PortalError::CapacityExceeded(_) => StatusCode::CONFLICT,
            PortalError::Conflict(_) => StatusCode::CONFLICT,
            // The export contract treats a missing images root as an
            // informational not-found, never a server error.
            PortalError::StorageUnavailable(_) => StatusCode::NOT_FOUND,
            PortalError::AuthFailure => StatusCode::UNAUTHORIZED,
            PortalError::Forbidden => StatusCode::FORBIDDEN,
            PortalError::Database(_) | PortalError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for PortalError {
    fn into_response(self) -> Response {
        // Internal failures are logged with detail but surfaced generically.
        if let PortalError::Database(e) = &self {
            tracing::error!("database error: {:?}", e);
        }

        let message = match &self {
            PortalError::Database(_) => "database error".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({ "kind": self.kind(), "error": message }));
        (self.status(), body).into_response()
    }
}
