//! HTTP rendering of [`DatumError`]
//!
//! Error bodies carry a stable code and a readable message, plus the
//! structured error so a peer can rebuild it exactly:
//!
//! ```json
//! {"code": "version_conflict", "message": "...", "error": {"code": "version_conflict", ...}}
//! ```

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use datum_core::DatumError;
use serde::{Deserialize, Serialize};

/// Wire form of an error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine code
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Structured error
    pub error: DatumError,
}

/// A [`DatumError`] on its way to an HTTP client
#[derive(Debug)]
pub struct ApiError(pub DatumError);

impl ApiError {
    /// Status code for the wrapped error
    pub fn status(&self) -> StatusCode {
        status_for(&self.0)
    }
}

/// Map an error to the status an HTTP client sees
pub fn status_for(error: &DatumError) -> StatusCode {
    match error {
        DatumError::InvalidFormat { .. } | DatumError::InvalidFingerprint { .. } => StatusCode::BAD_REQUEST,
        DatumError::NotFound { .. } => StatusCode::NOT_FOUND,
        DatumError::AlreadyExists { .. }
        | DatumError::VersionConflict { .. }
        | DatumError::ConcurrentModification { .. }
        | DatumError::UnknownAncestor { .. }
        | DatumError::ChainDivergence { .. } => StatusCode::CONFLICT,
        DatumError::NotHome { .. } | DatumError::UnverifiedSource { .. } | DatumError::Unauthorized { .. } => {
            StatusCode::FORBIDDEN
        }
        DatumError::IntegrityViolation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        DatumError::FetchError { .. } => StatusCode::BAD_GATEWAY,
        DatumError::ChainCorrupted { .. }
        | DatumError::Storage { .. }
        | DatumError::Serialization { .. }
        | DatumError::Config { .. }
        | DatumError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<DatumError> for ApiError {
    fn from(error: DatumError) -> Self {
        Self(error)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(DatumError::invalid_format(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(DatumError::invalid_format(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        } else {
            tracing::debug!(code = self.0.code(), error = %self.0, "request rejected");
        }
        let body = ErrorBody {
            code: self.0.code().to_string(),
            message: self.0.to_string(),
            error: self.0,
        };
        (status, Json(body)).into_response()
    }
}

/// Handler result
pub type ApiResult<T> = std::result::Result<T, ApiError>;
