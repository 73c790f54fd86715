use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    /// Illegal state-machine transition: the caller is acting on stale state.
    #[error("already processed: {0}")]
    State(String),

    /// Cancellation-window violation. The message carries the hour threshold.
    #[error("{0}")]
    Policy(String),

    #[error("package is not active: {0}")]
    PackageInactive(String),

    #[error("booking falls outside the package validity period")]
    PackageInvalidPeriod,

    #[error("package has no sessions left to book")]
    PackageDepleted,

    #[error("{0}")]
    OutsideAdvanceWindow(String),

    #[error("ledger integrity fault: {0}")]
    Integrity(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::State(_) => StatusCode::CONFLICT,
            AppError::PackageInactive(_) => StatusCode::CONFLICT,
            AppError::PackageDepleted => StatusCode::CONFLICT,
            AppError::Policy(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::PackageInvalidPeriod => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::OutsideAdvanceWindow(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
