use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Transaction limit reached")]
    LimitReached { limit: i64, current: i64 },

    #[error("{0}")]
    Internal(&'static str),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) | Self::LimitReached { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Db(_) | Self::Io(_) | Self::Csv(_) | Self::Json(_) | Self::Settings(_) | Self::Other(_)
        )
    }
}

/// Replaces storage-level failures with a route-specific message. Domain
/// errors (not found, validation, quota) pass through untouched.
pub trait OrInternal<T> {
    fn or_internal(self, message: &'static str) -> Result<T>;
}

impl<T> OrInternal<T> for Result<T> {
    fn or_internal(self, message: &'static str) -> Result<T> {
        self.map_err(|e| {
            if e.is_storage() {
                tracing::error!(error = %e, "{message}");
                AppError::Internal(message)
            } else {
                e
            }
        })
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation(errors) => json!({ "errors": errors }),
            Self::LimitReached { limit, current } => json!({
                "error": self.to_string(),
                "limit": limit,
                "current": current,
            }),
            e if e.is_storage() => {
                tracing::error!(error = %e, "unhandled storage error");
                json!({ "error": "Internal Server Error" })
            }
            e => json!({ "error": e.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::LimitReached { limit: 1, current: 1 }.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::Internal("boom").status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_or_internal_hides_storage_errors() {
        let res: Result<()> = Err(AppError::Other("disk on fire".into()));
        let err = res.or_internal("Failed to fetch transactions").unwrap_err();
        assert_eq!(err.to_string(), "Failed to fetch transactions");
    }

    #[test]
    fn test_or_internal_keeps_domain_errors() {
        let res: Result<()> = Err(AppError::NotFound("Transaction not found".into()));
        let err = res.or_internal("Failed to fetch transaction").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
