use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CountersignError {
    #[error("{0}")]
    #[diagnostic(code(countersign::validation))]
    Validation(String),

    #[error("{0}")]
    #[diagnostic(code(countersign::not_found))]
    NotFound(String),

    #[error("{0}")]
    #[diagnostic(
        code(countersign::conflict),
        help("The record is already in a terminal state; do not retry blindly")
    )]
    Conflict(String),

    #[error("{0}")]
    #[diagnostic(
        code(countersign::unauthorized),
        help("Staff endpoints expect the X-Authenticated-User header from the auth proxy")
    )]
    Unauthorized(String),

    #[error("{0}")]
    #[diagnostic(code(countersign::forbidden))]
    Forbidden(String),

    #[error("Temporarily unavailable: {0}")]
    #[diagnostic(code(countersign::transient))]
    Transient(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(countersign::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(countersign::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(countersign::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(countersign::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("{0}")]
    #[diagnostic(code(countersign::other))]
    Other(String),
}

impl CountersignError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CountersignError::Validation(_) => StatusCode::BAD_REQUEST,
            CountersignError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            CountersignError::Forbidden(_) => StatusCode::FORBIDDEN,
            CountersignError::NotFound(_) => StatusCode::NOT_FOUND,
            CountersignError::Conflict(_) => StatusCode::CONFLICT,
            CountersignError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CountersignError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = json!({ "success": false, "error": message });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(
            CountersignError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CountersignError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            CountersignError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CountersignError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            CountersignError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            CountersignError::Transient("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            CountersignError::Other("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_conflict_message_is_passed_through() {
        let err = CountersignError::Conflict("Consent has already been provided".into());
        assert_eq!(err.to_string(), "Consent has already been provided");
    }
}
