//! # Error Handling
//!
//! HTTP-facing error type. Every handler returns [`AppResult`], and any
//! [`AppError`] is rendered as a JSON envelope:
//!
//! ```json
//! { "error": { "type": "not_found", "message": "...", "timestamp": "..." } }
//! ```
//!
//! ## Conversions:
//! - [`RegistryError`]: unknown entities become 404, malformed names,
//!   incomplete transcriptions and unreadable archives become 400, busy
//!   entries become 409, storage failures become 500
//! - `anyhow::Error`: 500
//! - `serde_json::Error`: 400, since it only surfaces from request bodies here
//! - `BlockingError`: 500, the blocking pool dropped the task

use crate::registry::RegistryError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors a handler can answer with.
///
/// ## Error Categories:
/// - **Internal**: storage or engine plumbing failed (500)
/// - **BadRequest**: the request cannot be acted on as sent (400)
/// - **NotFound**: no dataset, model or transcription by that name (404)
/// - **Conflict**: the entry is in use by a running job (409)
/// - **ConfigError**: the service is misconfigured (500)
/// - **ValidationError**: a field failed validation (400)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::ValidationError("No audio files provided".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Server-side failure the client cannot fix
    Internal(String),

    /// Malformed request, e.g. an unreadable archive or bad JSON
    BadRequest(String),

    /// Requested entity is not registered
    NotFound(String),

    /// Entity is training, transcribing or being populated
    Conflict(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Input failed a validation rule
    ValidationError(String),
}

/// Human-readable form, used in logs. Clients get the JSON envelope from
/// [`ResponseError::error_response`] instead.
impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl AppError {
    /// Status code, machine-readable type and message of each variant.
    fn kind(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
        }
    }
}

/// Renders every error as `{"error": {"type", "message", "timestamp"}}`.
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.kind().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.kind();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Maps registry failures onto HTTP categories.
impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound { .. } => AppError::NotFound(err.to_string()),
            RegistryError::InvalidName { .. } => AppError::ValidationError(err.to_string()),
            RegistryError::Busy { .. } => AppError::Conflict(err.to_string()),
            RegistryError::NotCompleted(_) | RegistryError::InvalidArchive(_) => {
                AppError::BadRequest(err.to_string())
            }
            RegistryError::Preprocessing { .. } | RegistryError::Io(_) | RegistryError::Json(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<actix_web::error::BlockingError> for AppError {
    fn from(err: actix_web::error::BlockingError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Return type of every handler.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryKind;
    use actix_web::body::to_bytes;

    #[test]
    fn test_registry_error_status_codes() {
        let not_found: AppError = RegistryError::not_found(RegistryKind::Models, "m1").into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let pending: AppError = RegistryError::NotCompleted("(m1, a1)".into()).into();
        assert_eq!(pending.status_code(), StatusCode::BAD_REQUEST);

        let escaping: AppError = RegistryError::InvalidName { kind: RegistryKind::Datasets, name: "..".into() }.into();
        assert_eq!(escaping.status_code(), StatusCode::BAD_REQUEST);

        let busy: AppError = RegistryError::busy(RegistryKind::Models, "m1").into();
        assert_eq!(busy.status_code(), StatusCode::CONFLICT);

        let io: AppError = RegistryError::Io(std::io::Error::other("disk full")).into();
        assert_eq!(io.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_error_envelope() {
        let response = AppError::ValidationError("epochs must be greater than 0".into()).error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "validation_error");
        assert_eq!(value["error"]["message"], "epochs must be greater than 0");
        assert!(value["error"]["timestamp"].is_string());
    }
}
