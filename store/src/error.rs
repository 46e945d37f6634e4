//! Standardized HTTP error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
            details: None,
            request_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[allow(dead_code)]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

/// The abstract error taxonomy (Validation / Auth / Conflict /
/// TransientDependency / Timeout / Fatal), concretized to an HTTP status +
/// machine-readable code.
#[derive(Debug)]
#[allow(dead_code)]
pub enum ApiError {
    Internal(String),
    NotFound(String),
    AuthenticationFailed,
    Forbidden(String),
    BadRequest(String),
    Conflict(String),
    ValidationError(String),
    ServiceUnavailable(String),
    RateLimited,
}

impl ApiError {
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            ApiError::Internal(msg) => {
                error!("internal API error: {msg}");
                ErrorResponse::new(500, "INTERNAL_ERROR", "an internal server error occurred")
                    .with_details(msg)
            }
            ApiError::NotFound(msg) => ErrorResponse::new(404, "NOT_FOUND", msg),
            ApiError::AuthenticationFailed => ErrorResponse::new(
                401,
                "AUTHENTICATION_FAILED",
                "authentication credentials are invalid or missing",
            ),
            ApiError::Forbidden(msg) => ErrorResponse::new(403, "FORBIDDEN", msg),
            ApiError::BadRequest(msg) => ErrorResponse::new(400, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => ErrorResponse::new(409, "CONFLICT", msg),
            ApiError::ValidationError(msg) => ErrorResponse::new(422, "VALIDATION_ERROR", msg),
            ApiError::ServiceUnavailable(msg) => ErrorResponse::new(503, "SERVICE_UNAVAILABLE", msg),
            ApiError::RateLimited => {
                ErrorResponse::new(429, "RATE_LIMITED", "too many requests, slow down")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = self.to_error_response();
        let status_code =
            StatusCode::from_u16(error_response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status_code, Json(error_response)).into_response()
    }
}

impl From<broker_common::Error> for ApiError {
    fn from(err: broker_common::Error) -> Self {
        use broker_common::Error::*;
        match err {
            InvalidSender(msg) => ApiError::ValidationError(format!("invalid sender: {msg}")),
            InvalidBody(msg) => ApiError::ValidationError(format!("invalid body: {msg}")),
            BodyTooLarge => ApiError::ValidationError("request body exceeds the size limit".to_string()),
            Unauthorized => ApiError::AuthenticationFailed,
            ClientRevoked => ApiError::Forbidden("client certificate has been revoked".to_string()),
            UnknownClient => ApiError::AuthenticationFailed,
            Forbidden => ApiError::Forbidden("not permitted".to_string()),
            NotFound(msg) => ApiError::NotFound(msg),
            DuplicateCn(cn) => ApiError::Conflict(format!("common name '{cn}' already has an active certificate")),
            IdempotencyConflict(id) => {
                ApiError::Conflict(format!("message {id} already registered with different contents"))
            }
            IllegalTransition(msg) => ApiError::Conflict(format!("illegal state transition: {msg}")),
            AlreadyRevoked => ApiError::Conflict("certificate already revoked".to_string()),
            AlreadyInitialized => ApiError::Conflict("already initialized".to_string()),
            Conflict(msg) => ApiError::Conflict(msg),
            RateLimited => ApiError::RateLimited,
            QueueUnavailable(msg) => ApiError::ServiceUnavailable(format!("queue unavailable: {msg}")),
            StoreUnavailable(msg) => ApiError::ServiceUnavailable(format!("store unavailable: {msg}")),
            CaUnavailable(msg) => ApiError::ServiceUnavailable(format!("certificate authority unavailable: {msg}")),
            Timeout(msg) => ApiError::ServiceUnavailable(format!("dependency timed out: {msg}")),
            Fatal(msg) => {
                error!("fatal error surfaced to an HTTP handler: {msg}");
                ApiError::Internal(msg)
            }
            Database(e) => {
                error!("database error: {e}");
                ApiError::Internal("a database error occurred".to_string())
            }
            Io(e) => ApiError::Internal(format!("I/O error: {e}")),
            Serde(e) => ApiError::BadRequest(format!("invalid JSON: {e}")),
            Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(format!("I/O error: {err}"))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("invalid JSON: {err}"))
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        error!("database error: {err}");
        ApiError::Internal("a database error occurred".to_string())
    }
}

impl ApiError {
    pub fn permission_denied(resource: impl Into<String>) -> Self {
        ApiError::Forbidden(format!("permission denied for resource: {}", resource.into()))
    }

    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ApiError::ValidationError(format!("{}: {}", field.into(), reason.into()))
    }

    pub fn already_exists(resource: impl Into<String>) -> Self {
        ApiError::Conflict(format!("{} already exists", resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_creation() {
        let error = ErrorResponse::new(404, "NOT_FOUND", "resource not found");
        assert_eq!(error.status, 404);
        assert_eq!(error.error, "NOT_FOUND");
        assert!(error.details.is_none());
    }

    #[test]
    fn error_response_with_details() {
        let error = ErrorResponse::new(500, "INTERNAL_ERROR", "something went wrong")
            .with_details("stack trace here")
            .with_request_id("req-123");
        assert_eq!(error.details, Some("stack trace here".to_string()));
        assert_eq!(error.request_id, Some("req-123".to_string()));
    }

    #[test]
    fn broker_error_conversion_maps_status_codes() {
        let err: ApiError = broker_common::Error::NotFound("message m1".to_string()).into();
        assert_eq!(err.to_error_response().status, 404);

        let err: ApiError = broker_common::Error::ClientRevoked.into();
        assert_eq!(err.to_error_response().status, 403);

        let err: ApiError = broker_common::Error::QueueUnavailable("down".to_string()).into();
        assert_eq!(err.to_error_response().status, 503);

        let err: ApiError = broker_common::Error::RateLimited.into();
        assert_eq!(err.to_error_response().status, 429);
    }

    #[test]
    fn helper_functions() {
        let err = ApiError::permission_denied("/api/messages/m1");
        assert_eq!(err.to_error_response().status, 403);

        let err = ApiError::invalid_input("sender", "must be E.164");
        assert_eq!(err.to_error_response().status, 422);

        let err = ApiError::already_exists("client acme");
        assert_eq!(err.to_error_response().status, 409);
    }

    #[test]
    fn json_serialization() {
        let error = ErrorResponse::new(400, "BAD_REQUEST", "invalid input");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("BAD_REQUEST"));
    }
}
