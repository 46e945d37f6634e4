//! Standardized HTTP error responses for the public submission endpoint
//!. Shaped like `broker_store
//! ::error::ApiError` (same `ErrorResponse` envelope, same `From<broker_
//! common::Error>` seam) but with a distinct status mapping: the public
//! contract spells out `400`/`413` where the internal Store API uses a
//! blanket `422`, so this is its own type rather than a re-export.

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
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(status: u16, error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug)]
pub enum ApiError {
    InvalidSender(String),
    InvalidBody(String),
    BodyTooLarge,
    Unauthorized,
    ClientRevoked,
    UnknownClient,
    Forbidden(String),
    BadRequest(String),
    RateLimited,
    QueueUnavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn to_error_response(&self) -> ErrorResponse {
        match self {
            ApiError::InvalidSender(msg) => ErrorResponse::new(400, "INVALID_SENDER", msg),
            ApiError::InvalidBody(msg) => ErrorResponse::new(400, "INVALID_BODY", msg),
            ApiError::BodyTooLarge => {
                ErrorResponse::new(413, "BODY_TOO_LARGE", "request body exceeds the 16 KiB limit")
            }
            ApiError::Unauthorized => {
                ErrorResponse::new(401, "UNAUTHORIZED", "client certificate could not be verified")
            }
            ApiError::ClientRevoked => {
                ErrorResponse::new(403, "CLIENT_REVOKED", "client certificate has been revoked")
            }
            ApiError::UnknownClient => {
                ErrorResponse::new(403, "UNKNOWN_CLIENT", "no active client is registered for this certificate")
            }
            ApiError::Forbidden(msg) => ErrorResponse::new(403, "FORBIDDEN", msg),
            ApiError::BadRequest(msg) => ErrorResponse::new(400, "BAD_REQUEST", msg),
            ApiError::RateLimited => ErrorResponse::new(429, "RATE_LIMITED", "too many requests, slow down"),
            ApiError::QueueUnavailable(msg) => {
                ErrorResponse::new(503, "QUEUE_UNAVAILABLE", "message queue is temporarily unavailable")
                    .with_details(msg)
            }
            ApiError::Internal(msg) => {
                error!("internal ingress error: {msg}");
                ErrorResponse::new(500, "INTERNAL_ERROR", "an internal server error occurred")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.to_error_response();
        let status = StatusCode::from_u16(body.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(body)).into_response();
        if matches!(self, ApiError::QueueUnavailable(_)) {
            response.headers_mut().insert("Retry-After", "5".parse().unwrap());
        }
        response
    }
}

/// The abstract error taxonomy mapped to the public contract's status codes — note this
/// deliberately diverges from `broker_store::error::ApiError`'s mapping of
/// the same `broker_common::Error` variants (422 vs. 400/413), since each
/// maps a different part of the API surface.
impl From<broker_common::Error> for ApiError {
    fn from(err: broker_common::Error) -> Self {
        use broker_common::Error::*;
        match err {
            InvalidSender(msg) => ApiError::InvalidSender(msg),
            InvalidBody(msg) => ApiError::InvalidBody(msg),
            BodyTooLarge => ApiError::BodyTooLarge,
            Unauthorized => ApiError::Unauthorized,
            ClientRevoked => ApiError::ClientRevoked,
            UnknownClient => ApiError::UnknownClient,
            Forbidden => ApiError::Forbidden("not permitted".to_string()),
            RateLimited => ApiError::RateLimited,
            QueueUnavailable(msg) => ApiError::QueueUnavailable(msg),
            StoreUnavailable(msg) | CaUnavailable(msg) | Timeout(msg) => {
                ApiError::Internal(format!("dependency unavailable: {msg}"))
            }
            NotFound(msg) => ApiError::Internal(format!("not found: {msg}")),
            DuplicateCn(_) | IdempotencyConflict(_) | IllegalTransition(_) | AlreadyRevoked | AlreadyInitialized
            | Conflict(_) => ApiError::Internal(err.to_string()),
            Fatal(msg) => {
                error!("fatal error surfaced to an HTTP handler: {msg}");
                ApiError::Internal(msg)
            }
            Database(e) => ApiError::Internal(format!("database error: {e}")),
            Io(e) => ApiError::Internal(format!("I/O error: {e}")),
            Serde(e) => ApiError::BadRequest(format!("invalid JSON: {e}")),
            Internal(msg) => ApiError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_sender_is_400() {
        let err: ApiError = broker_common::Error::InvalidSender("bad".to_string()).into();
        assert_eq!(err.to_error_response().status, 400);
    }

    #[test]
    fn body_too_large_is_413() {
        let err: ApiError = broker_common::Error::BodyTooLarge.into();
        assert_eq!(err.to_error_response().status, 413);
    }

    #[test]
    fn client_revoked_is_403() {
        let err: ApiError = broker_common::Error::ClientRevoked.into();
        assert_eq!(err.to_error_response().status, 403);
    }

    #[test]
    fn queue_unavailable_is_503() {
        let err: ApiError = broker_common::Error::QueueUnavailable("down".to_string()).into();
        assert_eq!(err.to_error_response().status, 503);
    }

    #[test]
    fn queue_unavailable_sets_retry_after() {
        let err = ApiError::QueueUnavailable("down".to_string());
        let response = err.into_response();
        assert_eq!(response.headers().get("Retry-After").unwrap(), "5");
    }

    #[test]
    fn rate_limited_is_429() {
        let err: ApiError = broker_common::Error::RateLimited.into();
        assert_eq!(err.to_error_response().status, 429);
    }
}
