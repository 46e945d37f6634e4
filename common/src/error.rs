//! Shared error kinds for the broker workspace.
//!
//! Every crate in this workspace funnels its leaf errors through this enum
//! before a caller-facing layer (an HTTP handler, typically) maps it to the
//! taxonomy's external shape. The kinds mirror the abstract taxonomy:
//! Validation, Authentication/Authorization, Conflict, TransientDependency,
//! Timeout, Fatal.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sender: {0}")]
    InvalidSender(String),

    #[error("invalid body: {0}")]
    InvalidBody(String),

    #[error("body too large")]
    BodyTooLarge,

    #[error("unauthorized")]
    Unauthorized,

    #[error("client revoked")]
    ClientRevoked,

    #[error("unknown client")]
    UnknownClient,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate common name: {0}")]
    DuplicateCn(String),

    #[error("idempotency conflict for message {0}")]
    IdempotencyConflict(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("already revoked")]
    AlreadyRevoked,

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("rate limited")]
    RateLimited,

    #[error("queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("ca unavailable: {0}")]
    CaUnavailable(String),

    #[error("dependency timed out: {0}")]
    Timeout(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the caller should retry this error transparently (worker
    /// retry path / ingress bounded enqueue retry) — only
    /// TransientDependency/Timeout kinds are retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::QueueUnavailable(_)
                | Error::StoreUnavailable(_)
                | Error::CaUnavailable(_)
                | Error::Timeout(_)
                | Error::Database(_)
        )
    }

    /// Whether this error kind must abort process startup.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
