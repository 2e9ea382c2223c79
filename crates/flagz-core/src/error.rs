//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type FlagzResult<T> = Result<T, FlagzError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts, auth). Infrastructure concerns (connection loss,
/// serialization bugs) are folded into `Transient`/`Fatal` rather than given
/// their own leaky variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlagzError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Entity absent, or logically deleted (revoked key, expired session).
    #[error("not found")]
    NotFound,

    /// Unique constraint violated.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Missing/invalid credential, expired session, or anti-forgery mismatch.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated but lacking the role required for the action.
    #[error("forbidden")]
    Forbidden,

    /// Login rate window exceeded.
    #[error("rate limited")]
    RateLimited,

    /// A concurrent mutation lost the race (retriable).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Transport/connection-loss/deadline-exceeded; safe to retry after backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// Invariant violation surfaced from infrastructure (corrupt stored JSON,
    /// unreachable state); logged and surfaced as an internal error.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl FlagzError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
