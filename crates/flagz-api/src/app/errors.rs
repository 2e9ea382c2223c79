use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use flagz_core::FlagzError;

/// Maps the domain error taxonomy to its HTTP status, per the error handling
/// design's kind table: `NotFound` -> 404, `AlreadyExists`/`Conflict` -> 409,
/// `Unauthorized` -> 401, `Forbidden` -> 403, `RateLimited` -> 429,
/// `Validation`/`InvalidId` -> 400, `InvariantViolation` -> 422,
/// `Transient` -> 503, `Fatal` -> 500 (logged before responding).
pub fn flagz_error_response(err: FlagzError) -> axum::response::Response {
    match err {
        FlagzError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        FlagzError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "already_exists", "already exists"),
        FlagzError::Unauthorized => json_error(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid credentials"),
        FlagzError::Forbidden => json_error(StatusCode::FORBIDDEN, "forbidden", "forbidden"),
        FlagzError::RateLimited => json_error(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Too many attempts"),
        FlagzError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", "concurrent modification, retry"),
        FlagzError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        FlagzError::InvariantViolation(msg) => json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg),
        FlagzError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        FlagzError::Transient(msg) => {
            tracing::warn!(error = %msg, "transient error surfaced to a response");
            json_error(StatusCode::SERVICE_UNAVAILABLE, "transient", "temporarily unavailable, retry")
        }
        FlagzError::Fatal(msg) => {
            tracing::error!(error = %msg, "fatal error surfaced to a response");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error")
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (status, axum::Json(json!({ "error": code, "message": message.into() }))).into_response()
}
