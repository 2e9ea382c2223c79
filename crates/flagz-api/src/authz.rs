//! Anti-forgery enforcement for state-changing admin requests.
//!
//! Every admin session has full write access (the portal has no viewer
//! role — see `DESIGN.md`'s Open Question resolution), so authorization here
//! reduces to "is there a valid session" plus "does the presented
//! anti-forgery token match". Pre-authentication forms (`/login`, `/setup`)
//! use a double-submit cookie comparison instead, since there is no session
//! yet to bind a token to.

use axum::http::HeaderMap;

use flagz_core::{AdminSession, FlagzError, FlagzResult};
use flagz_auth::session::tokens_match;

use crate::context::get_cookie;

const ANTI_FORGERY_HEADER: &str = "x-csrf-token";

/// Checks a state-changing request's `X-CSRF-Token` header against the
/// token bound to `session`, in constant time. A missing header is treated
/// like any other missing credential (`Unauthorized`); a present-but-wrong
/// token is `Forbidden`, per the admin route table's "mismatch returns 403".
pub fn verify_session_anti_forgery(session: &AdminSession, headers: &HeaderMap) -> FlagzResult<()> {
    let presented = headers
        .get(ANTI_FORGERY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(FlagzError::Unauthorized)?;

    if tokens_match(&session.anti_forgery_token, presented) {
        Ok(())
    } else {
        Err(FlagzError::Forbidden)
    }
}

/// Double-submit comparison for pre-authentication forms: the value set in
/// the `flagz_csrf` cookie when the form was rendered must match the form
/// field the client posts back.
pub fn verify_double_submit(headers: &HeaderMap, cookie_name: &str, form_token: &str) -> FlagzResult<()> {
    let cookie_value = get_cookie(headers, cookie_name).ok_or(FlagzError::Unauthorized)?;
    if tokens_match(cookie_value, form_token) {
        Ok(())
    } else {
        Err(FlagzError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use flagz_core::UserId;

    use super::*;

    fn session(anti_forgery_token: &str) -> AdminSession {
        let now = Utc::now();
        AdminSession {
            token_hash: "irrelevant".to_string(),
            user_id: UserId::new(),
            anti_forgery_token: anti_forgery_token.to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        }
    }

    fn headers_with(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(), value.parse().unwrap());
        headers
    }

    #[test]
    fn matching_token_is_accepted() {
        let session = session("tok-a");
        let headers = headers_with(ANTI_FORGERY_HEADER, "tok-a");
        assert!(verify_session_anti_forgery(&session, &headers).is_ok());
    }

    #[test]
    fn mismatched_token_is_forbidden() {
        let session = session("tok-a");
        let headers = headers_with(ANTI_FORGERY_HEADER, "tok-b");
        assert!(matches!(verify_session_anti_forgery(&session, &headers), Err(FlagzError::Forbidden)));
    }

    #[test]
    fn missing_header_is_rejected() {
        let session = session("tok-a");
        assert!(matches!(verify_session_anti_forgery(&session, &HeaderMap::new()), Err(FlagzError::Unauthorized)));
    }

    #[test]
    fn double_submit_matches_cookie_to_form_field() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, "flagz_csrf=xyz".parse().unwrap());
        assert!(verify_double_submit(&headers, "flagz_csrf", "xyz").is_ok());
        assert!(matches!(verify_double_submit(&headers, "flagz_csrf", "wrong"), Err(FlagzError::Unauthorized)));
    }
}
