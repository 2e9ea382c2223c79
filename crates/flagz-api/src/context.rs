//! Request-scoped cookie helpers.

use axum::http::HeaderMap;

/// Reads a named cookie's value out of the `Cookie` request header.
pub fn get_cookie<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == name).then_some(v)
    })
}

/// Renders a `Set-Cookie` header value. `secure` should follow the
/// deployment's TLS posture — off by default per the session cookie's
/// documented design (a private overlay network), on behind a TLS-terminating
/// deployment.
pub fn set_cookie_header(name: &str, value: &str, max_age_secs: i64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}{secure_attr}")
}

pub fn clear_cookie_header(name: &str, secure: bool) -> String {
    set_cookie_header(name, "", 0, secure)
}

/// Like `set_cookie_header`, but omits `HttpOnly` so client-side script can
/// read the value back (the anti-forgery cookie; never the session cookie).
pub fn set_readable_cookie_header(name: &str, value: &str, max_age_secs: i64, secure: bool) -> String {
    let secure_attr = if secure { "; Secure" } else { "" };
    format!("{name}={value}; Path=/; SameSite=Lax; Max-Age={max_age_secs}{secure_attr}")
}
