//! Credential extraction: turns a request's cookie/bearer header into an
//! authenticated session or tenant binding via `flagz_auth::CredentialGate`.
//!
//! Kept as plain async functions rather than `axum::middleware::from_fn`
//! layers: the admin and client surfaces need different combinations of
//! "session required", "bearer required", "either, scoped to a path tenant"
//! depending on the route, so each handler calls the helper it needs rather
//! than running every request through one global auth layer.

use axum::http::HeaderMap;
use chrono::Utc;

use flagz_core::{AdminSession, FlagzError, FlagzResult, TenantId};
use flagz_store::FlagStore;

use crate::app::repo::AdminRepo;
use crate::app::state::{AppState, SESSION_COOKIE_NAME};
use crate::context::get_cookie;

/// Resolves the admin session bound to the request's session cookie.
pub async fn authenticate_session<S, A>(state: &AppState<S, A>, headers: &HeaderMap) -> FlagzResult<AdminSession>
where
    S: FlagStore + 'static,
    A: AdminRepo,
{
    let token = get_cookie(headers, SESSION_COOKIE_NAME).ok_or(FlagzError::Unauthorized)?;
    state.gate.authenticate_admin_session(token, Utc::now()).await
}

/// Resolves the tenant bound to the request's `Authorization: Bearer` header.
pub async fn authenticate_bearer<S, A>(state: &AppState<S, A>, headers: &HeaderMap) -> FlagzResult<TenantId>
where
    S: FlagStore + 'static,
    A: AdminRepo,
{
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(FlagzError::Unauthorized)?;
    state.gate.authenticate_api_key(header).await
}

/// Authenticates either an admin session or a bearer API key scoped to
/// `tenant_id`, for routes any authenticated role may read (key listing,
/// audit log). A session authenticates regardless of tenant, matching the
/// admin portal's single implicit role; a bearer key must resolve to exactly
/// the path's tenant.
pub async fn authenticate_any_role<S, A>(state: &AppState<S, A>, tenant_id: TenantId, headers: &HeaderMap) -> FlagzResult<()>
where
    S: FlagStore + 'static,
    A: AdminRepo,
{
    if authenticate_session(state, headers).await.is_ok() {
        return Ok(());
    }
    let resolved = authenticate_bearer(state, headers).await?;
    if resolved == tenant_id {
        Ok(())
    } else {
        Err(FlagzError::Forbidden)
    }
}
