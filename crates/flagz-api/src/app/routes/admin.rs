//! Admin portal: setup, login/logout, project (tenant) and flag management,
//! API-key issuance, and the audit log view.
//!
//! HTML rendering is out of scope here (see `DESIGN.md`): every GET handler
//! that would normally render a form returns a minimal placeholder body. The
//! anti-forgery and authentication checks around them are real.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;

use flagz_core::{AuditActor, FlagKey, FlagzError, TenantId};
use flagz_store::FlagStore;

use crate::app::dto::{CreateFlagForm, CreateProjectForm, DeleteApiKeyForm, FlagDto, LoginForm, SetupForm};
use crate::app::errors::flagz_error_response;
use crate::app::repo::AdminRepo;
use crate::app::state::{AppState, ANTI_FORGERY_COOKIE_NAME, CSRF_COOKIE_NAME, SESSION_COOKIE_NAME, SESSION_TTL_HOURS};
use crate::authz::{verify_double_submit, verify_session_anti_forgery};
use crate::context::{clear_cookie_header, set_cookie_header, set_readable_cookie_header};
use crate::middleware::authenticate_session;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const PASSWORD_MIN: usize = 12;

fn username_is_valid(username: &str) -> bool {
    let len = username.chars().count();
    (USERNAME_MIN..=USERNAME_MAX).contains(&len)
        && username.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

pub async fn setup_form() -> impl IntoResponse {
    axum::response::Html("<p>Operator setup. POST username/password/confirm_password/csrf_token to /setup.</p>")
}

pub async fn setup_submit<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    headers: HeaderMap,
    Form(form): Form<SetupForm>,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    match try_setup(&state, &headers, form).await {
        Ok(()) => Redirect::to("/login").into_response(),
        Err(e) => flagz_error_response(e),
    }
}

async fn try_setup<S, A>(state: &AppState<S, A>, headers: &HeaderMap, form: SetupForm) -> Result<(), FlagzError>
where
    S: FlagStore + 'static,
    A: AdminRepo,
{
    verify_double_submit(headers, CSRF_COOKIE_NAME, &form.csrf_token)?;

    if state.admin_repo.any_admin_user_exists().await? {
        return Err(FlagzError::already_exists("admin user"));
    }
    if !username_is_valid(&form.username) {
        return Err(FlagzError::Validation(format!(
            "username must be {USERNAME_MIN}-{USERNAME_MAX} chars of letters, digits, '_', '.', '-'"
        )));
    }
    if form.password != form.confirm_password {
        return Err(FlagzError::Validation("passwords do not match".to_string()));
    }
    if form.password.chars().count() < PASSWORD_MIN {
        return Err(FlagzError::Validation(format!("password must be at least {PASSWORD_MIN} characters")));
    }

    let password_hash = flagz_auth::hashing::hash_secret(&form.password)?;
    let user_id = state.admin_repo.create_admin_user(form.username, password_hash).await?;
    let tenant_id = state.admin_repo.ensure_system_tenant().await?;

    state.audit.record(tenant_id, AuditActor::AdminUser(user_id), "admin_setup", None, serde_json::json!({}));
    Ok(())
}

pub async fn login_form() -> impl IntoResponse {
    axum::response::Html("<p>Sign in. POST username/password/csrf_token to /login.</p>")
}

pub async fn login_submit<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    if !state.rate_limiter.is_allowed(addr.ip(), std::time::Instant::now()) {
        return flagz_error_response(FlagzError::RateLimited);
    }

    match try_login(&state, &headers, form).await {
        Ok((token, anti_forgery_token)) => {
            let mut response = Redirect::to("/").into_response();
            let session_cookie = set_cookie_header(SESSION_COOKIE_NAME, &token, SESSION_TTL_HOURS * 3600, state.cookie_secure);
            let anti_forgery_cookie =
                set_readable_cookie_header(ANTI_FORGERY_COOKIE_NAME, &anti_forgery_token, SESSION_TTL_HOURS * 3600, state.cookie_secure);
            let headers = response.headers_mut();
            headers.append(axum::http::header::SET_COOKIE, session_cookie.parse().unwrap());
            headers.append(axum::http::header::SET_COOKIE, anti_forgery_cookie.parse().unwrap());
            response
        }
        // Scenario 6: any login failure is reported as the same generic message.
        Err(_) => {
            state.rate_limiter.record_failure(addr.ip(), std::time::Instant::now());
            flagz_error_response(FlagzError::Unauthorized)
        }
    }
}

async fn try_login<S, A>(state: &AppState<S, A>, headers: &HeaderMap, form: LoginForm) -> Result<(String, String), FlagzError>
where
    S: FlagStore + 'static,
    A: AdminRepo,
{
    verify_double_submit(headers, CSRF_COOKIE_NAME, &form.csrf_token)?;

    let (user_id, password_hash) = state.admin_repo.find_admin_user_by_username(&form.username).await.map_err(|e| match e {
        FlagzError::NotFound => FlagzError::Unauthorized,
        other => other,
    })?;
    if !flagz_auth::hashing::verify_secret(&form.password, &password_hash) {
        return Err(FlagzError::Unauthorized);
    }

    let token = flagz_auth::session::generate_token();
    let mut anti_forgery = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut anti_forgery);
    let anti_forgery_token = hex::encode(anti_forgery);

    let now = chrono::Utc::now();
    let session = flagz_core::AdminSession {
        token_hash: state.gate.hash_session_token(&token),
        user_id,
        anti_forgery_token: anti_forgery_token.clone(),
        created_at: now,
        expires_at: now + chrono::Duration::hours(SESSION_TTL_HOURS),
    };
    state.store.create_admin_session(session).await?;

    Ok((token, anti_forgery_token))
}

pub async fn logout<S, A>(State(state): State<Arc<AppState<S, A>>>, headers: HeaderMap) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    if let Some(token) = crate::context::get_cookie(&headers, SESSION_COOKIE_NAME) {
        let hash = state.gate.hash_session_token(token);
        let _ = state.store.delete_admin_session(&hash).await;
    }
    let mut response = Redirect::to("/login").into_response();
    let cookie = clear_cookie_header(SESSION_COOKIE_NAME, state.cookie_secure);
    response.headers_mut().insert(axum::http::header::SET_COOKIE, cookie.parse().unwrap());
    response
}

pub async fn dashboard<S, A>(State(state): State<Arc<AppState<S, A>>>, headers: HeaderMap) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    if let Err(e) = authenticate_session(&state, &headers).await {
        return flagz_error_response(e);
    }
    match state.admin_repo.list_tenants().await {
        Ok(tenants) => axum::Json(tenants).into_response(),
        Err(e) => flagz_error_response(e),
    }
}

pub async fn show_project<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    if let Err(e) = authenticate_session(&state, &headers).await {
        return flagz_error_response(e);
    }
    let tenant_id = match tenant_id.parse::<TenantId>() {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };

    let tenant = match state.admin_repo.get_tenant(tenant_id).await {
        Ok(t) => t,
        Err(e) => return flagz_error_response(e),
    };
    let flags = match state.store.list_flags(tenant_id).await {
        Ok(flags) => flags.into_iter().map(FlagDto::from).collect::<Vec<_>>(),
        Err(e) => return flagz_error_response(e),
    };

    axum::Json(serde_json::json!({ "tenant": tenant, "flags": flags })).into_response()
}

pub async fn create_project<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    headers: HeaderMap,
    Form(form): Form<CreateProjectForm>,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let session = match authenticate_session(&state, &headers).await {
        Ok(s) => s,
        Err(e) => return flagz_error_response(e),
    };
    if let Err(e) = verify_session_anti_forgery(&session, &headers) {
        return flagz_error_response(e);
    }

    match state.admin_repo.create_tenant(form.name, form.description).await {
        Ok(tenant) => {
            state.audit.record(tenant.id, AuditActor::AdminUser(session.user_id), "project_create", None, serde_json::json!({"name": tenant.name}));
            (StatusCode::CREATED, axum::Json(tenant)).into_response()
        }
        Err(e) => flagz_error_response(e),
    }
}

pub async fn create_flag<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<CreateFlagForm>,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let session = match authenticate_session(&state, &headers).await {
        Ok(s) => s,
        Err(e) => return flagz_error_response(e),
    };
    if let Err(e) = verify_session_anti_forgery(&session, &headers) {
        return flagz_error_response(e);
    }
    let tenant_id = match tenant_id.parse::<TenantId>() {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };

    let variants = match form.variants.as_deref().filter(|s| !s.is_empty()).map(serde_json::from_str) {
        Some(Ok(v)) => Some(v),
        Some(Err(_)) => return flagz_error_response(FlagzError::Validation("variants must be valid JSON".to_string())),
        None => None,
    };
    let rules = match form.rules.as_deref().filter(|s| !s.is_empty()).map(serde_json::from_str) {
        Some(Ok(v)) => Some(v),
        Some(Err(_)) => return flagz_error_response(FlagzError::Validation("rules must be valid JSON".to_string())),
        None => None,
    };

    let enabled = form.enabled();
    let key = FlagKey::new(form.key);
    match state.store.create_flag(tenant_id, key.clone(), form.description, enabled, variants, rules).await {
        Ok(flag) => {
            state.cache.invalidate_all();
            let _ = state.change_tx.send(());
            state.audit.record(tenant_id, AuditActor::AdminUser(session.user_id), "flag_create", Some(key), serde_json::json!({"enabled": enabled}));
            (StatusCode::CREATED, axum::Json(FlagDto::from(flag))).into_response()
        }
        Err(e) => flagz_error_response(e),
    }
}

pub async fn toggle_flag<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path((tenant_id, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let session = match authenticate_session(&state, &headers).await {
        Ok(s) => s,
        Err(e) => return flagz_error_response(e),
    };
    if let Err(e) = verify_session_anti_forgery(&session, &headers) {
        return flagz_error_response(e);
    }
    let tenant_id = match tenant_id.parse::<TenantId>() {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };
    let key = FlagKey::new(key);

    let existing = match state.store.get_flag(tenant_id, &key).await {
        Ok(flag) => flag,
        Err(e) => return flagz_error_response(e),
    };
    let flipped = !existing.enabled;
    match state
        .store
        .update_flag(tenant_id, key.clone(), existing.description, flipped, Some(existing.variants), Some(existing.rules))
        .await
    {
        Ok(flag) => {
            state.cache.invalidate_all();
            let _ = state.change_tx.send(());
            state.audit.record(tenant_id, AuditActor::AdminUser(session.user_id), "flag_toggle", Some(key), serde_json::json!({"enabled": flipped}));
            axum::Json(FlagDto::from(flag)).into_response()
        }
        Err(e) => flagz_error_response(e),
    }
}

pub async fn delete_flag<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path((tenant_id, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let session = match authenticate_session(&state, &headers).await {
        Ok(s) => s,
        Err(e) => return flagz_error_response(e),
    };
    if let Err(e) = verify_session_anti_forgery(&session, &headers) {
        return flagz_error_response(e);
    }
    let tenant_id = match tenant_id.parse::<TenantId>() {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };
    let key = FlagKey::new(key);

    match state.store.delete_flag(tenant_id, &key).await {
        Ok(()) => {
            state.cache.invalidate_all();
            let _ = state.change_tx.send(());
            state.audit.record(tenant_id, AuditActor::AdminUser(session.user_id), "flag_delete", Some(key), serde_json::json!({}));
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => flagz_error_response(e),
    }
}

pub async fn list_api_keys<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let tenant_id = match tenant_id.parse::<TenantId>() {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };
    if let Err(e) = crate::middleware::authenticate_any_role(&state, tenant_id, &headers).await {
        return flagz_error_response(e);
    }
    match state.admin_repo.list_api_keys(tenant_id).await {
        Ok(keys) => axum::Json(keys).into_response(),
        Err(e) => flagz_error_response(e),
    }
}

pub async fn create_api_key<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let session = match authenticate_session(&state, &headers).await {
        Ok(s) => s,
        Err(e) => return flagz_error_response(e),
    };
    if let Err(e) = verify_session_anti_forgery(&session, &headers) {
        return flagz_error_response(e);
    }
    let tenant_id = match tenant_id.parse::<TenantId>() {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };

    let secret = flagz_auth::hashing::generate_secret();
    let secret_hash = match flagz_auth::hashing::hash_secret(&secret) {
        Ok(h) => h,
        Err(e) => return flagz_error_response(e),
    };
    let key_id = flagz_core::ApiKeyId::new();

    match state.admin_repo.create_api_key(tenant_id, key_id, secret_hash).await {
        Ok(key) => {
            state.audit.record(tenant_id, AuditActor::AdminUser(session.user_id), "api_key_create", None, serde_json::json!({"key_id": key.id.to_string()}));
            let token = flagz_auth::bearer::format_token(key_id, &secret);
            // The plaintext secret is only ever visible in this one response.
            (StatusCode::CREATED, axum::Json(serde_json::json!({ "key": key, "token": token }))).into_response()
        }
        Err(e) => flagz_error_response(e),
    }
}

pub async fn delete_api_key<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Form(form): Form<DeleteApiKeyForm>,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let session = match authenticate_session(&state, &headers).await {
        Ok(s) => s,
        Err(e) => return flagz_error_response(e),
    };
    if let Err(e) = verify_session_anti_forgery(&session, &headers) {
        return flagz_error_response(e);
    }
    let tenant_id = match tenant_id.parse::<TenantId>() {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };
    let key_id = match form.key_id.parse::<flagz_core::ApiKeyId>() {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };

    match state.admin_repo.revoke_api_key(tenant_id, key_id).await {
        Ok(()) => {
            state.audit.record(tenant_id, AuditActor::AdminUser(session.user_id), "api_key_delete", None, serde_json::json!({"key_id": form.key_id}));
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => flagz_error_response(e),
    }
}

pub async fn audit_log<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let tenant_id = match tenant_id.parse::<TenantId>() {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };
    if let Err(e) = crate::middleware::authenticate_any_role(&state, tenant_id, &headers).await {
        return flagz_error_response(e);
    }
    match state.store.list_audit_log(tenant_id).await {
        Ok(entries) => axum::Json(entries).into_response(),
        Err(e) => flagz_error_response(e),
    }
}
