use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use flagz_store::FlagStore;

use crate::app::repo::AdminRepo;
use crate::app::state::AppState;

pub mod admin;
pub mod client;

/// Full router: the admin portal (session-cookie auth) and the client
/// evaluation API (bearer auth), merged onto one `AppState`.
pub fn router<S, A>() -> Router<Arc<AppState<S, A>>>
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    Router::new()
        .route("/setup", get(admin::setup_form).post(admin::setup_submit))
        .route("/login", get(admin::login_form).post(admin::login_submit))
        .route("/logout", post(admin::logout))
        .route("/", get(admin::dashboard))
        .route("/projects", post(admin::create_project))
        .route("/projects/:id", get(admin::show_project))
        .route("/projects/:id/flags", post(admin::create_flag))
        .route("/projects/:id/flags/:key/toggle", post(admin::toggle_flag))
        .route("/projects/:id/flags/:key", delete(admin::delete_flag))
        .route("/api-keys/:tenant", get(admin::list_api_keys).post(admin::create_api_key))
        .route("/api-keys/delete/:tenant", post(admin::delete_api_key))
        .route("/audit-log/:tenant", get(admin::audit_log))
        .route("/v1/flags", get(client::list_flags))
        .route("/v1/flags/:key", get(client::get_flag))
        .route("/v1/stream", get(client::stream))
}
