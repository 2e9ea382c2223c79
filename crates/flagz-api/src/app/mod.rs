//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `state.rs`: the shared `AppState` every handler reads through
//! - `repo.rs`: admin CRUD (tenants, users, API keys) outside `FlagStore`'s own contract
//! - `routes/`: HTTP routes + handlers (one file per surface: admin portal, client API)
//! - `dto.rs`: request/response DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use flagz_store::FlagStore;

use crate::app::repo::AdminRepo;
use crate::app::state::AppState;

pub mod dto;
pub mod errors;
pub mod repo;
pub mod routes;
pub mod state;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app<S, A>(state: Arc<AppState<S, A>>) -> Router
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    Router::new()
        .merge(routes::router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
