use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::broadcast;

use flagz_api::app::repo::{InMemoryAdminRepo, PostgresAdminRepo};
use flagz_api::app::state::AppState;
use flagz_store::{InMemoryFlagStore, PostgresFlagStore};

const DEFAULT_NOTIFY_CHANNEL: &str = "flagz_changes";
/// Capacity for the change-pulse broadcast: consumers only care that a
/// signal arrived, not how many, so a short backlog is plenty.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() {
    flagz_observability::init();

    let session_key = std::env::var("FLAGZ_SESSION_KEY").unwrap_or_else(|_| {
        tracing::warn!("FLAGZ_SESSION_KEY not set; using an insecure dev default");
        "dev-session-key-do-not-use-in-production".to_string()
    });
    let cookie_secure = std::env::var("FLAGZ_COOKIE_SECURE").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
    let notify_channel = std::env::var("FLAGZ_NOTIFY_CHANNEL").unwrap_or_else(|_| DEFAULT_NOTIFY_CHANNEL.to_string());

    let (change_tx, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

    let app = match std::env::var("DATABASE_URL") {
        Ok(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&database_url)
                .await
                .expect("failed to connect to DATABASE_URL");

            let store = Arc::new(PostgresFlagStore::new(pool.clone(), notify_channel.clone()));
            let admin_repo = Arc::new(PostgresAdminRepo::new(pool.clone()));

            let (mut listener_rx, _listener_handle) = flagz_listener::spawn(pool, notify_channel);

            let state = Arc::new(AppState::new(store.clone(), admin_repo, session_key.into_bytes(), change_tx, cookie_secure));

            // Bridges the single-consumer invalidation pulse into both the
            // evaluation cache and every live subscription's broadcast feed.
            // Flag mutations made by this process invalidate/signal directly
            // (see `app/routes/admin.rs`); this loop is what lets a second
            // `flagz-api` instance, or a direct DB write, reach this one too.
            let bridge_cache = state.cache.clone();
            let bridge_change_tx = state.change_tx.clone();
            tokio::spawn(async move {
                while listener_rx.recv().await.is_some() {
                    bridge_cache.invalidate_all();
                    let _ = bridge_change_tx.send(());
                }
            });

            // Hourly sweep (§5): purges aged-out rate-limit windows and
            // expired database sessions. Held for the process lifetime, same
            // as `_listener_handle` above.
            let _sweep_handle = flagz_auth::sweep::spawn(store, state.rate_limiter.clone());

            flagz_api::app::build_app(state)
        }
        Err(_) => {
            tracing::warn!("DATABASE_URL not set; running against the in-memory store (dev/test only)");
            let store = Arc::new(InMemoryFlagStore::new());
            let admin_repo = Arc::new(InMemoryAdminRepo::new(store.clone()));
            let state = Arc::new(AppState::new(store.clone(), admin_repo, session_key.into_bytes(), change_tx, cookie_secure));
            let _sweep_handle = flagz_auth::sweep::spawn(store, state.rate_limiter.clone());
            flagz_api::app::build_app(state)
        }
    };

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.expect("failed to bind 0.0.0.0:8080");
    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
}
