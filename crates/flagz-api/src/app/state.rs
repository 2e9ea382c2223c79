//! Shared application state wired through every handler via `axum::State`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use flagz_audit::AuditSink;
use flagz_auth::{CredentialGate, RateLimiter};
use flagz_cache::EvaluationCache;
use flagz_store::FlagStore;

use crate::app::repo::AdminRepo;

pub const SESSION_COOKIE_NAME: &str = "flagz_admin_session";
pub const CSRF_COOKIE_NAME: &str = "flagz_csrf";
/// Readable (non-`HttpOnly`) cookie set at login so the admin UI's script can
/// read the session's anti-forgery token and echo it back as `X-CSRF-Token`
/// on state-changing requests; the session cookie itself stays `HttpOnly`.
pub const ANTI_FORGERY_COOKIE_NAME: &str = "flagz_anti_forgery";
pub const SESSION_TTL_HOURS: i64 = 24;

const LOGIN_RATE_LIMIT: usize = 5;
const LOGIN_RATE_WINDOW: Duration = Duration::from_secs(15 * 60);

pub struct AppState<S, A> {
    pub store: Arc<S>,
    pub admin_repo: Arc<A>,
    pub cache: Arc<EvaluationCache<S>>,
    pub change_tx: broadcast::Sender<()>,
    pub gate: Arc<CredentialGate<S>>,
    pub rate_limiter: Arc<RateLimiter>,
    pub audit: Arc<AuditSink<S>>,
    pub cookie_secure: bool,
}

impl<S, A> AppState<S, A>
where
    S: FlagStore + 'static,
    A: AdminRepo,
{
    pub fn new(store: Arc<S>, admin_repo: Arc<A>, session_key: Vec<u8>, change_tx: broadcast::Sender<()>, cookie_secure: bool) -> Self {
        Self {
            cache: Arc::new(EvaluationCache::new(store.clone())),
            gate: Arc::new(CredentialGate::new(store.clone(), session_key)),
            audit: Arc::new(AuditSink::new(store.clone())),
            store,
            admin_repo,
            change_tx,
            rate_limiter: Arc::new(RateLimiter::new(LOGIN_RATE_LIMIT, LOGIN_RATE_WINDOW)),
            cookie_secure,
        }
    }
}
