//! Hourly session-cleanup sweep (§5): purges aged-out login-attempt
//! windows and expired database sessions. Launched with an explicit
//! cancellation signal handed in at construction, same shape as
//! `flagz_listener::ListenerHandle`, rather than relying on process exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use flagz_store::FlagStore;

use crate::rate_limit::RateLimiter;

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Handle to stop a running sweep loop and wait for it to exit.
pub struct SweepHandle {
    shutdown: mpsc::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl SweepHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join.await;
    }
}

/// Spawns the hourly sweep loop. Each tick purges `rate_limiter`'s aged-out
/// windows first (holding its mutex only for that enumeration), then, after
/// the lock is released, asks the store to delete expired admin sessions.
pub fn spawn<S>(store: Arc<S>, rate_limiter: Arc<RateLimiter>) -> SweepHandle
where
    S: FlagStore + 'static,
{
    spawn_with_interval(store, rate_limiter, DEFAULT_SWEEP_INTERVAL)
}

fn spawn_with_interval<S>(store: Arc<S>, rate_limiter: Arc<RateLimiter>, period: Duration) -> SweepHandle
where
    S: FlagStore + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // first tick fires immediately; consume it so the real cadence starts one period out

        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.recv() => return,

                _ = ticker.tick() => {
                    rate_limiter.purge_expired(Instant::now());

                    match store.delete_expired_admin_sessions(chrono::Utc::now()).await {
                        Ok(purged) => debug!(purged, "session sweep purged expired admin sessions"),
                        Err(e) => warn!(error = %e, "session sweep failed to purge expired admin sessions"),
                    }
                }
            }
        }
    });

    SweepHandle {
        shutdown: shutdown_tx,
        join,
    }
}
