//! Invalidation Listener (C3): a long-lived loop holding one dedicated
//! connection to the store, issuing `LISTEN`, and collapsing every
//! notification into a dimensionless "something changed" pulse.
//!
//! The listener never surfaces per-notify errors upward; it is a pump, not
//! a validator. Consumers treat channel closure as "listener gone, stop
//! caching and fall back to direct reads or exit".

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::mpsc;
use tracing::{error, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Handle to stop a running listener and wait for it to exit.
pub struct ListenerHandle {
    shutdown: mpsc::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl ListenerHandle {
    /// Request shutdown and wait for the listener task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(()).await;
        let _ = self.join.await;
    }
}

/// Spawns the listener loop. Returns a capacity-1 coalescing channel: if N
/// notifies arrive before the consumer drains it, exactly one signal
/// survives, because callers are expected to re-read authoritative state on
/// every signal rather than interpret the signal's contents.
pub fn spawn(pool: PgPool, channel: impl Into<String>) -> (mpsc::Receiver<()>, ListenerHandle) {
    let channel = channel.into();
    let (signal_tx, signal_rx) = mpsc::channel(1);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let join = tokio::spawn(async move {
        'reconnect: loop {
            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, "invalidation listener failed to connect");
                    if sleep_or_shutdown(&mut shutdown_rx).await {
                        return;
                    }
                    continue 'reconnect;
                }
            };

            if let Err(e) = listener.listen(&channel).await {
                error!(error = %e, channel = %channel, "invalidation listener failed to LISTEN");
                if sleep_or_shutdown(&mut shutdown_rx).await {
                    return;
                }
                continue 'reconnect;
            }

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.recv() => {
                        return;
                    }

                    notification = listener.recv() => {
                        match notification {
                            Ok(_payload) => {
                                // Coalesce: ignore Full, exactly one pending signal is enough.
                                let _ = signal_tx.try_send(());
                            }
                            Err(e) => {
                                warn!(error = %e, "invalidation listener connection lost, reconnecting");
                                if sleep_or_shutdown(&mut shutdown_rx).await {
                                    return;
                                }
                                continue 'reconnect;
                            }
                        }
                    }
                }
            }
        }
    });

    (
        signal_rx,
        ListenerHandle {
            shutdown: shutdown_tx,
            join,
        },
    )
}

/// Sleeps for the reconnect delay, returning `true` if shutdown was
/// requested during the wait (caller should stop instead of reconnecting).
async fn sleep_or_shutdown(shutdown_rx: &mut mpsc::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(RECONNECT_DELAY) => false,
        _ = shutdown_rx.recv() => true,
    }
}
