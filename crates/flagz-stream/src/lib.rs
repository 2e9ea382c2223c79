//! Subscription Fan-out (C5): per-client state machine that backfills a
//! tenant's event log from a resume point, then switches to live tailing on
//! change pulses from the invalidation listener.
//!
//! The outbound channel is bounded. A slow client does not get an unbounded
//! buffer built up behind it; once the channel is full, the subscription
//! terminates with `SlowConsumer` rather than block the delivery loop.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{instrument, warn};

use flagz_core::{FlagEvent, FlagKey, TenantId};
use flagz_store::FlagStore;

const BACKFILL_BATCH_LIMIT: usize = 1000;

/// Where a subscription currently is in its lifecycle. Exposed for callers
/// that want to surface this for operational visibility (metrics, an admin
/// dashboard row).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Attaching,
    Backfilling,
    LiveTailing,
    Terminated(TerminationReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The outbound receiver was dropped.
    ClientDisconnected,
    /// The outbound channel was full; the client isn't draining fast enough.
    SlowConsumer,
    /// The store returned an error while reading the log.
    StoreError(String),
    /// The change-pulse source closed (the listener shut down).
    Cancelled,
}

pub struct SubscriptionRequest {
    pub tenant_id: TenantId,
    pub flag_key: Option<FlagKey>,
    /// Resume point: events with `event_id <= after_id` are never redelivered.
    pub after_id: i64,
}

/// Runs one subscription to completion. Returns the terminal reason for
/// logging; `state_tx`, if given, is updated at every transition so a caller
/// (an SSE handler, say) can observe progress without polling this task.
#[instrument(skip(store, change_rx, outbound, state_tx), fields(tenant_id = %request.tenant_id))]
pub async fn run<S>(
    store: Arc<S>,
    request: SubscriptionRequest,
    mut change_rx: broadcast::Receiver<()>,
    outbound: mpsc::Sender<FlagEvent>,
    state_tx: Option<watch::Sender<SubscriptionState>>,
) -> TerminationReason
where
    S: FlagStore,
{
    let set_state = |state: SubscriptionState| {
        if let Some(tx) = &state_tx {
            let _ = tx.send(state);
        }
    };

    set_state(SubscriptionState::Attaching);
    let mut watermark = request.after_id;

    set_state(SubscriptionState::Backfilling);
    if let Err(reason) = drain_available(&store, &request, &mut watermark, &outbound).await {
        set_state(SubscriptionState::Terminated(reason.clone()));
        return reason;
    }

    set_state(SubscriptionState::LiveTailing);
    loop {
        match change_rx.recv().await {
            Ok(()) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscription missed change pulses, re-reading anyway");
            }
            Err(broadcast::error::RecvError::Closed) => {
                let reason = TerminationReason::Cancelled;
                set_state(SubscriptionState::Terminated(reason.clone()));
                return reason;
            }
        }

        if let Err(reason) = drain_available(&store, &request, &mut watermark, &outbound).await {
            set_state(SubscriptionState::Terminated(reason.clone()));
            return reason;
        }
    }
}

/// Reads everything past `watermark` in batches of up to 1000 and sends it,
/// advancing `watermark` only for events that were actually delivered.
async fn drain_available<S>(
    store: &Arc<S>,
    request: &SubscriptionRequest,
    watermark: &mut i64,
    outbound: &mpsc::Sender<FlagEvent>,
) -> Result<(), TerminationReason>
where
    S: FlagStore,
{
    loop {
        let batch = store
            .list_events_since(request.tenant_id, *watermark, request.flag_key.as_ref())
            .await
            .map_err(|e| TerminationReason::StoreError(e.to_string()))?;

        if batch.is_empty() {
            return Ok(());
        }
        let exhausted = batch.len() < BACKFILL_BATCH_LIMIT;

        for event in batch {
            let event_id = event.event_id.value();
            match outbound.try_send(event) {
                Ok(()) => *watermark = event_id,
                Err(mpsc::error::TrySendError::Full(_)) => return Err(TerminationReason::SlowConsumer),
                Err(mpsc::error::TrySendError::Closed(_)) => return Err(TerminationReason::ClientDisconnected),
            }
        }

        if exhausted {
            return Ok(());
        }
    }
}
