//! Client-facing flag evaluation API: read one flag, list a tenant's flags,
//! and subscribe to the live change stream.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use flagz_core::FlagKey;
use flagz_store::FlagStore;
use flagz_stream::SubscriptionRequest;

use crate::app::dto::{EventDto, FlagDto, SubscribeQuery};
use crate::app::errors::flagz_error_response;
use crate::app::repo::AdminRepo;
use crate::app::state::AppState;
use crate::middleware::authenticate_bearer;

/// Outbound channel capacity for one subscriber; past this, the subscriber
/// is dropped as a slow consumer rather than buffered without bound.
const STREAM_CHANNEL_CAPACITY: usize = 256;

pub async fn get_flag<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let tenant_id = match authenticate_bearer(&state, &headers).await {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };
    match state.cache.get_flag(tenant_id, &FlagKey::new(key)).await {
        Ok(flag) => axum::Json(FlagDto::from(flag)).into_response(),
        Err(e) => flagz_error_response(e),
    }
}

pub async fn list_flags<S, A>(State(state): State<Arc<AppState<S, A>>>, headers: HeaderMap) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let tenant_id = match authenticate_bearer(&state, &headers).await {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };
    match state.store.list_flags(tenant_id).await {
        Ok(flags) => axum::Json(flags.into_iter().map(FlagDto::from).collect::<Vec<_>>()).into_response(),
        Err(e) => flagz_error_response(e),
    }
}

pub async fn stream<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Query(query): Query<SubscribeQuery>,
    headers: HeaderMap,
) -> Response
where
    S: FlagStore + 'static,
    A: AdminRepo + 'static,
{
    let tenant_id = match authenticate_bearer(&state, &headers).await {
        Ok(id) => id,
        Err(e) => return flagz_error_response(e),
    };

    let request = SubscriptionRequest {
        tenant_id,
        flag_key: query.flag_key.map(FlagKey::new),
        after_id: query.after_event_id.unwrap_or(0),
    };

    let (outbound_tx, outbound_rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let change_rx = state.change_tx.subscribe();
    tokio::spawn(flagz_stream::run(state.store.clone(), request, change_rx, outbound_tx, None));

    let events = ReceiverStream::new(outbound_rx).map(|event| Ok::<_, std::convert::Infallible>(Event::default().json_data(EventDto::from(event)).unwrap_or_else(|_| Event::default())));

    sse_response(events)
}

fn sse_response<St>(stream: St) -> Response
where
    St: Stream<Item = Result<Event, std::convert::Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))).into_response()
}
