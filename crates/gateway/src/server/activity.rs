//! The live activity stream.
//!
//! Multiplexes pipeline events to SSE subscribers. Each connection gets
//! its own token bucket; events beyond the configured rate are dropped
//! for that subscriber rather than buffered, keeping a slow reader from
//! ever holding back the pipeline.

use std::{convert::Infallible, num::NonZeroU32, sync::Arc};

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use governor::{Quota, RateLimiter};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::server::GatewayState;

pub(crate) async fn stream(
    State(state): State<Arc<GatewayState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rate = NonZeroU32::new(state.activity_rate_per_sec).unwrap_or(NonZeroU32::MIN);
    let limiter = Arc::new(RateLimiter::direct(Quota::per_second(rate)));

    let events = BroadcastStream::new(state.emitter.subscribe()).filter_map(move |item| {
        let limiter = limiter.clone();

        async move {
            let event = match item {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    log::debug!("activity subscriber lagged; {missed} events skipped");
                    return None;
                }
            };

            if limiter.check().is_err() {
                // Bucket empty; this subscriber loses the event.
                return None;
            }

            match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().data(json))),
                Err(error) => {
                    log::error!("failed to serialize pipeline event: {error}");
                    None
                }
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
