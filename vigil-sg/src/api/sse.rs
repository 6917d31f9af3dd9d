//! Server-Sent Events stream for the output boundary
//!
//! Bridges the EventBus onto an SSE connection. Instructions are delivered
//! at most once per detection id; receivers must treat them as idempotent.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::api::AppState;

/// GET /api/v1/events - SSE stream of pipeline events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(
        "New SSE client connected, total clients: {}",
        state.events.subscriber_count() + 1
    );

    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => Event::default()
                .event(event.name())
                .json_data(&event)
                .ok()
                .map(Ok),
            Err(e) => {
                // Lagging client dropped some events; keep the stream alive
                warn!("SSE client error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}
