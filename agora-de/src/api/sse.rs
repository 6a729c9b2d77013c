//! Server-Sent Events stream of engine events
//!
//! Every `AgoraEvent` emitted after a client connects is forwarded as an
//! SSE event named after its variant, with the serialized event as JSON
//! data. Slow clients that fall behind the broadcast buffer lose the
//! lagged events and keep receiving from the current position.

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

/// GET /api/events
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
                .event(event.event_type())
                .json_data(&event)
                .ok()
                .map(Ok),
            Err(e) => {
                warn!("SSE subscriber lagged: {:?}", e);
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
