//! Event log endpoints

use axum::{
    extract::State,
    response::{sse::Event, Sse},
    Json,
};
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use tracing::info;

use murmur_core::LogRecord;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogRecord>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

/// Full history snapshot in arrival order.
pub async fn snapshot(State(state): State<AppState>) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.events.snapshot(),
    })
}

/// Drop the history. Live subscribers are unaffected and sequence
/// numbers keep counting from where they were.
pub async fn clear(State(state): State<AppState>) -> Json<ClearResponse> {
    let cleared = state.events.clear();
    info!("Event log cleared ({cleared} records dropped)");
    Json(ClearResponse { cleared })
}

/// Stream new records as SSE, one JSON object per event. A subscriber
/// that falls behind the channel capacity is disconnected rather than
/// slowing the producers; reconnecting clients re-sync via the
/// snapshot endpoint.
pub async fn stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut receiver = state.events.subscribe();

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(record) => {
                    let json = serde_json::to_string(&record).unwrap_or_default();
                    yield Ok(Event::default().data(json));
                }
                // Lagged or closed; the client re-subscribes.
                Err(_) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}
