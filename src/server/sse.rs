// Server-sent event responses
// Each item becomes one `data: <json>` event

use axum::http::header::{self, HeaderName};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::{Stream, StreamExt};
use serde::Serialize;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Stream serializable items to the client as JSON events
///
/// Proxy buffering is switched off so events reach the client as they are
/// produced.
pub fn json_event_stream<S, T>(items: S) -> Response
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + 'static,
{
    let events = items.map(|item| Event::default().json_data(&item));
    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Sse::new(events),
    )
        .into_response()
}
