use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde_json::json;
use tokio_stream::Stream;

use crate::domain::events::{BusEvent, EventKind};
use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::state::AppState;

/// Server-sent comment cadence.
const HEARTBEAT: Duration = Duration::from_secs(30);

/// The live event stream.
///
/// Each connection owns one bounded subscriber queue on the bus; slow
/// consumers shed the oldest non-critical frames and learn about it via a
/// `dropped` frame. Dropping the stream (client disconnect) releases the
/// subscriber slot.
pub async fn live(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Some(subscription) = state.app.bus.subscribe() else {
        return Err(ApiError::Unavailable("subscriber limit reached".to_string()));
    };

    let stream = async_stream::stream! {
        let connected = BusEvent::new(
            EventKind::Connected,
            json!({ "subscribers": state.app.bus.subscriber_count() }),
        );
        yield Ok(Event::default().data(connected.to_frame().to_string()));

        loop {
            let event = subscription.recv().await;
            yield Ok(Event::default().data(event.to_frame().to_string()));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new().interval(HEARTBEAT).text("heartbeat"),
    ))
}
