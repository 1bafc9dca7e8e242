//! Server-sent event stream of an operator's settlement activity
//!
//! A reconnecting client passes the last id it saw (`last_event_id` query or
//! `Last-Event-ID` header) and first receives the buffered events after it.
//! Without an id the stream is live only.

use super::handlers::AppState;
use crate::events::{EventBus, SseEvent};
use crate::models::Operator;
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use futures::{future, stream, Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";

#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    pub last_event_id: Option<String>,
}

/// The query parameter wins over the header
pub fn resume_point(query: &StreamQuery, headers: &HeaderMap) -> Option<String> {
    query
        .last_event_id
        .clone()
        .filter(|id| !id.is_empty())
        .or_else(|| {
            headers
                .get(LAST_EVENT_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
}

/// Replayed backlog followed by live events. The subscription is taken
/// before the backlog is read, so an event published in between is seen
/// once: live events at or below the last replayed id are skipped.
pub fn operator_events(
    bus: &EventBus,
    operator_id: i64,
    last_event_id: Option<&str>,
) -> impl Stream<Item = SseEvent> + Send + 'static {
    let live = bus.subscribe(operator_id);
    let backlog = match last_event_id {
        Some(id) => bus.replay_since(operator_id, Some(id)),
        None => Vec::new(),
    };
    let replayed_up_to = backlog.last().and_then(|e| e.id.parse::<u64>().ok());

    let live = live.filter(move |event| {
        let fresh = match (replayed_up_to, event.id.parse::<u64>()) {
            (Some(max), Ok(id)) => id > max,
            _ => true,
        };
        future::ready(fresh)
    });

    stream::iter(backlog).chain(live)
}

fn to_sse(event: SseEvent) -> Event {
    Event::default()
        .id(event.id)
        .event(event.event_type)
        .data(event.data.to_string())
}

/// GET /stream
pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Extension(operator): Extension<Operator>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let resume = resume_point(&query, &headers);
    info!(operator_id = operator.id, last_event_id = ?resume, "Event stream opened");

    let events = operator_events(&state.bus, operator.id, resume.as_deref()).map(|e| Ok(to_sse(e)));

    Sse::new(events).keep_alive(KeepAlive::new().interval(state.keepalive).text("ping"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_resume_point_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(LAST_EVENT_ID_HEADER, HeaderValue::from_static("4"));

        let query = StreamQuery {
            last_event_id: Some("7".into()),
        };
        assert_eq!(resume_point(&query, &headers).as_deref(), Some("7"));
        assert_eq!(resume_point(&StreamQuery::default(), &headers).as_deref(), Some("4"));
        assert_eq!(resume_point(&StreamQuery::default(), &HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_replay_then_live() {
        let bus = EventBus::default();
        let first = bus.publish(1, "bet.settled", json!({ "n": 1 }));
        bus.publish(1, "bet.settled", json!({ "n": 2 }));
        bus.publish(2, "bet.settled", json!({ "other": true }));

        let mut events = Box::pin(operator_events(&bus, 1, Some(&first.id)));
        assert_eq!(events.next().await.unwrap().data["n"], 2);

        bus.publish(1, "settlement.success", json!({ "n": 3 }));
        let live = events.next().await.unwrap();
        assert_eq!(live.event_type, "settlement.success");
        assert_eq!(live.data["n"], 3);
    }

    #[tokio::test]
    async fn test_no_resume_point_is_live_only() {
        let bus = EventBus::default();
        bus.publish(1, "bet.settled", json!({ "old": true }));

        let mut events = Box::pin(operator_events(&bus, 1, None));
        bus.publish(1, "bet.settled", json!({ "new": true }));
        assert_eq!(events.next().await.unwrap().data["new"], true);
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let bus = EventBus::default();
        let events = operator_events(&bus, 9, None);
        assert_eq!(bus.subscriber_count(9), 1);
        drop(events);
        assert_eq!(bus.subscriber_count(9), 0);
    }
}
