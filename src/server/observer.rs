//! Observer relay and finance inbox: events in over `POST /`, fanned out to
//! browsers over Server-Sent Events at `GET /stream`.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::{healthz, is_json, unsupported_media_type};
use crate::delivery::{EventMetadata, HEADER_SUBJECT};
use crate::hub::BroadcastHub;

/// One event as observers see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedEvent {
    pub event_type: String,
    pub message_id: String,
    pub payload: Value,
}

/// Which UI the relay feeds. Only the SSE event name differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayFormat {
    Observer,
    FinanceInbox,
}

impl RelayFormat {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Observer => "triage_event",
            Self::FinanceInbox => "finance_message",
        }
    }
}

#[derive(Clone)]
pub struct ObserverState {
    pub hub: Arc<BroadcastHub<RelayedEvent>>,
    pub format: RelayFormat,
}

/// Routes for an observer-facing service.
pub fn observer_routes(hub: Arc<BroadcastHub<RelayedEvent>>, format: RelayFormat) -> Router {
    Router::new()
        .route("/", post(relay_event))
        .route("/stream", get(stream_events))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(ObserverState { hub, format })
}

async fn relay_event(
    State(state): State<ObserverState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !is_json(&headers) {
        return unsupported_media_type();
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "Rejected unparseable event body");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": format!("invalid JSON: {e}")})),
            )
                .into_response();
        }
    };

    let metadata = EventMetadata::from_headers(&headers);
    let message_id = subject_or_payload_id(&headers, &payload).unwrap_or(metadata.subject);
    info!(
        event_type = %metadata.event_type,
        message_id = %message_id,
        format = state.format.event_name(),
        "Relaying event to observers"
    );

    state.hub.announce(RelayedEvent {
        event_type: metadata.event_type,
        message_id,
        payload,
    });

    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "event relayed to UI"})),
    )
        .into_response()
}

/// Correlation id for a relayed event: the `ce-subject` header when it is
/// readable, else the body's `message_id`.
fn subject_or_payload_id(headers: &HeaderMap, payload: &Value) -> Option<String> {
    headers
        .get(HEADER_SUBJECT)
        .and_then(|v| v.to_str().ok())
        .or_else(|| payload.get("message_id").and_then(Value::as_str))
        .map(str::to_string)
}

async fn stream_events(
    State(state): State<ObserverState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.hub.subscribe();
    let name = state.format.event_name();
    info!(subscriber = subscription.id(), "Observer stream opened");

    // Ends when the hub sheds the subscriber; dropping the stream on client
    // disconnect drops the subscription, which deregisters it.
    let events = stream::unfold(subscription, move |mut sub| async move {
        let relayed = sub.recv().await?;
        Some((Event::default().event(name).json_data(&relayed), sub))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
