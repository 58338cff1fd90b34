//! Ingress endpoint. Always pushes the new envelope to the sink.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tracing::{error, info, warn};

use super::{healthz, is_json, schema_rejection, unsupported_media_type};
use crate::delivery::{DeliveryAdapter, EventMetadata, ProcessedEvent};
use crate::pipeline::intake::admit;
use crate::pipeline::router::EventKind;
use crate::pipeline::types::StageKind;

#[derive(Clone)]
pub struct IntakeState {
    pub sink: String,
    pub delivery: Arc<DeliveryAdapter>,
}

/// Routes for the intake service.
pub fn intake_routes(sink: String, delivery: Arc<DeliveryAdapter>) -> Router {
    Router::new()
        .route("/", post(submit))
        .route("/healthz", get(healthz))
        .with_state(IntakeState { sink, delivery })
}

async fn submit(State(state): State<IntakeState>, headers: HeaderMap, body: Bytes) -> Response {
    if !is_json(&headers) {
        warn!("Rejected non-JSON submission");
        return unsupported_media_type();
    }

    let envelope = match admit(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Rejected submission");
            return schema_rejection(&e);
        }
    };

    let metadata = EventMetadata::new(
        EventKind::IntakeNew,
        StageKind::Intake.source(),
        &envelope.message_id,
    );
    let event = ProcessedEvent { metadata, envelope };

    match state.delivery.push(&state.sink, &event).await {
        Ok(event_id) => {
            info!(message_id = %event.envelope.message_id, "Submission accepted");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({
                    "status": "event accepted",
                    "eventId": event_id,
                    "messageId": event.envelope.message_id,
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(message_id = %event.envelope.message_id, error = %e, "Failed to publish new message");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}
