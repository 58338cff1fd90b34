//! Stage service endpoint: envelope in, stage, route, deliver.

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
use crate::delivery::{Delivered, DeliveryAdapter, EventMetadata, ProcessedEvent};
use crate::pipeline::router::route_outcome;
use crate::pipeline::types::{Stage, run_stage};
use crate::pipeline::validation::parse_envelope;

/// State shared by the stage handler.
#[derive(Clone)]
pub struct StageState {
    pub stage: Arc<dyn Stage>,
    pub delivery: Arc<DeliveryAdapter>,
}

/// Routes for one stage service: `POST /` and `GET /healthz`.
pub fn stage_routes(stage: Arc<dyn Stage>, delivery: Arc<DeliveryAdapter>) -> Router {
    let state = StageState { stage, delivery };

    Router::new()
        .route("/", post(process_event))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn process_event(
    State(state): State<StageState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let stage = state.stage.kind();

    if !is_json(&headers) {
        warn!(stage = %stage, "Rejected non-JSON request");
        return unsupported_media_type();
    }

    let envelope = match parse_envelope(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(stage = %stage, error = %e, "Rejected invalid envelope");
            return schema_rejection(&e);
        }
    };

    let inbound = EventMetadata::from_headers(&headers);
    info!(
        stage = %stage,
        message_id = %envelope.message_id,
        event_id = %inbound.id,
        event_type = %inbound.event_type,
        "Received event"
    );

    let outcome = run_stage(state.stage.as_ref(), envelope).await;
    let kind = route_outcome(&outcome);
    info!(
        stage = %stage,
        message_id = %outcome.envelope.message_id,
        new_errors = outcome.new_errors().len(),
        next = %kind,
        "Stage finished"
    );

    let event = ProcessedEvent::from_outcome(outcome, kind);
    match state.delivery.deliver(event).await {
        Ok(Delivered::Reply(event)) => (
            StatusCode::OK,
            event.metadata.to_headers(),
            Json(event.envelope),
        )
            .into_response(),
        Ok(Delivered::Pushed { event_id }) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"status": "event delivered", "eventId": event_id})),
        )
            .into_response(),
        Err(e) => {
            error!(stage = %stage, error = %e, "Delivery failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({"error": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryMode, HEADER_SOURCE, HEADER_SUBJECT, HEADER_TYPE};
    use crate::pipeline::types::{Envelope, Route, StageKind};
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Routes to finance unless the content says "bad".
    struct FinanceOrFail;

    #[async_trait]
    impl Stage for FinanceOrFail {
        fn kind(&self) -> StageKind {
            StageKind::Classification
        }

        async fn process(&self, mut envelope: Envelope) -> Envelope {
            if envelope.content.contains("bad") {
                envelope.record_error("router:oracle-failed: boom");
                envelope.route = Some(Route::Unknown);
            } else {
                envelope.route = Some(Route::Finance);
            }
            envelope
        }
    }

    fn app(delivery: DeliveryAdapter) -> Router {
        stage_routes(Arc::new(FinanceOrFail), Arc::new(delivery))
    }

    fn envelope_body(content: &str) -> String {
        serde_json::json!({
            "message_id": "m-42",
            "content": content,
            "timestamp": "2024-05-01T10:00:00Z",
            "errors": ["guardian:detected:profanity"]
        })
        .to_string()
    }

    fn post_json(body: String) -> Request<Body> {
        Request::post("/")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn reply_mode_returns_envelope_and_metadata() {
        let response = app(DeliveryAdapter::reply())
            .oneshot(post_json(envelope_body("invoice please")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(headers[HEADER_TYPE], "com.example.triage.routed.finance");
        assert_eq!(headers[HEADER_SOURCE], "/services/router-processor");
        assert_eq!(headers[HEADER_SUBJECT], "m-42");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let env: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(env.route, Some(Route::Finance));
        assert_eq!(env.errors().len(), 1);
    }

    #[tokio::test]
    async fn new_error_routes_to_review() {
        let response = app(DeliveryAdapter::reply())
            .oneshot(post_json(envelope_body("bad news")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[HEADER_TYPE],
            "com.example.triage.review.required"
        );
    }

    #[tokio::test]
    async fn non_json_is_unsupported() {
        let request = Request::post("/")
            .header("content-type", "text/plain")
            .body(Body::from("hello"))
            .unwrap();
        let response = app(DeliveryAdapter::reply()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn invalid_envelope_names_the_violation() {
        let body = serde_json::json!({
            "message_id": "m-1",
            "content": "hi",
            "timestamp": "2024-05-01T10:00:00Z",
            "route": "legal"
        })
        .to_string();
        let response = app(DeliveryAdapter::reply()).oneshot(post_json(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json["error"].as_str().unwrap().contains("legal"));
    }

    #[tokio::test]
    async fn failed_push_is_not_acknowledged() {
        let delivery = DeliveryAdapter::new(
            DeliveryMode::Push {
                sink: "http://127.0.0.1:9/".into(),
            },
            Duration::from_secs(2),
        )
        .unwrap();
        let response = app(delivery)
            .oneshot(post_json(envelope_body("invoice please")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let response = app(DeliveryAdapter::reply())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"OK");
    }
}
