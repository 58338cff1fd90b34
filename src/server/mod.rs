//! HTTP surface for every service: stage endpoints, ingress, observers.

pub mod intake;
pub mod observer;
pub mod stage;

use axum::{
    Json,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::error::SchemaError;

pub use intake::intake_routes;
pub use observer::{RelayFormat, RelayedEvent, observer_routes};
pub use stage::stage_routes;

// ── Health ──────────────────────────────────────────────────────────────

pub(crate) async fn healthz() -> &'static str {
    "OK"
}

// ── Request helpers ─────────────────────────────────────────────────────

/// True if the request declares a JSON body (`application/json`, any params).
pub(crate) fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

pub(crate) fn unsupported_media_type() -> Response {
    (
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Json(serde_json::json!({"error": "Content-Type must be application/json"})),
    )
        .into_response()
}

pub(crate) fn schema_rejection(err: &SchemaError) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": err.to_string()})),
    )
        .into_response()
}
