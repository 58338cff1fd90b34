//! Delivery adapter: wraps a processed envelope in event metadata and hands
//! it onward.
//!
//! Two shapes share the same stage and routing code:
//! - `Reply`: the handler returns the envelope and metadata to the caller,
//!   which performs delivery.
//! - `Push`: the adapter POSTs the envelope to a sink itself and the handler
//!   only acknowledges. A failed push is an error, never an acknowledgement.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::pipeline::router::EventKind;
use crate::pipeline::types::{Envelope, StageOutcome};

/// Event metadata spec version, fixed.
pub const SPEC_VERSION: &str = "1.0";

/// Default bound on one push round trip.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

pub const HEADER_SPECVERSION: &str = "ce-specversion";
pub const HEADER_TYPE: &str = "ce-type";
pub const HEADER_SOURCE: &str = "ce-source";
pub const HEADER_ID: &str = "ce-id";
pub const HEADER_SUBJECT: &str = "ce-subject";

/// Used when a relayed event carries no type header.
pub const UNKNOWN_TYPE: &str = "unknown-type";
/// Used when a relayed event carries no subject header.
pub const UNKNOWN_SUBJECT: &str = "unknown-subject";

/// Routing metadata around one hop of an envelope. Carries no business data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    pub specversion: String,
    pub event_type: String,
    pub source: String,
    pub id: String,
    pub subject: String,
}

impl EventMetadata {
    /// Metadata for a new hop with a fresh event id.
    pub fn new(kind: EventKind, source: &str, subject: &str) -> Self {
        Self {
            specversion: SPEC_VERSION.to_string(),
            event_type: kind.as_str().to_string(),
            source: source.to_string(),
            id: Uuid::new_v4().to_string(),
            subject: subject.to_string(),
        }
    }

    /// Transport headers. Values that are not valid header text are skipped.
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            (HEADER_SPECVERSION, &self.specversion),
            (HEADER_TYPE, &self.event_type),
            (HEADER_SOURCE, &self.source),
            (HEADER_ID, &self.id),
            (HEADER_SUBJECT, &self.subject),
        ] {
            match HeaderValue::from_str(value) {
                Ok(v) => {
                    headers.insert(HeaderName::from_static(name), v);
                }
                Err(_) => debug!(header = name, "Skipping non-ASCII metadata header"),
            }
        }
        headers
    }

    /// Read metadata from inbound headers, defaulting what is missing.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            specversion: get(HEADER_SPECVERSION).unwrap_or_else(|| SPEC_VERSION.to_string()),
            event_type: get(HEADER_TYPE).unwrap_or_else(|| UNKNOWN_TYPE.to_string()),
            source: get(HEADER_SOURCE).unwrap_or_default(),
            id: get(HEADER_ID).unwrap_or_default(),
            subject: get(HEADER_SUBJECT).unwrap_or_else(|| UNKNOWN_SUBJECT.to_string()),
        }
    }
}

/// A finalized envelope and the metadata describing its next hop.
#[derive(Debug, Clone)]
pub struct ProcessedEvent {
    pub metadata: EventMetadata,
    pub envelope: Envelope,
}

impl ProcessedEvent {
    /// Wrap a stage outcome. Metadata reflects the post-processing envelope.
    pub fn from_outcome(outcome: StageOutcome, kind: EventKind) -> Self {
        let metadata = EventMetadata::new(
            kind,
            outcome.stage.source(),
            &outcome.envelope.message_id,
        );
        Self {
            metadata,
            envelope: outcome.envelope,
        }
    }
}

/// How processed envelopes leave a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    Reply,
    Push { sink: String },
}

/// Result of a successful delivery.
#[derive(Debug)]
pub enum Delivered {
    /// Caller must send this event onward.
    Reply(ProcessedEvent),
    /// Sink accepted the event.
    Pushed { event_id: String },
}

/// Delivers processed events in the configured mode.
pub struct DeliveryAdapter {
    mode: DeliveryMode,
    http: reqwest::Client,
}

impl DeliveryAdapter {
    pub fn new(mode: DeliveryMode, timeout: Duration) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;
        Ok(Self { mode, http })
    }

    /// Request-reply adapter; never touches the network.
    pub fn reply() -> Self {
        Self {
            mode: DeliveryMode::Reply,
            http: reqwest::Client::new(),
        }
    }

    pub async fn deliver(&self, event: ProcessedEvent) -> Result<Delivered, DeliveryError> {
        match &self.mode {
            DeliveryMode::Reply => {
                debug!(
                    message_id = %event.envelope.message_id,
                    event_type = %event.metadata.event_type,
                    "Returning event to caller"
                );
                Ok(Delivered::Reply(event))
            }
            DeliveryMode::Push { sink } => {
                let event_id = self.push(sink, &event).await?;
                Ok(Delivered::Pushed { event_id })
            }
        }
    }

    /// POST one event to `sink`. Anything but a 2xx is a failure.
    pub async fn push(&self, sink: &str, event: &ProcessedEvent) -> Result<String, DeliveryError> {
        if sink.is_empty() {
            return Err(DeliveryError::NoSink);
        }

        let body = serde_json::to_vec(&event.envelope)?;

        let response = self
            .http
            .post(sink)
            .headers(event.metadata.to_headers())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!(
                    message_id = %event.envelope.message_id,
                    sink = %sink,
                    error = %e,
                    "Failed to send event to sink"
                );
                DeliveryError::Unreachable {
                    sink: sink.to_string(),
                    reason: e.to_string(),
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(
                message_id = %event.envelope.message_id,
                sink = %sink,
                status = status.as_u16(),
                "Sink rejected event"
            );
            return Err(DeliveryError::Rejected {
                sink: sink.to_string(),
                status: status.as_u16(),
            });
        }

        info!(
            message_id = %event.envelope.message_id,
            event_id = %event.metadata.id,
            event_type = %event.metadata.event_type,
            "Event delivered"
        );
        Ok(event.metadata.id.clone())
    }
}
