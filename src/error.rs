//! Error types for the triage pipeline.
//!
//! Only `SchemaError` and `DeliveryError` ever escape a request handler.
//! Oracle and lookup failures are absorbed into the envelope's error log by
//! the stage that observed them.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Structural violation in an inbound envelope or ingress payload.
///
/// Names the first violation found; validation stops there.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' must be {expected}")]
    WrongType { field: String, expected: &'static str },

    #[error("field '{field}' must not be empty")]
    Empty { field: String },

    #[error("route '{0}' is not one of support, finance, website, unknown")]
    InvalidRoute(String),

    #[error("timestamp '{0}' is not an ISO-8601 date-time")]
    InvalidTimestamp(String),

    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Database (enrichment datastore) errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Oracle (LLM provider) errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Failure to hand a processed envelope to the next hop.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Push delivery requires a sink address but none is configured")]
    NoSink,

    #[error("Sink {sink} unreachable: {reason}")]
    Unreachable { sink: String, reason: String },

    #[error("Sink {sink} rejected event with HTTP {status}")]
    Rejected { sink: String, status: u16 },

    #[error("Failed to build delivery client: {0}")]
    Client(String),

    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}
