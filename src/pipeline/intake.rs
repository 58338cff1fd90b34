//! Ingress: turns a raw submission into the first envelope of a case.

use serde_json::Value;
use tracing::info;

use crate::error::SchemaError;
use crate::pipeline::types::Envelope;
use crate::pipeline::validation::validate_ingress;

/// Admit a submission body: `{"content": "<non-empty string>", ...}`.
///
/// Assigns the case `message_id` and `timestamp`. Nothing else in the
/// submission is carried forward.
pub fn admit(body: &[u8]) -> Result<Envelope, SchemaError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| SchemaError::Malformed(e.to_string()))?;
    let content = validate_ingress(&value)?;
    let envelope = Envelope::new(content);
    info!(
        message_id = %envelope.message_id,
        content_len = envelope.content.len(),
        "Admitted new message"
    );
    Ok(envelope)
}
