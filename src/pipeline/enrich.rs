//! Enrichment stage: customer lookup by extracted email address.
//!
//! Merges directory fields into the structured record one field at a time;
//! an empty value from the directory never blanks an existing field.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::pipeline::types::{Envelope, Stage, StageKind, StructuredRecord};
use crate::store::{CustomerDirectory, CustomerRecord};

/// Default bound on a single directory lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Customer lookup against the directory.
pub struct EnrichmentStage {
    directory: Arc<dyn CustomerDirectory>,
    timeout: Duration,
}

impl EnrichmentStage {
    pub fn new(directory: Arc<dyn CustomerDirectory>) -> Self {
        Self {
            directory,
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Stage for EnrichmentStage {
    fn kind(&self) -> StageKind {
        StageKind::Enrichment
    }

    async fn process(&self, mut envelope: Envelope) -> Envelope {
        let email = envelope
            .structured
            .as_ref()
            .and_then(|s| s.email_address.as_deref())
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        let Some(email) = email else {
            warn!(message_id = %envelope.message_id, "No email address to look up");
            envelope.record_error("customer-lookup:missing-email");
            return envelope;
        };

        info!(message_id = %envelope.message_id, email = %email, "Looking up customer");

        let lookup = tokio::time::timeout(self.timeout, self.directory.find_by_email(&email)).await;

        match lookup {
            Ok(Ok(Some(customer))) => {
                info!(
                    message_id = %envelope.message_id,
                    customer_id = %customer.customer_id,
                    "Customer found"
                );
                let structured = envelope.structured.get_or_insert_with(StructuredRecord::default);
                merge_customer(structured, &customer);
            }
            Ok(Ok(None)) => {
                warn!(message_id = %envelope.message_id, email = %email, "Customer not found");
                envelope.record_error("customer-lookup:not-found");
            }
            Ok(Err(e)) => {
                let entry = format!("customer-lookup:query-failed: {e}");
                error!(message_id = %envelope.message_id, error = %entry, "Customer lookup failed");
                envelope.record_error(entry);
            }
            Err(_) => {
                let entry = format!(
                    "customer-lookup:query-failed: timed out after {:?}",
                    self.timeout
                );
                error!(message_id = %envelope.message_id, error = %entry, "Customer lookup timed out");
                envelope.record_error(entry);
            }
        }

        envelope
    }
}

/// Field-level merge of a directory row into an extracted record.
///
/// `company_id` is always taken from the row. Every other field is only
/// overwritten when the row carries a non-empty value for it.
pub fn merge_customer(structured: &mut StructuredRecord, customer: &CustomerRecord) {
    structured.company_id = Some(customer.customer_id.clone());
    merge_field(&mut structured.company_name, customer.company_name.as_deref());
    merge_field(&mut structured.customer_name, customer.contact_name.as_deref());
    merge_field(&mut structured.country, customer.country.as_deref());
    merge_field(&mut structured.phone, customer.phone.as_deref());
}

fn merge_field(target: &mut Option<String>, value: Option<&str>) {
    if let Some(v) = value
        && !v.trim().is_empty()
    {
        *target = Some(v.to_string());
    }
}
