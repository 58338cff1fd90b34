//! Extraction stage: one oracle call turns free text into a structured record.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::pipeline::types::{Envelope, Stage, StageKind, StructuredRecord};

const EXTRACT_MAX_TOKENS: u32 = 512;

/// Fields the model is allowed to fill. Enrichment-only fields are not
/// accepted from the oracle.
#[derive(Debug, Deserialize)]
struct ExtractedFields {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    product_name: Option<String>,
    #[serde(default)]
    sentiment: Option<String>,
    #[serde(default)]
    escalate: Option<bool>,
}

impl From<ExtractedFields> for StructuredRecord {
    fn from(f: ExtractedFields) -> Self {
        Self {
            reason: non_empty(f.reason),
            customer_name: non_empty(f.customer_name),
            email_address: non_empty(f.email_address),
            product_name: non_empty(f.product_name),
            sentiment: non_empty(f.sentiment),
            escalate: f.escalate,
            ..Default::default()
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Structured field extraction from a customer support email.
pub struct ExtractionStage {
    llm: Arc<dyn LlmProvider>,
}

impl ExtractionStage {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for ExtractionStage {
    fn kind(&self) -> StageKind {
        StageKind::Extraction
    }

    async fn process(&self, mut envelope: Envelope) -> Envelope {
        info!(message_id = %envelope.message_id, "Starting LLM structure processing");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_extraction_system_prompt()),
            ChatMessage::user(envelope.content.as_str()),
        ])
        .with_temperature(0.0)
        .with_max_tokens(EXTRACT_MAX_TOKENS)
        .with_json_mode();

        let response = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                let entry = format!("structure:oracle-failed: {e}");
                error!(message_id = %envelope.message_id, error = %entry, "LLM call failed");
                envelope.record_error(entry);
                return envelope;
            }
        };

        match parse_extraction(&response.content) {
            Ok(record) => {
                info!(
                    message_id = %envelope.message_id,
                    structured = ?record,
                    "Successfully extracted structure"
                );
                envelope.structured = Some(record);
            }
            Err(reason) => {
                let entry = format!("structure:malformed-response: {reason}");
                error!(
                    message_id = %envelope.message_id,
                    raw_response = %response.content,
                    error = %entry,
                    "Failed to parse extraction response"
                );
                envelope.record_error(entry);
            }
        }

        envelope
    }
}

fn build_extraction_system_prompt() -> String {
    "You are a world-class text analysis expert. Extract the information precisely \
     into the provided JSON format. The message is a customer support email.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"reason\": \"...\", \"customer_name\": \"...\", \"email_address\": \"...\", \
     \"product_name\": \"...\", \"sentiment\": \"...\", \"escalate\": false}\n\n\
     Rules:\n\
     - \"reason\" is one sentence describing why the customer wrote\n\
     - \"sentiment\" is one of positive, neutral, negative\n\
     - \"escalate\" is true only for angry customers or urgent outages\n\
     - Use null for anything the message does not state"
        .to_string()
}

fn parse_extraction(raw: &str) -> Result<StructuredRecord, String> {
    let json = extract_json_object(raw);
    let fields: ExtractedFields =
        serde_json::from_str(&json).map_err(|e| format!("JSON parse error: {e}"))?;
    Ok(fields.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;

    struct FixedLlm(Result<&'static str, ()>);

    #[async_trait]
    impl LlmProvider for FixedLlm {
        fn model_name(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            match self.0 {
                Ok(content) => Ok(CompletionResponse {
                    content: content.into(),
                    input_tokens: 0,
                    output_tokens: 0,
                }),
                Err(()) => Err(LlmError::Timeout {
                    provider: "fixed".into(),
                    timeout: std::time::Duration::from_secs(30),
                }),
            }
        }
    }

    #[test]
    fn prompt_lists_all_fields() {
        let prompt = build_extraction_system_prompt();
        for field in ["reason", "customer_name", "email_address", "product_name", "sentiment", "escalate"] {
            assert!(prompt.contains(field), "missing {field}");
        }
    }

    #[tokio::test]
    async fn stores_record_on_success() {
        let stage = ExtractionStage::new(Arc::new(FixedLlm(Ok(
            r#"{"reason":"Refund request","customer_name":"Jo Bloggs","email_address":"jo@acme.test","product_name":null,"sentiment":"negative","escalate":true}"#,
        ))));

        let env = stage.process(Envelope::new("I want a refund")).await;

        assert!(env.errors().is_empty());
        let s = env.structured.unwrap();
        assert_eq!(s.email_address.as_deref(), Some("jo@acme.test"));
        assert_eq!(s.escalate, Some(true));
        assert!(s.product_name.is_none());
        assert!(s.company_id.is_none());
    }

    #[tokio::test]
    async fn partial_extraction_is_valid() {
        let stage = ExtractionStage::new(Arc::new(FixedLlm(Ok(
            "```json\n{\"reason\": \"Login broken\", \"customer_name\": \"\"}\n```",
        ))));

        let env = stage.process(Envelope::new("cannot log in")).await;

        let s = env.structured.as_ref().unwrap();
        assert_eq!(s.reason.as_deref(), Some("Login broken"));
        assert!(s.customer_name.is_none());
        assert!(env.errors().is_empty());
    }

    #[tokio::test]
    async fn malformed_output_leaves_structured_absent() {
        let stage = ExtractionStage::new(Arc::new(FixedLlm(Ok("I could not find anything"))));

        let env = stage.process(Envelope::new("hello")).await;

        assert!(env.structured.is_none());
        assert_eq!(env.errors().len(), 1);
        assert!(env.errors().as_slice()[0].starts_with("structure:malformed-response:"));
    }

    #[tokio::test]
    async fn oracle_timeout_becomes_error_entry() {
        let stage = ExtractionStage::new(Arc::new(FixedLlm(Err(()))));

        let env = stage.process(Envelope::new("hello")).await;

        assert!(env.structured.is_none());
        assert_eq!(env.errors().len(), 1);
        assert!(env.errors().as_slice()[0].starts_with("structure:oracle-failed:"));
    }
}
