//! Classification stage: picks the team that should handle the message.
//!
//! Always leaves `route` populated: any oracle failure falls back to
//! `Route::Unknown` and appends one error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, extract_json_object};
use crate::pipeline::types::{Envelope, Route, Stage, StageKind};

const CLASSIFY_MAX_TOKENS: u32 = 256;

#[derive(Debug, Deserialize)]
struct SelectedRoute {
    route: String,
    #[serde(default)]
    justification: String,
}

/// LLM-backed route classification.
pub struct ClassificationStage {
    llm: Arc<dyn LlmProvider>,
}

impl ClassificationStage {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    async fn classify(&self, content: &str) -> Result<(Route, String), String> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classification_system_prompt()),
            ChatMessage::user(format!(
                "Classify the following email message and determine the appropriate routing category.\n\nMESSAGE:\n{content}"
            )),
        ])
        .with_temperature(0.0)
        .with_max_tokens(CLASSIFY_MAX_TOKENS)
        .with_json_mode();

        let response = self
            .llm
            .complete(request)
            .await
            .map_err(|e| format!("router:oracle-failed: {e}"))?;

        parse_classification(&response.content)
            .map_err(|e| format!("router:malformed-response: {e}"))
    }
}

#[async_trait]
impl Stage for ClassificationStage {
    fn kind(&self) -> StageKind {
        StageKind::Classification
    }

    async fn process(&self, mut envelope: Envelope) -> Envelope {
        info!(message_id = %envelope.message_id, "Starting LLM routing classification");

        match self.classify(&envelope.content).await {
            Ok((route, justification)) => {
                info!(
                    message_id = %envelope.message_id,
                    route = %route,
                    justification = %justification,
                    "Successfully classified route"
                );
                envelope.route = Some(route);
            }
            Err(entry) => {
                error!(message_id = %envelope.message_id, error = %entry, "Router classification failed");
                envelope.record_error(entry);
                envelope.route = Some(Route::Unknown);
            }
        }

        envelope
    }
}

fn build_classification_system_prompt() -> String {
    "You are an AI-powered message classifier for an enterprise support system. \
     Your task is to analyze email messages and determine the most appropriate team for handling them:\n\
     - \"support\": Issues related to technical support, product usage, and troubleshooting.\n\
     - \"finance\": Questions about billing, invoices, receipts, payments, refunds, or financial disputes.\n\
     - \"website\": Issues related to website functionality, login problems, password reset, account access, or technical errors on the website.\n\
     - \"unknown\": If the message does not fit into any of the above categories or lacks sufficient context to classify accurately.\n\n\
     Respond with ONLY a JSON object:\n\
     {\"route\": \"support|finance|website|unknown\", \"justification\": \"...\"}"
        .to_string()
}

fn parse_classification(raw: &str) -> Result<(Route, String), String> {
    let json = extract_json_object(raw);
    let selected: SelectedRoute =
        serde_json::from_str(&json).map_err(|e| format!("JSON parse error: {e}"))?;
    let route = selected.route.parse::<Route>().map_err(|e| e.to_string())?;
    Ok((route, selected.justification))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;

    struct Canned(Option<&'static str>);

    #[async_trait]
    impl LlmProvider for Canned {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.0
                .map(|content| CompletionResponse {
                    content: content.into(),
                    input_tokens: 0,
                    output_tokens: 0,
                })
                .ok_or_else(|| LlmError::RequestFailed {
                    provider: "canned".into(),
                    reason: "503".into(),
                })
        }
    }

    async fn classify_with(answer: Option<&'static str>) -> Envelope {
        let mut input = Envelope::new("Please resend invoice #4411");
        input.record_error("earlier:entry");
        ClassificationStage::new(Arc::new(Canned(answer)))
            .process(input)
            .await
    }

    #[test]
    fn prompt_enumerates_every_route() {
        let prompt = build_classification_system_prompt();
        for route in Route::ALL {
            assert!(prompt.contains(route.as_str()));
        }
    }

    #[tokio::test]
    async fn sets_route_from_oracle() {
        let env = classify_with(Some(r#"{"route": "finance", "justification": "invoice"}"#)).await;
        assert_eq!(env.route, Some(Route::Finance));
        assert_eq!(env.errors().len(), 1);
    }

    #[tokio::test]
    async fn oracle_failure_defaults_to_unknown() {
        let env = classify_with(None).await;
        assert_eq!(env.route, Some(Route::Unknown));
        assert_eq!(env.errors().len(), 2);
        assert_eq!(env.errors().as_slice()[0], "earlier:entry");
        assert!(env.errors().as_slice()[1].starts_with("router:oracle-failed:"));
    }

    #[tokio::test]
    async fn out_of_enum_answer_defaults_to_unknown() {
        let env = classify_with(Some(r#"{"route": "legal"}"#)).await;
        assert_eq!(env.route, Some(Route::Unknown));
        assert!(env.errors().as_slice()[1].starts_with("router:malformed-response:"));
    }

    #[tokio::test]
    async fn route_is_never_absent() {
        for answer in [
            Some(r#"{"route":"support"}"#),
            Some(r#"{"route":"Website"}"#),
            Some("nonsense"),
            None,
        ] {
            let env = classify_with(answer).await;
            assert!(env.route.is_some());
        }
    }
}
