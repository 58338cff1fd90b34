//! Screening stage: checks content against every configured harm category.
//!
//! One oracle call per category, issued serially in configuration order.
//! Every affirmed category appends `guardian:detected:<category>`; there is
//! no short-circuit on the first hit.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{Envelope, Stage, StageKind};

/// Harm categories checked when none are configured.
pub const DEFAULT_HARM_CATEGORIES: &[&str] = &["violence", "social_bias", "profanity"];

/// Only a one-word answer is needed.
const SCREEN_MAX_TOKENS: u32 = 5;

static AFFIRMATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\byes\b").expect("static regex"));

/// Harm screening against a guardian model.
pub struct ScreeningStage {
    llm: Arc<dyn LlmProvider>,
    categories: Vec<String>,
}

impl ScreeningStage {
    pub fn new(llm: Arc<dyn LlmProvider>, categories: Vec<String>) -> Self {
        Self { llm, categories }
    }

    /// Screening with the default category set.
    pub fn with_defaults(llm: Arc<dyn LlmProvider>) -> Self {
        Self::new(
            llm,
            DEFAULT_HARM_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        )
    }
}

#[async_trait]
impl Stage for ScreeningStage {
    fn kind(&self) -> StageKind {
        StageKind::Screening
    }

    async fn process(&self, mut envelope: Envelope) -> Envelope {
        info!(message_id = %envelope.message_id, "Starting guardian screening");

        for harm in &self.categories {
            debug!(message_id = %envelope.message_id, harm = %harm, "Checking for harm");

            let request = CompletionRequest::new(vec![
                ChatMessage::system(harm.as_str()),
                ChatMessage::user(envelope.content.as_str()),
            ])
            .with_temperature(0.0)
            .with_max_tokens(SCREEN_MAX_TOKENS);

            match self.llm.complete(request).await {
                Ok(response) => {
                    let answer = response.content.trim().to_lowercase();
                    info!(
                        message_id = %envelope.message_id,
                        harm = %harm,
                        answer = %answer,
                        "Guardian check returned"
                    );
                    if affirms(&answer) {
                        let entry = format!("guardian:detected:{harm}");
                        warn!(message_id = %envelope.message_id, error = %entry, "Harm detected");
                        envelope.record_error(entry);
                    }
                }
                Err(e) => {
                    // A failed check leaves later categories unattributable.
                    let entry = format!("guardian:oracle-failed:{harm}: {e}");
                    error!(message_id = %envelope.message_id, error = %entry, "Guardian LLM call failed");
                    envelope.record_error(entry);
                    break;
                }
            }
        }

        envelope
    }
}

/// True if the guardian answer affirms the category.
fn affirms(answer: &str) -> bool {
    AFFIRMATIVE.is_match(answer)
}
