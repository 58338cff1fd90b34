//! LLM integration: the oracle used by the screening, extraction and
//! classification stages.
//!
//! Stages only see the `LlmProvider` trait. The process builds one provider at
//! start-up and hands it to every stage behind an `Arc`.

pub mod openai_compat;
pub mod provider;

pub use openai_compat::OpenAiCompatProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub timeout: Duration,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OpenAiCompatProvider::new(config.clone())?;
    tracing::info!(
        "LLM client configured for model '{}' at '{}'",
        config.model,
        config.base_url
    );
    Ok(Arc::new(provider))
}
