//! Configuration types.
//!
//! Everything is read once from the environment at start-up. `from_lookup`
//! takes the lookup as a closure so tests do not touch process state.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::delivery::{DEFAULT_DELIVERY_TIMEOUT, DeliveryMode};
use crate::error::ConfigError;
use crate::hub::{DEFAULT_HISTORY_CAPACITY, DEFAULT_SUBSCRIBER_QUEUE};
use crate::llm::LlmConfig;
use crate::llm::openai_compat::DEFAULT_TIMEOUT as DEFAULT_ORACLE_TIMEOUT;
use crate::pipeline::screen::DEFAULT_HARM_CATEGORIES;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DB_PATH: &str = "./data/customers.db";
const DEFAULT_API_KEY: &str = "not-needed";
const DEFAULT_MODEL_NAME: &str = "not-set";

/// Which service this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Intake,
    Screener,
    Extractor,
    Classifier,
    Enricher,
    Observer,
    FinanceInbox,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Screener => "screener",
            Self::Extractor => "extractor",
            Self::Classifier => "classifier",
            Self::Enricher => "enricher",
            Self::Observer => "observer",
            Self::FinanceInbox => "finance-inbox",
        }
    }

    /// True for services that call the LLM oracle.
    pub fn needs_llm(&self) -> bool {
        matches!(self, Self::Screener | Self::Extractor | Self::Classifier)
    }
}

impl FromStr for ServiceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "intake" => Ok(Self::Intake),
            "screener" | "guardian" => Ok(Self::Screener),
            "extractor" | "structure" => Ok(Self::Extractor),
            "classifier" | "router" => Ok(Self::Classifier),
            "enricher" | "customer-lookup" => Ok(Self::Enricher),
            "observer" => Ok(Self::Observer),
            "finance-inbox" | "finance" => Ok(Self::FinanceInbox),
            other => Err(ConfigError::InvalidValue {
                key: "TRIAGE_SERVICE".into(),
                message: format!("unknown service '{other}'"),
            }),
        }
    }
}

/// Process configuration for any one service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service: ServiceKind,
    pub port: u16,
    /// How stage services hand on processed envelopes.
    pub delivery: DeliveryMode,
    /// Sink address (`K_SINK`). Required for push delivery and for intake.
    pub sink: Option<String>,
    pub delivery_timeout: Duration,
    /// Present only for services that call the oracle.
    pub llm: Option<LlmConfig>,
    pub harm_categories: Vec<String>,
    pub db_path: PathBuf,
    pub history_capacity: usize,
    pub subscriber_queue: usize,
}

impl ServiceConfig {
    /// Load from process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` for each key. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let service: ServiceKind = get("TRIAGE_SERVICE")
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "TRIAGE_SERVICE".into(),
                hint: "Set it to one of intake, screener, extractor, classifier, enricher, observer, finance-inbox".into(),
            })?
            .parse()?;

        let port = parse_or(&get, "PORT", DEFAULT_PORT)?;
        let sink = get("K_SINK");

        let delivery = match get("TRIAGE_DELIVERY").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("reply") => DeliveryMode::Reply,
            Some("push") => DeliveryMode::Push {
                sink: sink.clone().ok_or_else(|| ConfigError::MissingRequired {
                    key: "K_SINK".into(),
                    hint: "Push delivery needs a sink address".into(),
                })?,
            },
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "TRIAGE_DELIVERY".into(),
                    message: format!("expected reply or push, got '{other}'"),
                });
            }
        };

        if service == ServiceKind::Intake && sink.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "K_SINK".into(),
                hint: "Intake always publishes to a sink".into(),
            });
        }

        let delivery_timeout = Duration::from_secs(parse_or(
            &get,
            "TRIAGE_DELIVERY_TIMEOUT_SECS",
            DEFAULT_DELIVERY_TIMEOUT.as_secs(),
        )?);

        let llm = if service.needs_llm() {
            let base_url = get("LLM_API_BASE_URL").ok_or_else(|| ConfigError::MissingRequired {
                key: "LLM_API_BASE_URL".into(),
                hint: "Point it at an OpenAI-compatible /v1 endpoint".into(),
            })?;
            let model = get("LLM_MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string());
            let timeout = Duration::from_secs(parse_or(
                &get,
                "TRIAGE_ORACLE_TIMEOUT_SECS",
                DEFAULT_ORACLE_TIMEOUT.as_secs(),
            )?);
            Some(LlmConfig {
                base_url,
                api_key: SecretString::from(
                    get("LLM_API_KEY").unwrap_or_else(|| DEFAULT_API_KEY.to_string()),
                ),
                model,
                timeout,
            })
        } else {
            None
        };

        let harm_categories = match get("TRIAGE_HARM_CATEGORIES") {
            Some(list) => {
                let categories: Vec<String> = list
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if categories.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: "TRIAGE_HARM_CATEGORIES".into(),
                        message: "no categories listed".into(),
                    });
                }
                categories
            }
            None => DEFAULT_HARM_CATEGORIES.iter().map(|c| c.to_string()).collect(),
        };

        Ok(Self {
            service,
            port,
            delivery,
            sink,
            delivery_timeout,
            llm,
            harm_categories,
            db_path: PathBuf::from(get("TRIAGE_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string())),
            history_capacity: parse_or(&get, "TRIAGE_HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY)?,
            subscriber_queue: parse_or(&get, "TRIAGE_SUBSCRIBER_QUEUE", DEFAULT_SUBSCRIBER_QUEUE)?,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}
