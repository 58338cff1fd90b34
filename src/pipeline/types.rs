//! Shared types for the triage pipeline: the envelope, its parts, and the
//! per-stage processing contract.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SchemaError;

// ── Route ───────────────────────────────────────────────────────────

/// Classification outcome. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Support,
    Finance,
    Website,
    Unknown,
}

impl Route {
    pub const ALL: [Route; 4] = [Route::Support, Route::Finance, Route::Website, Route::Unknown];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Support => "support",
            Self::Finance => "finance",
            Self::Website => "website",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Route {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "support" => Ok(Self::Support),
            "finance" => Ok(Self::Finance),
            "website" => Ok(Self::Website),
            "unknown" => Ok(Self::Unknown),
            _ => Err(SchemaError::InvalidRoute(s.to_string())),
        }
    }
}

// ── Structured record ───────────────────────────────────────────────

/// Fields extracted from the message content, later enriched from the
/// customer directory. Every field may be absent: partial extraction is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default)]
    pub escalate: Option<bool>,
    #[serde(default)]
    pub company_id: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

// ── Error log ───────────────────────────────────────────────────────

/// Ordered, append-only list of failures observed by any stage.
///
/// There is no way to remove, replace or reorder an entry once pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorLog(Vec<String>);

impl ErrorLog {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        self.0.push(entry.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    /// Entries appended after the log had `mark` entries.
    pub fn since(&self, mark: usize) -> &[String] {
        self.0.get(mark..).unwrap_or(&[])
    }

    /// True if `earlier` is an exact prefix of this log.
    pub fn extends(&self, earlier: &ErrorLog) -> bool {
        self.0.starts_with(&earlier.0)
    }
}

impl From<Vec<String>> for ErrorLog {
    fn from(entries: Vec<String>) -> Self {
        Self(entries)
    }
}

// ── Envelope ────────────────────────────────────────────────────────

/// The unit of work threaded through every stage.
///
/// `message_id` is the correlation key for one triage case across all stages
/// and broadcast events. The error log is private so it can only grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub structured: Option<StructuredRecord>,
    #[serde(default)]
    pub route: Option<Route>,
    #[serde(default)]
    pub support: Option<serde_json::Value>,
    #[serde(default)]
    pub website: Option<serde_json::Value>,
    #[serde(default)]
    pub finance: Option<serde_json::Value>,
    #[serde(default, alias = "error")]
    errors: ErrorLog,
}

impl Envelope {
    /// Create a fresh envelope at ingress: new id, current timestamp, no errors.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            content: content.into(),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
            structured: None,
            route: None,
            support: None,
            website: None,
            finance: None,
            errors: ErrorLog::new(),
        }
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    /// Append one failure to the error log.
    pub fn record_error(&mut self, entry: impl Into<String>) {
        self.errors.push(entry);
    }
}

// ── Stages ──────────────────────────────────────────────────────────

/// Identity of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Intake,
    Screening,
    Extraction,
    Classification,
    Enrichment,
}

impl StageKind {
    /// Source identity carried in event metadata.
    pub fn source(&self) -> &'static str {
        match self {
            Self::Intake => "/services/svc-intake",
            Self::Screening => "/services/guardian-processor",
            Self::Extraction => "/services/structure-processor",
            Self::Classification => "/services/router-processor",
            Self::Enrichment => "/services/customer-lookup-processor",
        }
    }

    /// Namespace prefix for error strings appended by this stage.
    pub fn error_prefix(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Screening => "guardian",
            Self::Extraction => "structure",
            Self::Classification => "router",
            Self::Enrichment => "customer-lookup",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Screening => "screening",
            Self::Extraction => "extraction",
            Self::Classification => "classification",
            Self::Enrichment => "enrichment",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One processing step.
///
/// `process` never fails: every internal failure becomes exactly one entry
/// appended to the envelope's error log, and the envelope is returned.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn process(&self, envelope: Envelope) -> Envelope;
}

/// Envelope after one stage ran, plus the error log as it was before.
#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: StageKind,
    pub envelope: Envelope,
    errors_before: ErrorLog,
}

impl StageOutcome {
    pub fn new(stage: StageKind, errors_before: ErrorLog, envelope: Envelope) -> Self {
        Self {
            stage,
            envelope,
            errors_before,
        }
    }

    pub fn errors_before(&self) -> &ErrorLog {
        &self.errors_before
    }

    /// Errors this stage appended.
    pub fn new_errors(&self) -> &[String] {
        self.envelope.errors().since(self.errors_before.len())
    }

    /// True if the stage appended no errors.
    pub fn is_clean(&self) -> bool {
        self.envelope.errors().len() <= self.errors_before.len()
    }
}

/// Run one stage and capture its outcome.
pub async fn run_stage(stage: &dyn Stage, envelope: Envelope) -> StageOutcome {
    let kind = stage.kind();
    let before = envelope.errors().clone();
    let message_id = envelope.message_id.clone();

    let processed = stage.process(envelope).await;

    debug_assert!(
        processed.errors().extends(&before),
        "stage {kind} rewrote existing error entries"
    );
    debug_assert_eq!(processed.message_id, message_id);

    StageOutcome::new(kind, before, processed)
}
