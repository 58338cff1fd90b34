//! Outcome routing: picks the event kind for an envelope after a stage ran.
//!
//! A stage that appended any error sends the envelope to review regardless
//! of which stage it was. Otherwise each stage has one success kind, except
//! classification which branches on the route it chose.

use std::fmt;

use tracing::error;

use crate::pipeline::types::{Envelope, ErrorLog, Route, StageKind, StageOutcome};

/// Namespace shared by every event kind.
pub const EVENT_NAMESPACE: &str = "com.example.triage";

/// What happened to an envelope at one hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    IntakeNew,
    GuardianPassed,
    Structured,
    CustomerFound,
    RoutedSupport,
    RoutedFinance,
    RoutedWebsite,
    ReviewRequired,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::IntakeNew,
        EventKind::GuardianPassed,
        EventKind::Structured,
        EventKind::CustomerFound,
        EventKind::RoutedSupport,
        EventKind::RoutedFinance,
        EventKind::RoutedWebsite,
        EventKind::ReviewRequired,
    ];

    /// Fully-qualified event type string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntakeNew => "com.example.triage.intake.new",
            Self::GuardianPassed => "com.example.triage.guardian.passed",
            Self::Structured => "com.example.triage.structured",
            Self::CustomerFound => "com.example.triage.customer.found",
            Self::RoutedSupport => "com.example.triage.routed.support",
            Self::RoutedFinance => "com.example.triage.routed.finance",
            Self::RoutedWebsite => "com.example.triage.routed.website",
            Self::ReviewRequired => "com.example.triage.review.required",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Success kind for a classified route. `Unknown` goes to review.
fn routed_kind(route: Route) -> EventKind {
    match route {
        Route::Support => EventKind::RoutedSupport,
        Route::Finance => EventKind::RoutedFinance,
        Route::Website => EventKind::RoutedWebsite,
        Route::Unknown => EventKind::ReviewRequired,
    }
}

/// Compute the next event kind from the error log before the stage ran and
/// the envelope it returned.
pub fn next_event_kind(stage: StageKind, errors_before: &ErrorLog, after: &Envelope) -> EventKind {
    if after.errors().len() > errors_before.len() {
        return EventKind::ReviewRequired;
    }

    match stage {
        StageKind::Intake => EventKind::IntakeNew,
        StageKind::Screening => EventKind::GuardianPassed,
        StageKind::Extraction => EventKind::Structured,
        StageKind::Enrichment => EventKind::CustomerFound,
        StageKind::Classification => match after.route {
            Some(route) => routed_kind(route),
            None => {
                error!(
                    message_id = %after.message_id,
                    "Classification finished without setting a route"
                );
                EventKind::ReviewRequired
            }
        },
    }
}

/// Route a captured stage outcome.
pub fn route_outcome(outcome: &StageOutcome) -> EventKind {
    next_event_kind(outcome.stage, outcome.errors_before(), &outcome.envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAGES: [StageKind; 5] = [
        StageKind::Intake,
        StageKind::Screening,
        StageKind::Extraction,
        StageKind::Classification,
        StageKind::Enrichment,
    ];

    #[test]
    fn new_error_from_any_stage_requires_review() {
        let mut after = Envelope::new("text");
        after.route = Some(Route::Finance);
        after.record_error("x");

        for stage in STAGES {
            assert_eq!(
                next_event_kind(stage, &ErrorLog::new(), &after),
                EventKind::ReviewRequired,
                "stage {stage}"
            );
        }
    }

    #[test]
    fn inherited_errors_do_not_trigger_review() {
        let mut after = Envelope::new("text");
        after.record_error("guardian:detected:profanity");
        let before = after.errors().clone();

        assert_eq!(
            next_event_kind(StageKind::Extraction, &before, &after),
            EventKind::Structured
        );
    }

    #[test]
    fn clean_stages_map_to_their_success_kind() {
        let after = Envelope::new("text");
        let empty = ErrorLog::new();
        assert_eq!(next_event_kind(StageKind::Intake, &empty, &after), EventKind::IntakeNew);
        assert_eq!(
            next_event_kind(StageKind::Screening, &empty, &after),
            EventKind::GuardianPassed
        );
        assert_eq!(
            next_event_kind(StageKind::Extraction, &empty, &after),
            EventKind::Structured
        );
        assert_eq!(
            next_event_kind(StageKind::Enrichment, &empty, &after),
            EventKind::CustomerFound
        );
    }

    #[test]
    fn classification_branches_on_route() {
        let empty = ErrorLog::new();
        let cases = [
            (Route::Support, "com.example.triage.routed.support"),
            (Route::Finance, "com.example.triage.routed.finance"),
            (Route::Website, "com.example.triage.routed.website"),
            (Route::Unknown, "com.example.triage.review.required"),
        ];
        for (route, expected) in cases {
            let mut after = Envelope::new("text");
            after.route = Some(route);
            assert_eq!(
                next_event_kind(StageKind::Classification, &empty, &after).as_str(),
                expected
            );
        }
    }

    #[test]
    fn classification_without_route_requires_review() {
        let after = Envelope::new("text");
        assert_eq!(
            next_event_kind(StageKind::Classification, &ErrorLog::new(), &after),
            EventKind::ReviewRequired
        );
    }

    #[test]
    fn outcome_uses_captured_error_log() {
        let mut env = Envelope::new("text");
        env.record_error("earlier");
        let before = env.errors().clone();
        env.record_error("customer-lookup:not-found");

        let outcome = StageOutcome::new(StageKind::Enrichment, before, env);
        assert_eq!(route_outcome(&outcome), EventKind::ReviewRequired);
    }

    #[test]
    fn every_kind_is_namespaced() {
        for kind in EventKind::ALL {
            assert!(kind.as_str().starts_with(EVENT_NAMESPACE));
        }
    }
}
