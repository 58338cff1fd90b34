//! Triage pipeline.
//!
//! Every message flows through independent stages, each of which takes an
//! `Envelope` and returns it, possibly extended and possibly annotated:
//! 1. `intake::admit()`: builds the envelope from a raw submission
//! 2. `ScreeningStage`: guardian harm checks
//! 3. `ExtractionStage`: structured fields from free text
//! 4. `ClassificationStage`: target team
//! 5. `EnrichmentStage`: customer directory lookup
//!
//! After each stage `router::route_outcome()` picks the event kind the
//! delivery adapter emits. Stages never fail; failures are appended to the
//! envelope's error log and send it to review.

pub mod classify;
pub mod enrich;
pub mod extract;
pub mod intake;
pub mod router;
pub mod screen;
pub mod types;
pub mod validation;

pub use classify::ClassificationStage;
pub use enrich::EnrichmentStage;
pub use extract::ExtractionStage;
pub use router::{EventKind, route_outcome};
pub use screen::ScreeningStage;
pub use types::{Envelope, ErrorLog, Route, Stage, StageKind, StageOutcome, StructuredRecord, run_stage};
