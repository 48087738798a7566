//! Domain model
//!
//! Request-scoped value types shared by the planning pipeline and the
//! routine analyzer. Nothing here is persisted by this crate.

pub mod action;
pub mod routine;
pub mod snapshot;

pub use action::{
    Action, ActionKind, ActionOutcome, ActionPlan, ActionStatus, EntityRef, RawAction, RawSchedule,
    Schedule, UtteranceResponse,
};
pub use routine::{
    ConfidenceTier, ConflictAssessment, ConflictingSubject, ProposedSchedule, RoutinePattern,
    SeverityTier, SubjectHistory, TimeBlock, TimeBlockError, TimeSlotSuggestion,
};
pub use snapshot::{DomainSnapshot, Label, Occurrence, PriorFact, SubjectSummary};
