//! Agentic planning pipeline
//!
//! Utterance in, validated and executed action plan out:
//! prompt → completion → validation → sequential execution, with
//! best-effort conflict enrichment after schedule changes.

pub mod executor;
pub mod orchestrator;
pub mod validator;

pub use executor::{ActionExecutor, ScheduleEnricher};
pub use orchestrator::{ExtractedFact, RoutineAgent, RoutineAgentBuilder};
pub use validator::{ActionPlanValidator, PlanIssue, PlanIssueKind, ValidatedPlan};
