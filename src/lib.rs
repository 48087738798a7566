//! Routine Agent - LLM-backed action planning and routine analysis
//!
//! Turns free-form utterances into validated, ordered domain actions by
//! delegating interpretation to a completion provider, and analyzes an
//! owner's occurrence history for recurring time-of-day routines.
//!
//! ## Pipeline
//! Utterance -> Prompt -> Completion -> Plan validation -> Sequential execution
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use routine_agent::memory::{InMemoryStore, OffsetClock};
//! use routine_agent::{AgentConfig, RoutineAgent};
//! use tokio_util::sync::CancellationToken;
//! use uuid::Uuid;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let agent = RoutineAgent::builder(AgentConfig::from_env()?)
//!     .store(Arc::new(InMemoryStore::new()))
//!     .clock(Arc::new(OffsetClock::utc()))
//!     .build()?;
//!
//! let response = agent
//!     .submit_utterance(Uuid::new_v4(), "I went for a run", None, &CancellationToken::new())
//!     .await?;
//! println!("{}", response.summary_message);
//! # Ok(())
//! # }
//! ```

// Core error handling and configuration
pub mod config;
pub mod error;

// Request-scoped domain values
pub mod model;

// External collaborator seams and their in-memory implementations
pub mod collaborators;
pub mod memory;

// Completion provider access
pub mod ai;

// Planning pipeline
pub mod agentic;

// Routine analysis
pub mod routine;

pub use agentic::{
    ActionExecutor, ActionPlanValidator, ExtractedFact, PlanIssue, PlanIssueKind, RoutineAgent,
    RoutineAgentBuilder, ValidatedPlan,
};
pub use ai::{
    CompletionOutcome, CompletionReport, CompletionRequest, CompletionTransport, GeminiTransport,
    InlineImage, PromptAssembler, ScriptedTransport, StructuredCompletionClient,
};
pub use collaborators::{
    CivilClock, CommitBoundary, CommitError, CommitReceipt, HistoryProvider, Mutation,
    SnapshotProvider,
};
pub use config::{AgentConfig, PlanLimits, PromptLimits, ProviderConfig, RetryPolicy, RoutinePolicy};
pub use error::{AgentError, AgentResult};
pub use routine::RoutineAnalyzer;
