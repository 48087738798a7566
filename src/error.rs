//! Error types for the routine agent
//!
//! Top-level failures abort a request before any side effect happens.
//! Per-action execution failures and enrichment failures are not errors at
//! this level: the former are reported in [`crate::model::ActionOutcome`],
//! the latter are only logged.

use std::time::Duration;

use thiserror::Error;

use crate::agentic::validator::PlanIssue;

/// Result alias used across the crate
pub type AgentResult<T> = Result<T, AgentError>;

/// Main error type for the routine agent
#[derive(Error, Debug)]
pub enum AgentError {
    /// Network failure or non-2xx (other than 429) from the completion provider
    #[error("Completion provider unavailable: {message}")]
    ProviderUnavailable {
        status: Option<u16>,
        message: String,
    },

    /// Provider kept answering 429 after every retry
    #[error("Completion provider throttled after {attempts} attempts (waited {waited:?})")]
    ProviderThrottled { attempts: u32, waited: Duration },

    /// Provider answered with JSON that does not match the expected shape
    #[error("Malformed provider output: {0}")]
    MalformedProviderOutput(String),

    /// Provider answered without any usable text where a result was required
    #[error("Provider returned no usable output for {0}")]
    EmptyProviderOutput(&'static str),

    /// Action plan rejected before execution
    #[error("Action plan rejected with {} issue(s): {}", .0.len(), format_issues(.0))]
    PlanValidationFailed(Vec<PlanIssue>),

    /// Snapshot, history or clock collaborator failed
    #[error("Collaborator error: {0}")]
    Collaborator(#[source] anyhow::Error),

    /// Caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl AgentError {
    /// One short, non-technical sentence suitable for an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            AgentError::ProviderUnavailable { .. } => {
                "The assistant is unavailable right now. Please try again shortly."
            }
            AgentError::ProviderThrottled { .. } => {
                "The assistant is busy right now. Please try again in a minute."
            }
            AgentError::MalformedProviderOutput(_) | AgentError::EmptyProviderOutput(_) => {
                "Sorry, I couldn't understand that. Could you rephrase it?"
            }
            AgentError::PlanValidationFailed(_) => {
                "I couldn't safely apply that request, so nothing was changed."
            }
            AgentError::Collaborator(_) | AgentError::Configuration(_) => {
                "Something went wrong on our side. Please try again later."
            }
            AgentError::Cancelled => "The request was cancelled.",
        }
    }

    /// True for failures that happened before any provider output was parsed
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            AgentError::ProviderUnavailable { .. } | AgentError::ProviderThrottled { .. }
        )
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(error: reqwest::Error) -> Self {
        AgentError::ProviderUnavailable {
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}

fn format_issues(issues: &[PlanIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
