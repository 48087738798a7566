//! Action executor
//!
//! Runs a validated plan strictly in order. Each action commits on its own:
//! a failure is recorded in that action's outcome and execution moves on,
//! with nothing rolled back. Placeholders bound by creates are resolved from
//! a map that lives only for one `execute` call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::validator::ValidatedPlan;
use crate::collaborators::{CivilClock, CommitBoundary, Mutation};
use crate::error::AgentResult;
use crate::model::{
    Action, ActionOutcome, ConflictAssessment, EntityRef, ProposedSchedule, Schedule,
};

/// Conflict check run after a schedule-bearing action commits
#[async_trait]
pub trait ScheduleEnricher: Send + Sync {
    async fn enrich(
        &self,
        owner_id: Uuid,
        proposed: &ProposedSchedule,
        cancel: &CancellationToken,
    ) -> AgentResult<Option<ConflictAssessment>>;
}

/// State of a same-plan placeholder
#[derive(Debug, Clone, Copy)]
enum Binding {
    Bound(Uuid),
    /// The create that would have bound it failed
    Failed,
}

/// Sequential, independently committing plan execution
#[derive(Clone)]
pub struct ActionExecutor {
    commit: Arc<dyn CommitBoundary>,
    clock: Arc<dyn CivilClock>,
    enricher: Option<Arc<dyn ScheduleEnricher>>,
    enrichment_timeout: Duration,
}

impl ActionExecutor {
    pub fn new(commit: Arc<dyn CommitBoundary>, clock: Arc<dyn CivilClock>) -> Self {
        Self {
            commit,
            clock,
            enricher: None,
            enrichment_timeout: Duration::from_secs(5),
        }
    }

    /// Enable best-effort conflict enrichment bounded by `timeout`
    pub fn with_enricher(mut self, enricher: Arc<dyn ScheduleEnricher>, timeout: Duration) -> Self {
        self.enricher = Some(enricher);
        self.enrichment_timeout = timeout;
        self
    }

    /// Execute every action of `plan`, returning one outcome per action in
    /// plan order. Never fails as a whole.
    pub async fn execute(
        &self,
        plan: &ValidatedPlan,
        cancel: &CancellationToken,
    ) -> Vec<ActionOutcome> {
        let owner_id = plan.owner_id;
        let mut bindings: HashMap<String, Binding> = HashMap::new();
        let mut outcomes = Vec::with_capacity(plan.actions.len());

        for (index, action) in plan.actions.iter().enumerate() {
            let kind = action.kind();

            if cancel.is_cancelled() {
                outcomes.push(ActionOutcome::failed(
                    index,
                    kind,
                    "cancelled before this action ran",
                ));
                if let Some(name) = action.binds() {
                    bindings.insert(name.to_string(), Binding::Failed);
                }
                continue;
            }

            let mutation = match self.mutation_for(owner_id, action, &bindings) {
                Ok(mutation) => mutation,
                Err(reason) => {
                    warn!(owner_id = %owner_id, index, kind = %kind, reason = %reason, "Action skipped");
                    outcomes.push(ActionOutcome::failed(index, kind, reason));
                    if let Some(name) = action.binds() {
                        bindings.insert(name.to_string(), Binding::Failed);
                    }
                    continue;
                }
            };

            match self.commit.commit(mutation).await {
                Ok(receipt) => {
                    info!(
                        owner_id = %owner_id,
                        index,
                        kind = %kind,
                        entity_id = %receipt.entity_id,
                        "Action committed"
                    );
                    if let Some(name) = action.binds() {
                        bindings.insert(name.to_string(), Binding::Bound(receipt.entity_id));
                    }

                    let mut outcome = ActionOutcome::succeeded(index, kind, Some(receipt.entity_id));
                    if let Some((title, schedule)) = scheduled(action) {
                        let proposed = ProposedSchedule {
                            subject_id: Some(receipt.entity_id),
                            title: title.unwrap_or_default().to_string(),
                            time_blocks: schedule.time_blocks(),
                        };
                        outcome.warning = self.enrich(owner_id, &proposed, cancel).await;
                    }
                    outcomes.push(outcome);
                }
                Err(e) => {
                    warn!(
                        owner_id = %owner_id,
                        index,
                        kind = %kind,
                        error = %e,
                        "Action failed"
                    );
                    if let Some(name) = action.binds() {
                        bindings.insert(name.to_string(), Binding::Failed);
                    }
                    outcomes.push(ActionOutcome::failed(index, kind, e.to_string()));
                }
            }
        }

        outcomes
    }

    fn mutation_for(
        &self,
        owner_id: Uuid,
        action: &Action,
        bindings: &HashMap<String, Binding>,
    ) -> Result<Mutation, String> {
        let mutation = match action {
            Action::CreateSubject {
                title,
                notes,
                schedule,
                ..
            } => Mutation::CreateSubject {
                owner_id,
                title: title.clone(),
                notes: notes.clone(),
                schedule: schedule.clone(),
            },
            Action::UpdateSubject {
                subject,
                title,
                notes,
                schedule,
            } => Mutation::UpdateSubject {
                owner_id,
                subject_id: resolve(subject, bindings)?,
                title: title.clone(),
                notes: notes.clone(),
                schedule: schedule.clone(),
            },
            Action::RecordOccurrence {
                subject,
                occurred_at,
                note,
            } => Mutation::RecordOccurrence {
                owner_id,
                subject_id: resolve(subject, bindings)?,
                occurred_at: occurred_at.unwrap_or_else(|| self.clock.now()),
                note: note.clone(),
            },
            Action::AssignLabel { subject, label } => Mutation::AssignLabel {
                owner_id,
                subject_id: resolve(subject, bindings)?,
                label: label.clone(),
            },
            Action::RemoveLabel { subject, label } => Mutation::RemoveLabel {
                owner_id,
                subject_id: resolve(subject, bindings)?,
                label: label.clone(),
            },
            Action::DeleteSubject { subject } => Mutation::DeleteSubject {
                owner_id,
                subject_id: resolve(subject, bindings)?,
            },
            Action::RememberFact { text } => Mutation::RememberFact {
                owner_id,
                text: text.clone(),
            },
        };
        Ok(mutation)
    }

    /// Run conflict enrichment, turning a detected conflict into a warning.
    /// Errors, timeouts and cancellation are logged and otherwise ignored.
    async fn enrich(
        &self,
        owner_id: Uuid,
        proposed: &ProposedSchedule,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let enricher = self.enricher.as_ref()?;

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(owner_id = %owner_id, "Conflict enrichment cancelled");
                return None;
            }
            result = tokio::time::timeout(
                self.enrichment_timeout,
                enricher.enrich(owner_id, proposed, cancel),
            ) => result,
        };

        match result {
            Err(_) => {
                warn!(
                    owner_id = %owner_id,
                    timeout_ms = self.enrichment_timeout.as_millis() as u64,
                    "Conflict enrichment timed out"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(owner_id = %owner_id, error = %e, "Conflict enrichment failed");
                None
            }
            Ok(Ok(Some(assessment))) if assessment.has_conflict => {
                debug!(
                    owner_id = %owner_id,
                    conflicts = assessment.conflicting_subjects.len(),
                    "Schedule conflict detected"
                );
                Some(conflict_warning(&assessment))
            }
            Ok(Ok(_)) => None,
        }
    }
}

fn resolve(reference: &EntityRef, bindings: &HashMap<String, Binding>) -> Result<Uuid, String> {
    match reference {
        EntityRef::Existing(id) => Ok(*id),
        EntityRef::Placeholder(name) => match bindings.get(name) {
            Some(Binding::Bound(id)) => Ok(*id),
            Some(Binding::Failed) => Err(format!(
                "'@{}' was not created because an earlier action failed",
                name
            )),
            None => Err(format!("placeholder '@{}' is not bound", name)),
        },
    }
}

/// Title and schedule of a create/update that carries a schedule
fn scheduled(action: &Action) -> Option<(Option<&str>, &Schedule)> {
    match action {
        Action::CreateSubject {
            title,
            schedule: Some(schedule),
            ..
        } => Some((Some(title.as_str()), schedule)),
        Action::UpdateSubject {
            title,
            schedule: Some(schedule),
            ..
        } => Some((title.as_deref(), schedule)),
        _ => None,
    }
}

fn conflict_warning(assessment: &ConflictAssessment) -> String {
    let titles: Vec<&str> = assessment
        .conflicting_subjects
        .iter()
        .map(|s| s.title.as_str())
        .collect();
    let severity = assessment
        .severity
        .map(|s| format!("{:?}", s).to_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Schedule conflicts with {} ({} severity). {}",
        titles.join(", "),
        severity,
        assessment.recommendation
    )
}
