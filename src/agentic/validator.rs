//! Action plan validator
//!
//! Checks a provider-returned plan against the requester's snapshot before
//! anything executes. Validation is all-or-nothing: every issue in the plan
//! is collected with the index of the action it belongs to, and a single
//! issue rejects the whole plan.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::PlanLimits;
use crate::error::{AgentError, AgentResult};
use crate::model::{
    Action, ActionKind, ActionPlan, DomainSnapshot, EntityRef, RawAction, Schedule,
};

/// One reason a plan was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanIssue {
    /// Zero-based action index; `None` for plan-wide issues
    pub action_index: Option<usize>,
    pub kind: PlanIssueKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanIssueKind {
    #[error("unknown action type '{0}'")]
    UnknownActionType(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not allowed on {kind}")]
    UnexpectedField {
        field: &'static str,
        kind: ActionKind,
    },

    #[error("field '{0}' is empty")]
    EmptyText(&'static str),

    #[error("update changes nothing")]
    EmptyUpdate,

    #[error("invalid reference '{0}'")]
    InvalidReference(String),

    #[error("subject {0} does not exist")]
    UnknownSubject(Uuid),

    #[error("subject {0} belongs to another owner")]
    ForeignSubject(Uuid),

    #[error("placeholder '@{0}' is not bound by an earlier create")]
    UnboundPlaceholder(String),

    #[error("placeholder '@{0}' is bound more than once")]
    DuplicatePlaceholder(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid timestamp '{0}', expected RFC 3339")]
    InvalidTimestamp(String),

    #[error("label '{0}' does not exist")]
    UnknownLabel(String),

    #[error("snapshot belongs to {snapshot_owner}, not the requester")]
    SnapshotOwnerMismatch { snapshot_owner: Uuid },

    #[error("{count} actions exceed the limit of {limit}")]
    TooManyActions { count: usize, limit: usize },

    #[error("{count} destructive actions exceed the limit of {limit}")]
    TooManyDestructive { count: usize, limit: usize },
}

impl PlanIssue {
    pub fn new(action_index: usize, kind: PlanIssueKind) -> Self {
        Self {
            action_index: Some(action_index),
            kind,
        }
    }

    pub fn plan(kind: PlanIssueKind) -> Self {
        Self {
            action_index: None,
            kind,
        }
    }
}

impl fmt::Display for PlanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action_index {
            Some(index) => write!(f, "action {}: {}", index + 1, self.kind),
            None => write!(f, "plan: {}", self.kind),
        }
    }
}

/// A plan that passed validation; every action is typed and every
/// reference resolvable
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    pub owner_id: Uuid,
    pub summary_message: String,
    pub actions: Vec<Action>,
}

/// Pre-execution semantic validation
#[derive(Debug, Clone, Default)]
pub struct ActionPlanValidator {
    limits: PlanLimits,
}

/// Placeholders and labels introduced by earlier actions of the same plan
#[derive(Default)]
struct PlanScope {
    placeholders: HashSet<String>,
    assigned_labels: HashSet<String>,
}

impl ActionPlanValidator {
    pub fn new(limits: PlanLimits) -> Self {
        Self { limits }
    }

    /// Validate `plan` for `owner_id`, returning the typed plan or every issue
    pub fn validate(
        &self,
        plan: &ActionPlan,
        owner_id: Uuid,
        snapshot: &DomainSnapshot,
    ) -> AgentResult<ValidatedPlan> {
        let mut issues = Vec::new();

        if snapshot.owner_id != owner_id {
            issues.push(PlanIssue::plan(PlanIssueKind::SnapshotOwnerMismatch {
                snapshot_owner: snapshot.owner_id,
            }));
        }

        if plan.actions.len() > self.limits.max_actions {
            issues.push(PlanIssue::plan(PlanIssueKind::TooManyActions {
                count: plan.actions.len(),
                limit: self.limits.max_actions,
            }));
        }

        let destructive = plan
            .actions
            .iter()
            .filter_map(|raw| ActionKind::from_str(&raw.kind).ok())
            .filter(ActionKind::is_destructive)
            .count();
        if destructive > self.limits.max_destructive_actions {
            issues.push(PlanIssue::plan(PlanIssueKind::TooManyDestructive {
                count: destructive,
                limit: self.limits.max_destructive_actions,
            }));
        }

        let mut scope = PlanScope::default();
        let mut actions = Vec::with_capacity(plan.actions.len());
        for (index, raw) in plan.actions.iter().enumerate() {
            match self.convert(raw, owner_id, snapshot, &mut scope) {
                Ok(action) => actions.push(action),
                Err(kinds) => {
                    issues.extend(kinds.into_iter().map(|kind| PlanIssue::new(index, kind)))
                }
            }
        }

        if !issues.is_empty() {
            warn!(
                owner_id = %owner_id,
                issues = issues.len(),
                "Action plan rejected"
            );
            return Err(AgentError::PlanValidationFailed(issues));
        }

        debug!(owner_id = %owner_id, actions = actions.len(), "Action plan validated");
        Ok(ValidatedPlan {
            owner_id,
            summary_message: plan.summary_message.trim().to_string(),
            actions,
        })
    }

    /// Convert one flat record into a typed action
    fn convert(
        &self,
        raw: &RawAction,
        owner_id: Uuid,
        snapshot: &DomainSnapshot,
        scope: &mut PlanScope,
    ) -> Result<Action, Vec<PlanIssueKind>> {
        let kind = ActionKind::from_str(&raw.kind)
            .map_err(|_| vec![PlanIssueKind::UnknownActionType(raw.kind.clone())])?;

        let mut issues = Vec::new();
        let populated = raw.populated_fields();
        for &field in kind.required_fields() {
            if !populated.contains(&field) {
                issues.push(PlanIssueKind::MissingField(field));
            }
        }
        for &field in &populated {
            if !kind.allowed_fields().contains(&field) {
                issues.push(PlanIssueKind::UnexpectedField { field, kind });
            }
        }

        let title = non_blank(&raw.title, "title", &mut issues);
        let label = non_blank(&raw.label, "label", &mut issues);
        let text = non_blank(&raw.text, "text", &mut issues);
        let notes = raw.notes.as_ref().map(|n| n.trim().to_string());
        let note = raw.note.as_ref().map(|n| n.trim().to_string());

        let subject = raw
            .subject
            .as_deref()
            .and_then(|value| resolve_subject(value, owner_id, snapshot, scope, &mut issues));

        let schedule = raw.schedule.as_ref().and_then(|raw_schedule| {
            Schedule::try_from(raw_schedule)
                .map_err(|reason| issues.push(PlanIssueKind::InvalidSchedule(reason)))
                .ok()
        });

        let occurred_at = raw.occurred_at.as_deref().and_then(|value| {
            DateTime::parse_from_rfc3339(value.trim())
                .map(|instant| instant.with_timezone(&Utc))
                .map_err(|_| issues.push(PlanIssueKind::InvalidTimestamp(value.to_string())))
                .ok()
        });

        let reference = match raw.reference.as_deref() {
            Some(value) if kind == ActionKind::CreateSubject => {
                match EntityRef::placeholder_name(value) {
                    Some(name) if scope.placeholders.contains(&name) => {
                        issues.push(PlanIssueKind::DuplicatePlaceholder(name));
                        None
                    }
                    Some(name) => {
                        scope.placeholders.insert(name.clone());
                        Some(name)
                    }
                    None => {
                        issues.push(PlanIssueKind::InvalidReference(value.to_string()));
                        None
                    }
                }
            }
            _ => None,
        };

        if kind == ActionKind::UpdateSubject
            && raw.title.is_none()
            && raw.notes.is_none()
            && raw.schedule.is_none()
        {
            issues.push(PlanIssueKind::EmptyUpdate);
        }

        if let Some(name) = &label {
            match kind {
                ActionKind::AssignLabel => {
                    scope.assigned_labels.insert(name.to_lowercase());
                }
                ActionKind::RemoveLabel => {
                    let known = snapshot
                        .labels
                        .iter()
                        .any(|l| l.owner_id == owner_id && l.name.eq_ignore_ascii_case(name))
                        || scope.assigned_labels.contains(&name.to_lowercase());
                    if !known {
                        issues.push(PlanIssueKind::UnknownLabel(name.clone()));
                    }
                }
                _ => {}
            }
        }

        if !issues.is_empty() {
            return Err(issues);
        }

        // Required fields are present past this point
        let missing = |field: &'static str| vec![PlanIssueKind::MissingField(field)];
        let action = match kind {
            ActionKind::CreateSubject => Action::CreateSubject {
                reference,
                title: title.ok_or_else(|| missing("title"))?,
                notes,
                schedule,
            },
            ActionKind::UpdateSubject => Action::UpdateSubject {
                subject: subject.ok_or_else(|| missing("subject"))?,
                title,
                notes,
                schedule,
            },
            ActionKind::RecordOccurrence => Action::RecordOccurrence {
                subject: subject.ok_or_else(|| missing("subject"))?,
                occurred_at,
                note,
            },
            ActionKind::AssignLabel => Action::AssignLabel {
                subject: subject.ok_or_else(|| missing("subject"))?,
                label: label.ok_or_else(|| missing("label"))?,
            },
            ActionKind::RemoveLabel => Action::RemoveLabel {
                subject: subject.ok_or_else(|| missing("subject"))?,
                label: label.ok_or_else(|| missing("label"))?,
            },
            ActionKind::DeleteSubject => Action::DeleteSubject {
                subject: subject.ok_or_else(|| missing("subject"))?,
            },
            ActionKind::RememberFact => Action::RememberFact {
                text: text.ok_or_else(|| missing("text"))?,
            },
        };
        Ok(action)
    }
}

fn non_blank(
    value: &Option<String>,
    field: &'static str,
    issues: &mut Vec<PlanIssueKind>,
) -> Option<String> {
    let value = value.as_ref()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        issues.push(PlanIssueKind::EmptyText(field));
        return None;
    }
    Some(trimmed.to_string())
}

fn resolve_subject(
    value: &str,
    owner_id: Uuid,
    snapshot: &DomainSnapshot,
    scope: &PlanScope,
    issues: &mut Vec<PlanIssueKind>,
) -> Option<EntityRef> {
    let reference = match EntityRef::from_str(value) {
        Ok(reference) => reference,
        Err(_) => {
            issues.push(PlanIssueKind::InvalidReference(value.to_string()));
            return None;
        }
    };

    match &reference {
        EntityRef::Existing(id) => match snapshot.subject(*id) {
            None => issues.push(PlanIssueKind::UnknownSubject(*id)),
            Some(subject) if subject.owner_id != owner_id => {
                issues.push(PlanIssueKind::ForeignSubject(*id))
            }
            Some(_) => return Some(reference),
        },
        EntityRef::Placeholder(name) => {
            if scope.placeholders.contains(name) {
                return Some(reference);
            }
            issues.push(PlanIssueKind::UnboundPlaceholder(name.clone()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Label, RawSchedule, SubjectSummary};

    struct Fixture {
        owner: Uuid,
        run: Uuid,
        snapshot: DomainSnapshot,
    }

    fn fixture() -> Fixture {
        let owner = Uuid::new_v4();
        let run = Uuid::new_v4();
        let mut snapshot = DomainSnapshot::new(owner);
        snapshot.subjects.push(SubjectSummary {
            id: run,
            owner_id: owner,
            title: "Run".to_string(),
            notes: None,
            schedule: None,
            labels: vec!["health".to_string()],
        });
        snapshot.labels.push(Label {
            id: Uuid::new_v4(),
            owner_id: owner,
            name: "health".to_string(),
        });
        Fixture {
            owner,
            run,
            snapshot,
        }
    }

    fn raw(kind: &str) -> RawAction {
        RawAction {
            kind: kind.to_string(),
            ..RawAction::default()
        }
    }

    fn plan(actions: Vec<RawAction>) -> ActionPlan {
        ActionPlan {
            summary_message: "done".to_string(),
            actions,
        }
    }

    fn issues_of(result: AgentResult<ValidatedPlan>) -> Vec<PlanIssue> {
        match result {
            Err(AgentError::PlanValidationFailed(issues)) => issues,
            other => panic!("expected PlanValidationFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_create_then_record_with_placeholder() {
        let f = fixture();
        let create = RawAction {
            reference: Some("@Swim".to_string()),
            title: Some(" Swim ".to_string()),
            schedule: Some(RawSchedule {
                days: vec!["tue".to_string()],
                start_hour: Some(18),
                end_hour: Some(19),
            }),
            ..raw("createSubject")
        };
        let record = RawAction {
            subject: Some("@swim".to_string()),
            occurred_at: Some("2026-10-16T07:00:00+02:00".to_string()),
            ..raw("RecordOccurrence")
        };

        let validated = ActionPlanValidator::default()
            .validate(&plan(vec![create, record]), f.owner, &f.snapshot)
            .unwrap();

        assert_eq!(validated.actions.len(), 2);
        assert!(matches!(
            &validated.actions[0],
            Action::CreateSubject { reference: Some(name), title, .. } if name == "swim" && title == "Swim"
        ));
        match &validated.actions[1] {
            Action::RecordOccurrence {
                subject,
                occurred_at,
                ..
            } => {
                assert_eq!(subject, &EntityRef::Placeholder("swim".to_string()));
                assert_eq!(occurred_at.unwrap().to_rfc3339(), "2026-10-16T05:00:00+00:00");
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_foreign_and_unknown_subjects_rejected() {
        let mut f = fixture();
        let foreign = Uuid::new_v4();
        f.snapshot.subjects.push(SubjectSummary {
            id: foreign,
            owner_id: Uuid::new_v4(),
            title: "Not mine".to_string(),
            notes: None,
            schedule: None,
            labels: vec![],
        });
        let unknown = Uuid::new_v4();

        let issues = issues_of(ActionPlanValidator::default().validate(
            &plan(vec![
                RawAction {
                    subject: Some(foreign.to_string()),
                    ..raw("deleteSubject")
                },
                RawAction {
                    subject: Some(unknown.to_string()),
                    ..raw("deleteSubject")
                },
                RawAction {
                    subject: Some(f.run.to_string()),
                    ..raw("deleteSubject")
                },
            ]),
            f.owner,
            &f.snapshot,
        ));

        assert_eq!(
            issues,
            vec![
                PlanIssue::new(0, PlanIssueKind::ForeignSubject(foreign)),
                PlanIssue::new(1, PlanIssueKind::UnknownSubject(unknown)),
            ]
        );
    }

    #[test]
    fn test_placeholder_must_be_bound_earlier() {
        let f = fixture();
        let issues = issues_of(ActionPlanValidator::default().validate(
            &plan(vec![
                RawAction {
                    subject: Some("@yoga".to_string()),
                    ..raw("recordOccurrence")
                },
                RawAction {
                    reference: Some("@yoga".to_string()),
                    title: Some("Yoga".to_string()),
                    ..raw("createSubject")
                },
                RawAction {
                    reference: Some("@yoga".to_string()),
                    title: Some("Yoga again".to_string()),
                    ..raw("createSubject")
                },
            ]),
            f.owner,
            &f.snapshot,
        ));

        assert_eq!(
            issues,
            vec![
                PlanIssue::new(0, PlanIssueKind::UnboundPlaceholder("yoga".to_string())),
                PlanIssue::new(2, PlanIssueKind::DuplicatePlaceholder("yoga".to_string())),
            ]
        );
    }

    #[test]
    fn test_foreign_fields_and_missing_fields() {
        let f = fixture();
        let issues = issues_of(ActionPlanValidator::default().validate(
            &plan(vec![
                RawAction {
                    title: Some("Run".to_string()),
                    label: Some("health".to_string()),
                    ..raw("createSubject")
                },
                raw("rememberFact"),
                raw("launchRocket"),
            ]),
            f.owner,
            &f.snapshot,
        ));

        assert_eq!(
            issues,
            vec![
                PlanIssue::new(
                    0,
                    PlanIssueKind::UnexpectedField {
                        field: "label",
                        kind: ActionKind::CreateSubject
                    }
                ),
                PlanIssue::new(1, PlanIssueKind::MissingField("text")),
                PlanIssue::new(
                    2,
                    PlanIssueKind::UnknownActionType("launchRocket".to_string())
                ),
            ]
        );
    }

    #[test]
    fn test_destructive_limit() {
        let f = fixture();
        let removals: Vec<RawAction> = (0..4)
            .map(|_| RawAction {
                subject: Some(f.run.to_string()),
                label: Some("health".to_string()),
                ..raw("removeLabel")
            })
            .collect();

        let issues = issues_of(ActionPlanValidator::default().validate(
            &plan(removals),
            f.owner,
            &f.snapshot,
        ));
        assert_eq!(
            issues,
            vec![PlanIssue::plan(PlanIssueKind::TooManyDestructive {
                count: 4,
                limit: 3
            })]
        );
    }

    #[test]
    fn test_action_count_limit() {
        let f = fixture();
        let facts: Vec<RawAction> = (0..3)
            .map(|i| RawAction {
                text: Some(format!("fact {}", i)),
                ..raw("rememberFact")
            })
            .collect();

        let validator = ActionPlanValidator::new(PlanLimits {
            max_actions: 2,
            max_destructive_actions: 3,
        });
        let issues = issues_of(validator.validate(&plan(facts), f.owner, &f.snapshot));
        assert_eq!(
            issues,
            vec![PlanIssue::plan(PlanIssueKind::TooManyActions {
                count: 3,
                limit: 2
            })]
        );
    }

    #[test]
    fn test_invalid_schedule_timestamp_and_label() {
        let f = fixture();
        let issues = issues_of(ActionPlanValidator::default().validate(
            &plan(vec![
                RawAction {
                    subject: Some(f.run.to_string()),
                    schedule: Some(RawSchedule {
                        days: vec!["mon".to_string()],
                        start_hour: Some(9),
                        end_hour: Some(7),
                    }),
                    ..raw("updateSubject")
                },
                RawAction {
                    subject: Some(f.run.to_string()),
                    occurred_at: Some("yesterday".to_string()),
                    ..raw("recordOccurrence")
                },
                RawAction {
                    subject: Some(f.run.to_string()),
                    label: Some("wellness".to_string()),
                    ..raw("removeLabel")
                },
            ]),
            f.owner,
            &f.snapshot,
        ));

        assert_eq!(issues.len(), 3);
        assert!(matches!(issues[0].kind, PlanIssueKind::InvalidSchedule(_)));
        assert_eq!(
            issues[1].kind,
            PlanIssueKind::InvalidTimestamp("yesterday".to_string())
        );
        assert_eq!(
            issues[2].kind,
            PlanIssueKind::UnknownLabel("wellness".to_string())
        );
    }

    #[test]
    fn test_snapshot_for_other_owner_rejected() {
        let f = fixture();
        let issues = issues_of(ActionPlanValidator::default().validate(
            &plan(vec![]),
            Uuid::new_v4(),
            &f.snapshot,
        ));
        assert!(matches!(
            issues[0].kind,
            PlanIssueKind::SnapshotOwnerMismatch { .. }
        ));
    }

    #[test]
    fn test_issue_display() {
        let issue = PlanIssue::new(2, PlanIssueKind::EmptyText("title"));
        assert_eq!(issue.to_string(), "action 3: field 'title' is empty");
    }
}
