//! Action plan types
//!
//! The provider speaks in flat records ([`RawAction`]) where every field is
//! optional. The validator turns each record into a typed [`Action`], so
//! everything downstream of validation can match exhaustively on variants.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::routine::{parse_weekday, TimeBlock, TimeBlockError};

/// Action plan exactly as returned by the provider.
///
/// Field names are lower-case without separators because provider output is
/// key-folded before deserialization (see [`crate::ai::utils::fold_keys`]).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionPlan {
    #[serde(rename = "summarymessage", alias = "summary", alias = "message", default)]
    pub summary_message: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub actions: Vec<RawAction>,
}

/// An explicit `null` list reads as empty
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// One provider-proposed action as a flat record
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawAction {
    #[serde(rename = "type", alias = "kind", alias = "action", default)]
    pub kind: String,
    /// Placeholder bound by a create, e.g. `@run`
    #[serde(rename = "ref", alias = "reference", alias = "as", default)]
    pub reference: Option<String>,
    /// Existing subject id or a placeholder bound earlier in the plan
    #[serde(alias = "subjectid", alias = "subjectref", default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub schedule: Option<RawSchedule>,
    #[serde(rename = "occurredat", alias = "timestamp", default)]
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(alias = "labelname", alias = "tag", default)]
    pub label: Option<String>,
    #[serde(alias = "fact", default)]
    pub text: Option<String>,
}

impl RawAction {
    /// Names of the populated optional fields, in declaration order
    pub fn populated_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.reference.is_some() {
            fields.push("ref");
        }
        if self.subject.is_some() {
            fields.push("subject");
        }
        if self.title.is_some() {
            fields.push("title");
        }
        if self.notes.is_some() {
            fields.push("notes");
        }
        if self.schedule.is_some() {
            fields.push("schedule");
        }
        if self.occurred_at.is_some() {
            fields.push("occurredAt");
        }
        if self.note.is_some() {
            fields.push("note");
        }
        if self.label.is_some() {
            fields.push("label");
        }
        if self.text.is_some() {
            fields.push("text");
        }
        fields
    }
}

/// Weekly schedule as returned by the provider
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSchedule {
    #[serde(default)]
    pub days: Vec<String>,
    #[serde(rename = "starthour", default)]
    pub start_hour: Option<i64>,
    #[serde(rename = "endhour", default)]
    pub end_hour: Option<i64>,
}

/// Validated weekly schedule: the same hour window on a set of weekdays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub days: Vec<Weekday>,
    pub start_hour: u8,
    pub end_hour: u8,
}

impl Schedule {
    pub fn new(days: Vec<Weekday>, start_hour: i64, end_hour: i64) -> Result<Self, TimeBlockError> {
        // Validate bounds once through TimeBlock
        let checked = TimeBlock::new(Weekday::Mon, start_hour, end_hour)?;
        let mut unique: Vec<Weekday> = Vec::with_capacity(days.len());
        for day in days {
            if !unique.contains(&day) {
                unique.push(day);
            }
        }
        unique.sort_by_key(|d| d.num_days_from_monday());
        Ok(Self {
            days: unique,
            start_hour: checked.start_hour(),
            end_hour: checked.end_hour(),
        })
    }

    /// Expand into one time block per day
    pub fn time_blocks(&self) -> Vec<TimeBlock> {
        self.days
            .iter()
            .filter_map(|day| {
                TimeBlock::new(*day, self.start_hour as i64, self.end_hour as i64).ok()
            })
            .collect()
    }
}

impl TryFrom<&RawSchedule> for Schedule {
    type Error = String;

    fn try_from(raw: &RawSchedule) -> Result<Self, Self::Error> {
        if raw.days.is_empty() {
            return Err("schedule has no days".to_string());
        }
        let days = raw
            .days
            .iter()
            .map(|d| parse_weekday(d).map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        let start = raw
            .start_hour
            .ok_or_else(|| "schedule is missing startHour".to_string())?;
        let end = raw
            .end_hour
            .ok_or_else(|| "schedule is missing endHour".to_string())?;
        Schedule::new(days, start, end).map_err(|e| e.to_string())
    }
}

/// Reference to a subject: an existing id, or a placeholder bound by an
/// earlier create in the same plan
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityRef {
    Existing(Uuid),
    Placeholder(String),
}

impl EntityRef {
    /// Normalize a placeholder name: leading `@` stripped, lower-case
    pub fn placeholder_name(raw: &str) -> Option<String> {
        let name = raw.trim().strip_prefix('@')?.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return None;
        }
        Some(name.to_lowercase())
    }
}

impl FromStr for EntityRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.starts_with('@') {
            return EntityRef::placeholder_name(trimmed)
                .map(EntityRef::Placeholder)
                .ok_or_else(|| format!("invalid placeholder '{}'", trimmed));
        }
        Uuid::parse_str(trimmed)
            .map(EntityRef::Existing)
            .map_err(|_| format!("'{}' is neither a subject id nor an @placeholder", trimmed))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Existing(id) => write!(f, "{}", id),
            EntityRef::Placeholder(name) => write!(f, "@{}", name),
        }
    }
}

/// Action variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    CreateSubject,
    UpdateSubject,
    RecordOccurrence,
    AssignLabel,
    RemoveLabel,
    DeleteSubject,
    RememberFact,
}

impl ActionKind {
    /// Destructive actions are capped per plan
    pub fn is_destructive(&self) -> bool {
        matches!(self, ActionKind::DeleteSubject | ActionKind::RemoveLabel)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::CreateSubject => "createSubject",
            ActionKind::UpdateSubject => "updateSubject",
            ActionKind::RecordOccurrence => "recordOccurrence",
            ActionKind::AssignLabel => "assignLabel",
            ActionKind::RemoveLabel => "removeLabel",
            ActionKind::DeleteSubject => "deleteSubject",
            ActionKind::RememberFact => "rememberFact",
        }
    }

    /// Fields a record of this kind must carry
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            ActionKind::CreateSubject => &["title"],
            ActionKind::UpdateSubject => &["subject"],
            ActionKind::RecordOccurrence => &["subject"],
            ActionKind::AssignLabel | ActionKind::RemoveLabel => &["subject", "label"],
            ActionKind::DeleteSubject => &["subject"],
            ActionKind::RememberFact => &["text"],
        }
    }

    /// Fields a record of this kind may carry
    pub fn allowed_fields(&self) -> &'static [&'static str] {
        match self {
            ActionKind::CreateSubject => &["ref", "title", "notes", "schedule"],
            ActionKind::UpdateSubject => &["subject", "title", "notes", "schedule"],
            ActionKind::RecordOccurrence => &["subject", "occurredAt", "note"],
            ActionKind::AssignLabel | ActionKind::RemoveLabel => &["subject", "label"],
            ActionKind::DeleteSubject => &["subject"],
            ActionKind::RememberFact => &["text"],
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "createsubject" => Ok(ActionKind::CreateSubject),
            "updatesubject" => Ok(ActionKind::UpdateSubject),
            "recordoccurrence" => Ok(ActionKind::RecordOccurrence),
            "assignlabel" => Ok(ActionKind::AssignLabel),
            "removelabel" => Ok(ActionKind::RemoveLabel),
            "deletesubject" => Ok(ActionKind::DeleteSubject),
            "rememberfact" => Ok(ActionKind::RememberFact),
            _ => Err(format!("unknown action type '{}'", s)),
        }
    }
}

/// A validated action; exactly the fields of its variant exist
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Action {
    CreateSubject {
        reference: Option<String>,
        title: String,
        notes: Option<String>,
        schedule: Option<Schedule>,
    },
    UpdateSubject {
        subject: EntityRef,
        title: Option<String>,
        notes: Option<String>,
        schedule: Option<Schedule>,
    },
    RecordOccurrence {
        subject: EntityRef,
        occurred_at: Option<DateTime<Utc>>,
        note: Option<String>,
    },
    AssignLabel {
        subject: EntityRef,
        label: String,
    },
    RemoveLabel {
        subject: EntityRef,
        label: String,
    },
    DeleteSubject {
        subject: EntityRef,
    },
    RememberFact {
        text: String,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CreateSubject { .. } => ActionKind::CreateSubject,
            Action::UpdateSubject { .. } => ActionKind::UpdateSubject,
            Action::RecordOccurrence { .. } => ActionKind::RecordOccurrence,
            Action::AssignLabel { .. } => ActionKind::AssignLabel,
            Action::RemoveLabel { .. } => ActionKind::RemoveLabel,
            Action::DeleteSubject { .. } => ActionKind::DeleteSubject,
            Action::RememberFact { .. } => ActionKind::RememberFact,
        }
    }

    /// Subject this action targets, if any
    pub fn subject(&self) -> Option<&EntityRef> {
        match self {
            Action::UpdateSubject { subject, .. }
            | Action::RecordOccurrence { subject, .. }
            | Action::AssignLabel { subject, .. }
            | Action::RemoveLabel { subject, .. }
            | Action::DeleteSubject { subject } => Some(subject),
            Action::CreateSubject { .. } | Action::RememberFact { .. } => None,
        }
    }

    /// Placeholder this action binds on success
    pub fn binds(&self) -> Option<&str> {
        match self {
            Action::CreateSubject {
                reference: Some(name),
                ..
            } => Some(name.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Succeeded,
    Failed,
}

/// Result of one action, reported in plan order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub index: usize,
    pub kind: ActionKind,
    pub status: ActionStatus,
    /// Created or affected entity
    pub entity_id: Option<Uuid>,
    pub error: Option<String>,
    /// Secondary, non-fatal information such as a schedule conflict
    pub warning: Option<String>,
}

impl ActionOutcome {
    pub fn succeeded(index: usize, kind: ActionKind, entity_id: Option<Uuid>) -> Self {
        Self {
            index,
            kind,
            status: ActionStatus::Succeeded,
            entity_id,
            error: None,
            warning: None,
        }
    }

    pub fn failed(index: usize, kind: ActionKind, error: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            status: ActionStatus::Failed,
            entity_id: None,
            error: Some(error.into()),
            warning: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }
}

/// Response to one utterance
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UtteranceResponse {
    pub summary_message: String,
    pub actions: Vec<ActionOutcome>,
}
