//! In-memory collaborators
//!
//! A single [`InMemoryStore`] implements the snapshot, history and commit
//! collaborators over one mutable state, so a commit made by one action is
//! visible to the next snapshot. [`OffsetClock`] resolves civil time from a
//! fixed UTC offset per owner. Both back the integration tests and the CLI.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::collaborators::{
    CivilClock, CommitBoundary, CommitError, CommitReceipt, HistoryProvider, Mutation,
    SnapshotProvider,
};
use crate::model::{DomainSnapshot, Label, Occurrence, PriorFact, SubjectSummary};

/// Seed data for an [`InMemoryStore`] and [`OffsetClock`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    pub owner_id: Uuid,
    /// Owner's offset from UTC in minutes
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Pinned "now"; the system clock is used when absent
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subjects: Vec<SubjectSummary>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub prior_facts: Vec<PriorFact>,
    #[serde(default)]
    pub occurrences: Vec<Occurrence>,
}

impl Fixture {
    /// Load a JSON fixture from disk
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse fixture {}", path.display()))
    }

    pub fn store(&self) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.seed(
            self.owner_id,
            self.subjects.clone(),
            self.labels.clone(),
            self.prior_facts.clone(),
            self.occurrences.clone(),
        );
        store
    }

    pub fn clock(&self) -> Result<OffsetClock> {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .ok_or_else(|| anyhow!("utcOffsetMinutes out of range: {}", self.utc_offset_minutes))?;
        let clock = OffsetClock::new(offset);
        Ok(match self.now {
            Some(now) => clock.pinned_at(now),
            None => clock,
        })
    }
}

#[derive(Debug, Default)]
struct StoreState {
    subjects: Vec<SubjectSummary>,
    labels: Vec<Label>,
    facts: HashMap<Uuid, Vec<PriorFact>>,
    occurrences: HashMap<Uuid, Vec<Occurrence>>,
    commits: Vec<Mutation>,
}

/// Mutable in-process domain store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about `owner_id`
    pub fn seed(
        &self,
        owner_id: Uuid,
        subjects: Vec<SubjectSummary>,
        labels: Vec<Label>,
        prior_facts: Vec<PriorFact>,
        occurrences: Vec<Occurrence>,
    ) {
        let mut state = self.lock();
        state.subjects.retain(|s| s.owner_id != owner_id);
        state.subjects.extend(subjects);
        state.labels.retain(|l| l.owner_id != owner_id);
        state.labels.extend(labels);
        state.facts.insert(owner_id, prior_facts);
        state.occurrences.insert(owner_id, occurrences);
    }

    /// Add one subject and return its id
    pub fn add_subject(&self, owner_id: Uuid, title: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.lock().subjects.push(SubjectSummary {
            id,
            owner_id,
            title: title.to_string(),
            notes: None,
            schedule: None,
            labels: Vec::new(),
        });
        id
    }

    pub fn add_occurrence(&self, owner_id: Uuid, subject_id: Uuid, occurred_at: DateTime<Utc>) {
        self.lock()
            .occurrences
            .entry(owner_id)
            .or_default()
            .push(Occurrence {
                subject_id,
                occurred_at,
            });
    }

    /// Every mutation committed so far, in commit order
    pub fn commits(&self) -> Vec<Mutation> {
        self.lock().commits.clone()
    }

    pub fn subject(&self, id: Uuid) -> Option<SubjectSummary> {
        self.lock().subjects.iter().find(|s| s.id == id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(state: &mut StoreState, mutation: &Mutation) -> Result<Uuid, CommitError> {
        match mutation {
            Mutation::CreateSubject {
                owner_id,
                title,
                notes,
                schedule,
            } => {
                let duplicate = state.subjects.iter().any(|s| {
                    s.owner_id == *owner_id && s.title.eq_ignore_ascii_case(title.trim())
                });
                if duplicate {
                    return Err(CommitError::Conflict(format!("subject '{}'", title)));
                }
                let id = Uuid::new_v4();
                state.subjects.push(SubjectSummary {
                    id,
                    owner_id: *owner_id,
                    title: title.trim().to_string(),
                    notes: notes.clone(),
                    schedule: schedule.clone(),
                    labels: Vec::new(),
                });
                Ok(id)
            }
            Mutation::UpdateSubject {
                owner_id,
                subject_id,
                title,
                notes,
                schedule,
            } => {
                let subject = Self::owned_subject(state, *owner_id, *subject_id)?;
                if let Some(title) = title {
                    subject.title = title.clone();
                }
                if let Some(notes) = notes {
                    subject.notes = Some(notes.clone());
                }
                if let Some(schedule) = schedule {
                    subject.schedule = Some(schedule.clone());
                }
                Ok(*subject_id)
            }
            Mutation::RecordOccurrence {
                owner_id,
                subject_id,
                occurred_at,
                ..
            } => {
                Self::owned_subject(state, *owner_id, *subject_id)?;
                state
                    .occurrences
                    .entry(*owner_id)
                    .or_default()
                    .push(Occurrence {
                        subject_id: *subject_id,
                        occurred_at: *occurred_at,
                    });
                Ok(*subject_id)
            }
            Mutation::AssignLabel {
                owner_id,
                subject_id,
                label,
            } => {
                Self::owned_subject(state, *owner_id, *subject_id)?;
                let label_id = match state
                    .labels
                    .iter()
                    .find(|l| l.owner_id == *owner_id && l.name.eq_ignore_ascii_case(label))
                {
                    Some(existing) => existing.id,
                    None => {
                        let id = Uuid::new_v4();
                        state.labels.push(Label {
                            id,
                            owner_id: *owner_id,
                            name: label.clone(),
                        });
                        id
                    }
                };
                let subject = Self::owned_subject(state, *owner_id, *subject_id)?;
                if !subject.labels.iter().any(|l| l.eq_ignore_ascii_case(label)) {
                    subject.labels.push(label.clone());
                }
                Ok(label_id)
            }
            Mutation::RemoveLabel {
                owner_id,
                subject_id,
                label,
            } => {
                let subject = Self::owned_subject(state, *owner_id, *subject_id)?;
                let before = subject.labels.len();
                subject.labels.retain(|l| !l.eq_ignore_ascii_case(label));
                if subject.labels.len() == before {
                    return Err(CommitError::NotFound(format!("label '{}'", label)));
                }
                Ok(*subject_id)
            }
            Mutation::DeleteSubject {
                owner_id,
                subject_id,
            } => {
                Self::owned_subject(state, *owner_id, *subject_id)?;
                state.subjects.retain(|s| s.id != *subject_id);
                if let Some(occurrences) = state.occurrences.get_mut(owner_id) {
                    occurrences.retain(|o| o.subject_id != *subject_id);
                }
                Ok(*subject_id)
            }
            Mutation::RememberFact { owner_id, text } => {
                let id = Uuid::new_v4();
                state.facts.entry(*owner_id).or_default().push(PriorFact {
                    id,
                    text: text.clone(),
                });
                Ok(id)
            }
        }
    }

    fn owned_subject(
        state: &mut StoreState,
        owner_id: Uuid,
        subject_id: Uuid,
    ) -> Result<&mut SubjectSummary, CommitError> {
        state
            .subjects
            .iter_mut()
            .find(|s| s.id == subject_id && s.owner_id == owner_id)
            .ok_or_else(|| CommitError::NotFound(format!("subject {}", subject_id)))
    }
}

#[async_trait]
impl SnapshotProvider for InMemoryStore {
    async fn snapshot(&self, owner_id: Uuid) -> Result<DomainSnapshot> {
        let state = self.lock();
        Ok(DomainSnapshot {
            owner_id,
            subjects: state
                .subjects
                .iter()
                .filter(|s| s.owner_id == owner_id)
                .cloned()
                .collect(),
            labels: state
                .labels
                .iter()
                .filter(|l| l.owner_id == owner_id)
                .cloned()
                .collect(),
            prior_facts: state.facts.get(&owner_id).cloned().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl HistoryProvider for InMemoryStore {
    async fn occurrences(&self, owner_id: Uuid) -> Result<Vec<Occurrence>> {
        Ok(self
            .lock()
            .occurrences
            .get(&owner_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl CommitBoundary for InMemoryStore {
    async fn commit(&self, mutation: Mutation) -> Result<CommitReceipt, CommitError> {
        let mut state = self.lock();
        let entity_id = Self::apply(&mut state, &mutation)?;
        state.commits.push(mutation);
        Ok(CommitReceipt { entity_id })
    }
}

/// Clock with a fixed UTC offset per owner, optionally pinned to one instant
#[derive(Debug, Clone)]
pub struct OffsetClock {
    default_offset: FixedOffset,
    offsets: HashMap<Uuid, FixedOffset>,
    pinned: Option<DateTime<Utc>>,
}

impl OffsetClock {
    pub fn new(default_offset: FixedOffset) -> Self {
        Self {
            default_offset,
            offsets: HashMap::new(),
            pinned: None,
        }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    pub fn pinned_at(mut self, now: DateTime<Utc>) -> Self {
        self.pinned = Some(now);
        self
    }

    pub fn with_owner_offset(mut self, owner_id: Uuid, offset: FixedOffset) -> Self {
        self.offsets.insert(owner_id, offset);
        self
    }
}

impl CivilClock for OffsetClock {
    fn now(&self) -> DateTime<Utc> {
        self.pinned.unwrap_or_else(Utc::now)
    }

    fn localize(&self, instant: DateTime<Utc>, owner_id: Uuid) -> NaiveDateTime {
        let offset = self
            .offsets
            .get(&owner_id)
            .copied()
            .unwrap_or(self.default_offset);
        instant.with_timezone(&offset).naive_local()
    }
}
