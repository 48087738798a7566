//! External collaborator interfaces
//!
//! Persistence, snapshot retrieval and timezone resolution live outside this
//! crate. The pipeline only sees these traits; [`crate::memory`] provides
//! in-process implementations for tests and the CLI.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{DomainSnapshot, Occurrence, Schedule};

/// Supplies an authorization-scoped snapshot of one owner's domain
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn snapshot(&self, owner_id: Uuid) -> Result<DomainSnapshot>;
}

/// Supplies an owner's full occurrence history
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn occurrences(&self, owner_id: Uuid) -> Result<Vec<Occurrence>>;
}

/// Persists one mutation; each call is its own commit
#[async_trait]
pub trait CommitBoundary: Send + Sync {
    async fn commit(&self, mutation: Mutation) -> Result<CommitReceipt, CommitError>;
}

/// Current time and owner-local civil time
pub trait CivilClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn localize(&self, instant: DateTime<Utc>, owner_id: Uuid) -> NaiveDateTime;
}

/// A domain mutation produced from one validated action
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateSubject {
        owner_id: Uuid,
        title: String,
        notes: Option<String>,
        schedule: Option<Schedule>,
    },
    UpdateSubject {
        owner_id: Uuid,
        subject_id: Uuid,
        title: Option<String>,
        notes: Option<String>,
        schedule: Option<Schedule>,
    },
    RecordOccurrence {
        owner_id: Uuid,
        subject_id: Uuid,
        occurred_at: DateTime<Utc>,
        note: Option<String>,
    },
    AssignLabel {
        owner_id: Uuid,
        subject_id: Uuid,
        label: String,
    },
    RemoveLabel {
        owner_id: Uuid,
        subject_id: Uuid,
        label: String,
    },
    DeleteSubject {
        owner_id: Uuid,
        subject_id: Uuid,
    },
    RememberFact {
        owner_id: Uuid,
        text: String,
    },
}

impl Mutation {
    pub fn owner_id(&self) -> Uuid {
        match self {
            Mutation::CreateSubject { owner_id, .. }
            | Mutation::UpdateSubject { owner_id, .. }
            | Mutation::RecordOccurrence { owner_id, .. }
            | Mutation::AssignLabel { owner_id, .. }
            | Mutation::RemoveLabel { owner_id, .. }
            | Mutation::DeleteSubject { owner_id, .. }
            | Mutation::RememberFact { owner_id, .. } => *owner_id,
        }
    }
}

/// Identifier of the entity created or affected by a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    pub entity_id: Uuid,
}

/// Commit failures; all of them become a Failed action outcome
#[derive(Error, Debug)]
pub enum CommitError {
    #[error("{0} already exists")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("storage unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),
}
