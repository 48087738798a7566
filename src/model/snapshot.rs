//! Domain snapshot supplied by the snapshot collaborator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::Schedule;

/// Authorization-scoped view of one owner's domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainSnapshot {
    pub owner_id: Uuid,
    #[serde(default)]
    pub subjects: Vec<SubjectSummary>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub prior_facts: Vec<PriorFact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSummary {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorFact {
    pub id: Uuid,
    pub text: String,
}

/// One recorded occurrence of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub subject_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

impl DomainSnapshot {
    pub fn new(owner_id: Uuid) -> Self {
        Self {
            owner_id,
            ..Default::default()
        }
    }

    pub fn subject(&self, id: Uuid) -> Option<&SubjectSummary> {
        self.subjects.iter().find(|s| s.id == id)
    }

    /// True when a fact with the same normalized text is already known
    pub fn knows_fact(&self, text: &str) -> bool {
        let wanted = normalize_fact(text);
        self.prior_facts
            .iter()
            .any(|fact| normalize_fact(&fact.text) == wanted)
    }
}

/// Comparison key for fact text: case, spacing and trailing periods ignored
pub(crate) fn normalize_fact(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches('.')
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knows_fact_ignores_case_and_spacing() {
        let mut snapshot = DomainSnapshot::new(Uuid::new_v4());
        snapshot.prior_facts.push(PriorFact {
            id: Uuid::new_v4(),
            text: "Works night shifts on weekends.".to_string(),
        });
        assert!(snapshot.knows_fact("works  night shifts on WEEKENDS"));
        assert!(!snapshot.knows_fact("Has a dog"));
    }
}
