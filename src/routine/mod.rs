//! Routine analysis
//!
//! Detects recurring time-of-day habits, checks proposed schedules against
//! them and suggests new slots. Pattern extraction is delegated to the
//! completion provider; this module decides when there is enough data to
//! ask, localizes every instant before prompting, and applies deterministic
//! rules to whatever comes back. Nothing is cached: each call recomputes.

pub mod gating;
pub mod severity;
pub mod slots;
pub mod wire;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agentic::executor::ScheduleEnricher;
use crate::ai::completion::{CompletionRequest, StructuredCompletionClient};
use crate::ai::prompt::PromptAssembler;
use crate::collaborators::{CivilClock, HistoryProvider, SnapshotProvider};
use crate::config::RoutinePolicy;
use crate::error::{AgentError, AgentResult};
use crate::model::{
    ConfidenceTier, ConflictAssessment, ProposedSchedule, RoutinePattern, SeverityTier,
    SubjectHistory, TimeSlotSuggestion,
};

pub use gating::{gate, EligibleHistory, GateRejection};
pub use slots::{fallback_suggestions, SUGGESTION_COUNT};

use wire::{valid_blocks, ConflictPayload, PatternsPayload, SlotsPayload};

/// Provider-backed routine analysis with deterministic guard rails
#[derive(Clone)]
pub struct RoutineAnalyzer {
    client: StructuredCompletionClient,
    prompts: PromptAssembler,
    snapshots: Arc<dyn SnapshotProvider>,
    history: Arc<dyn HistoryProvider>,
    clock: Arc<dyn CivilClock>,
    policy: RoutinePolicy,
}

impl RoutineAnalyzer {
    pub fn new(
        client: StructuredCompletionClient,
        prompts: PromptAssembler,
        snapshots: Arc<dyn SnapshotProvider>,
        history: Arc<dyn HistoryProvider>,
        clock: Arc<dyn CivilClock>,
        policy: RoutinePolicy,
    ) -> Self {
        Self {
            client,
            prompts,
            snapshots,
            history,
            clock,
            policy,
        }
    }

    /// Detect routines for `owner_id`. Empty when the history is too thin.
    pub async fn analyze_routines(
        &self,
        owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> AgentResult<Vec<RoutinePattern>> {
        let Some(histories) = self.eligible_histories(owner_id).await? else {
            return Ok(Vec::new());
        };

        let request =
            CompletionRequest::new("routine patterns", self.prompts.pattern_extraction(&histories));
        let payload = self
            .client
            .complete::<PatternsPayload>(&request, cancel)
            .await?
            .into_optional()?
            .unwrap_or_default();

        let patterns = to_patterns(payload, &histories);
        info!(
            owner_id = %owner_id,
            analyzed = histories.len(),
            patterns = patterns.len(),
            "Routine analysis complete"
        );
        Ok(patterns)
    }

    /// Check `proposed` against current routines.
    ///
    /// `None` when there are no routines to compare against; no provider
    /// call is made in that case.
    pub async fn assess_conflict(
        &self,
        owner_id: Uuid,
        proposed: &ProposedSchedule,
        cancel: &CancellationToken,
    ) -> AgentResult<Option<ConflictAssessment>> {
        let patterns: Vec<RoutinePattern> = self
            .analyze_routines(owner_id, cancel)
            .await?
            .into_iter()
            .filter(|p| Some(p.subject_id) != proposed.subject_id)
            .collect();
        if patterns.is_empty() {
            debug!(owner_id = %owner_id, "No routines to compare against");
            return Ok(None);
        }

        let mut proposed = proposed.clone();
        if proposed.title.trim().is_empty() {
            if let Some(id) = proposed.subject_id {
                let snapshot = self
                    .snapshots
                    .snapshot(owner_id)
                    .await
                    .map_err(AgentError::Collaborator)?;
                if let Some(subject) = snapshot.subject(id) {
                    proposed.title = subject.title.clone();
                }
            }
        }

        let request = CompletionRequest::new(
            "conflict assessment",
            self.prompts.conflict_assessment(&proposed, &patterns),
        );
        let payload = self
            .client
            .complete::<ConflictPayload>(&request, cancel)
            .await?
            .into_optional()?;

        Ok(Some(reconcile_conflict(&proposed, &patterns, payload)))
    }

    /// Suggest exactly three slots for a new habit, best first
    pub async fn suggest_slots(
        &self,
        owner_id: Uuid,
        title: &str,
        frequency_per_week: u32,
        cancel: &CancellationToken,
    ) -> AgentResult<Vec<TimeSlotSuggestion>> {
        let patterns = self.analyze_routines(owner_id, cancel).await?;
        if patterns.is_empty() {
            debug!(owner_id = %owner_id, "No routines yet, using fallback slots");
            return Ok(fallback_suggestions(frequency_per_week));
        }

        let request = CompletionRequest::new(
            "slot suggestions",
            self.prompts
                .slot_suggestion(title, frequency_per_week, &patterns),
        );
        let report = self
            .client
            .complete::<SlotsPayload>(&request, cancel)
            .await?;

        let payload = match report.into_optional() {
            Ok(Some(payload)) => payload,
            Ok(None) => SlotsPayload::default(),
            Err(e) => {
                warn!(owner_id = %owner_id, error = %e, "Unusable slot suggestions, using fallback");
                SlotsPayload::default()
            }
        };

        let suggestions = payload
            .suggestions
            .into_iter()
            .map(|raw| TimeSlotSuggestion {
                description: raw.description.unwrap_or_default().trim().to_string(),
                time_blocks: valid_blocks(&raw.time_blocks),
                rationale: raw.rationale.unwrap_or_default().trim().to_string(),
                score: slots::clamp_score(raw.score.unwrap_or(0.0)),
            })
            .collect();
        Ok(slots::normalize(suggestions, frequency_per_week))
    }

    /// Localized, gated history; `None` when analysis should be skipped
    async fn eligible_histories(&self, owner_id: Uuid) -> AgentResult<Option<Vec<SubjectHistory>>> {
        let occurrences = self
            .history
            .occurrences(owner_id)
            .await
            .map_err(AgentError::Collaborator)?;
        let snapshot = self
            .snapshots
            .snapshot(owner_id)
            .await
            .map_err(AgentError::Collaborator)?;

        // Occurrences of deleted or foreign subjects are ignored
        let titles: BTreeMap<Uuid, &str> = snapshot
            .subjects
            .iter()
            .filter(|s| s.owner_id == owner_id)
            .map(|s| (s.id, s.title.as_str()))
            .collect();
        let local: Vec<_> = occurrences
            .iter()
            .filter(|o| titles.contains_key(&o.subject_id))
            .map(|o| (o.subject_id, self.clock.localize(o.occurred_at, owner_id)))
            .collect();
        let now_local = self.clock.localize(self.clock.now(), owner_id);

        match gate(&self.policy, &local, now_local) {
            Ok(eligible) => {
                debug!(
                    owner_id = %owner_id,
                    span_days = eligible.span_days,
                    subjects = eligible.subjects.len(),
                    "History eligible for routine analysis"
                );
                Ok(Some(
                    eligible
                        .subjects
                        .into_iter()
                        .map(|(subject_id, local_times)| SubjectHistory {
                            subject_id,
                            title: titles
                                .get(&subject_id)
                                .map(|t| t.to_string())
                                .unwrap_or_default(),
                            local_times,
                        })
                        .collect(),
                ))
            }
            Err(reason @ GateRejection::WindowOutOfRange { .. }) => {
                Err(AgentError::Configuration(reason.to_string()))
            }
            Err(reason) => {
                info!(owner_id = %owner_id, reason = %reason, "Skipping routine analysis");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl ScheduleEnricher for RoutineAnalyzer {
    async fn enrich(
        &self,
        owner_id: Uuid,
        proposed: &ProposedSchedule,
        cancel: &CancellationToken,
    ) -> AgentResult<Option<ConflictAssessment>> {
        self.assess_conflict(owner_id, proposed, cancel).await
    }
}

/// Keep one valid pattern per analyzed subject, scores clamped
fn to_patterns(payload: PatternsPayload, histories: &[SubjectHistory]) -> Vec<RoutinePattern> {
    let mut seen = HashSet::new();
    let mut patterns = Vec::new();

    for raw in payload.patterns {
        let Some(history) = raw
            .subject_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id.trim()).ok())
            .and_then(|id| histories.iter().find(|h| h.subject_id == id))
        else {
            debug!(subject_id = ?raw.subject_id, "Dropping pattern for a subject outside the analyzed set");
            continue;
        };
        if !seen.insert(history.subject_id) {
            continue;
        }

        let time_blocks = valid_blocks(&raw.time_blocks);
        if time_blocks.is_empty() {
            debug!(subject_id = %history.subject_id, "Dropping pattern without valid time blocks");
            continue;
        }

        let confidence = raw
            .confidence
            .as_deref()
            .and_then(|c| c.parse::<ConfidenceTier>().ok())
            .unwrap_or(ConfidenceTier::Low);

        patterns.push(RoutinePattern {
            subject_id: history.subject_id,
            subject_title: history.title.clone(),
            description: raw.description.unwrap_or_default().trim().to_string(),
            consistency_score: slots::clamp_score(raw.consistency_score.unwrap_or(0.0)),
            confidence,
            time_blocks,
        });
    }

    patterns.sort_by(|a, b| {
        a.subject_title
            .cmp(&b.subject_title)
            .then(a.subject_id.cmp(&b.subject_id))
    });
    patterns
}

/// Combine the provider's answer with the deterministic severity rule.
/// The rule decides whether there is a conflict and how severe it is; the
/// provider only contributes the recommendation when it agrees.
fn reconcile_conflict(
    proposed: &ProposedSchedule,
    patterns: &[RoutinePattern],
    payload: Option<ConflictPayload>,
) -> ConflictAssessment {
    let conflicting = severity::conflicting_subjects(proposed, patterns);
    let has_conflict = !conflicting.is_empty();
    let severity: Option<SeverityTier> = conflicting.iter().map(|c| c.severity).max();

    let provider_recommendation = payload.as_ref().and_then(|p| {
        if p.has_conflict != has_conflict {
            debug!(
                provider = p.has_conflict,
                rule = has_conflict,
                "Provider conflict verdict overridden"
            );
            return None;
        }
        if let Some(claimed) = p.severity.as_deref() {
            if claimed.parse::<SeverityTier>().ok() != severity {
                debug!(provider = claimed, rule = ?severity, "Provider severity overridden");
            }
        }
        p.recommendation
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string)
    });

    if !has_conflict {
        return ConflictAssessment::no_conflict(
            provider_recommendation
                .unwrap_or_else(|| "This schedule fits around your current routines.".to_string()),
        );
    }

    let recommendation = provider_recommendation.unwrap_or_else(|| {
        let titles: Vec<&str> = conflicting.iter().map(|c| c.title.as_str()).collect();
        format!(
            "This overlaps with your routine for {}. Consider a different time.",
            titles.join(", ")
        )
    });
    ConflictAssessment {
        has_conflict,
        conflicting_subjects: conflicting,
        severity,
        recommendation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::scripted::ScriptedTransport;
    use crate::config::RetryPolicy;
    use crate::memory::{InMemoryStore, OffsetClock};
    use crate::model::TimeBlock;
    use chrono::{TimeZone, Utc, Weekday};

    fn history(title: &str) -> SubjectHistory {
        SubjectHistory {
            subject_id: Uuid::new_v4(),
            title: title.to_string(),
            local_times: vec![],
        }
    }

    fn block(day: Weekday, start: i64) -> TimeBlock {
        TimeBlock::new(day, start, start + 1).unwrap()
    }

    #[test]
    fn test_patterns_outside_analyzed_set_dropped() {
        let run = history("Run");
        let payload: PatternsPayload = serde_json::from_value(serde_json::json!({
            "patterns": [
                {"subjectid": Uuid::new_v4().to_string(), "timeblocks": [{"day": "Mon", "starthour": 7, "endhour": 8}]},
                {"subjectid": run.subject_id.to_string(), "consistencyscore": 1.4, "confidence": "HIGH",
                 "timeblocks": [{"day": "Mon", "starthour": 7, "endhour": 8}]},
                {"subjectid": run.subject_id.to_string(), "timeblocks": [{"day": "Tue", "starthour": 7, "endhour": 8}]}
            ]
        }))
        .unwrap();

        let patterns = to_patterns(payload, &[run.clone()]);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].subject_id, run.subject_id);
        assert_eq!(patterns[0].subject_title, "Run");
        assert_eq!(patterns[0].consistency_score, 1.0);
        assert_eq!(patterns[0].confidence, ConfidenceTier::High);
        assert_eq!(patterns[0].time_blocks, vec![block(Weekday::Mon, 7)]);
    }

    #[test]
    fn test_rule_overrides_provider_verdict() {
        let pattern = RoutinePattern {
            subject_id: Uuid::new_v4(),
            subject_title: "Run".to_string(),
            description: String::new(),
            consistency_score: 0.9,
            confidence: ConfidenceTier::High,
            time_blocks: vec![block(Weekday::Mon, 7)],
        };
        let proposed = ProposedSchedule {
            subject_id: None,
            title: "Swim".to_string(),
            time_blocks: vec![block(Weekday::Mon, 8)],
        };
        let payload = ConflictPayload {
            has_conflict: false,
            recommendation: Some("All clear!".to_string()),
            ..ConflictPayload::default()
        };

        let assessment = reconcile_conflict(&proposed, &[pattern], Some(payload));
        assert!(assessment.has_conflict);
        assert_eq!(assessment.severity, Some(SeverityTier::High));
        assert_eq!(assessment.conflicting_subjects.len(), 1);
        assert!(assessment.recommendation.contains("Run"));
    }

    #[test]
    fn test_no_conflict_has_empty_list() {
        let pattern = RoutinePattern {
            subject_id: Uuid::new_v4(),
            subject_title: "Run".to_string(),
            description: String::new(),
            consistency_score: 0.9,
            confidence: ConfidenceTier::High,
            time_blocks: vec![block(Weekday::Mon, 7)],
        };
        let proposed = ProposedSchedule {
            subject_id: None,
            title: "Read".to_string(),
            time_blocks: vec![block(Weekday::Thu, 21)],
        };

        let assessment = reconcile_conflict(&proposed, &[pattern], None);
        assert!(!assessment.has_conflict);
        assert!(assessment.conflicting_subjects.is_empty());
        assert_eq!(assessment.severity, None);
    }

    #[tokio::test]
    async fn test_unvalidated_oversized_window_is_a_configuration_error() {
        let owner = Uuid::new_v4();
        let store = Arc::new(InMemoryStore::new());
        let run = store.add_subject(owner, "Run");
        for day in 1..=10 {
            store.add_occurrence(owner, run, Utc.with_ymd_and_hms(2026, 10, day, 7, 0, 0).unwrap());
        }
        let transport = Arc::new(ScriptedTransport::new());
        let clock = OffsetClock::utc().pinned_at(Utc.with_ymd_and_hms(2026, 10, 16, 7, 0, 0).unwrap());
        let analyzer = RoutineAnalyzer::new(
            StructuredCompletionClient::new(transport.clone(), RetryPolicy::default()),
            PromptAssembler::default(),
            store.clone(),
            store,
            Arc::new(clock),
            RoutinePolicy {
                trailing_window_days: 100_000_000,
                ..RoutinePolicy::default()
            },
        );

        let result = analyzer
            .analyze_routines(owner, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AgentError::Configuration(_))));
        assert_eq!(transport.request_count(), 0);
    }
}
