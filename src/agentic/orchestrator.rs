//! Routine agent
//!
//! Main entry point. Coordinates snapshot retrieval, prompting, plan
//! validation and execution for utterances, and fronts the routine analyzer.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::ActionExecutor;
use super::validator::ActionPlanValidator;
use crate::ai::completion::{
    CompletionRequest, CompletionTransport, InlineImage, StructuredCompletionClient,
};
use crate::ai::gemini::GeminiTransport;
use crate::ai::prompt::PromptAssembler;
use crate::collaborators::{CivilClock, CommitBoundary, HistoryProvider, Mutation, SnapshotProvider};
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::model::{
    ActionPlan, ConflictAssessment, ProposedSchedule, RoutinePattern, TimeSlotSuggestion,
    UtteranceResponse,
};
use crate::model::snapshot::normalize_fact;
use crate::routine::RoutineAnalyzer;

const EMPTY_UTTERANCE_REPLY: &str = "Tell me what you'd like to track or change.";

/// A durable fact pulled out of free text
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFact {
    pub text: String,
    /// Id of the stored fact; `None` when the commit failed
    pub fact_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
struct FactsPayload {
    #[serde(default)]
    facts: Vec<String>,
}

/// Utterance-to-action agent with routine analysis
pub struct RoutineAgent {
    client: StructuredCompletionClient,
    prompts: PromptAssembler,
    validator: ActionPlanValidator,
    executor: ActionExecutor,
    analyzer: Arc<RoutineAnalyzer>,
    snapshots: Arc<dyn SnapshotProvider>,
    commit: Arc<dyn CommitBoundary>,
    clock: Arc<dyn CivilClock>,
}

impl RoutineAgent {
    pub fn builder(config: AgentConfig) -> RoutineAgentBuilder {
        RoutineAgentBuilder::new(config)
    }

    /// Interpret `text` (and an optional image) and apply the resulting plan.
    ///
    /// Provider failures, unusable output and rejected plans abort before
    /// anything is committed. Once execution starts, each action reports
    /// its own outcome.
    pub async fn submit_utterance(
        &self,
        owner_id: Uuid,
        text: &str,
        image: Option<InlineImage>,
        cancel: &CancellationToken,
    ) -> AgentResult<UtteranceResponse> {
        if text.trim().is_empty() && image.is_none() {
            debug!(owner_id = %owner_id, "Empty utterance, nothing to plan");
            return Ok(UtteranceResponse {
                summary_message: EMPTY_UTTERANCE_REPLY.to_string(),
                actions: Vec::new(),
            });
        }

        let snapshot = self
            .snapshots
            .snapshot(owner_id)
            .await
            .map_err(AgentError::Collaborator)?;
        let now = self.clock.now();
        let now_local = self.clock.localize(now, owner_id);

        let prompt =
            self.prompts
                .action_plan(&snapshot, text, now, now_local, image.is_some());
        debug!(owner_id = %owner_id, prompt_chars = prompt.len(), "Action plan prompt built");

        let mut request = CompletionRequest::new("action plan", prompt);
        if let Some(image) = image {
            request = request.with_image(image);
        }

        let plan: ActionPlan = self
            .client
            .complete(&request, cancel)
            .await?
            .into_required("action plan")?;
        let validated = self.validator.validate(&plan, owner_id, &snapshot)?;
        let actions = self.executor.execute(&validated, cancel).await;

        let succeeded = actions.iter().filter(|o| o.is_success()).count();
        info!(
            owner_id = %owner_id,
            actions = actions.len(),
            succeeded,
            failed = actions.len() - succeeded,
            "Utterance processed"
        );

        Ok(UtteranceResponse {
            summary_message: validated.summary_message,
            actions,
        })
    }

    /// Pull durable personal facts out of `text` and remember the new ones
    pub async fn extract_facts(
        &self,
        owner_id: Uuid,
        text: &str,
        cancel: &CancellationToken,
    ) -> AgentResult<Vec<ExtractedFact>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self
            .snapshots
            .snapshot(owner_id)
            .await
            .map_err(AgentError::Collaborator)?;
        let request = CompletionRequest::new(
            "fact extraction",
            self.prompts.fact_extraction(&snapshot, text),
        );
        let Some(payload) = self
            .client
            .complete::<FactsPayload>(&request, cancel)
            .await?
            .into_optional()?
        else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut extracted = Vec::new();
        for fact in payload.facts {
            let fact = fact.split_whitespace().collect::<Vec<_>>().join(" ");
            if fact.is_empty()
                || snapshot.knows_fact(&fact)
                || !seen.insert(normalize_fact(&fact))
            {
                continue;
            }

            let fact_id = match self
                .commit
                .commit(Mutation::RememberFact {
                    owner_id,
                    text: fact.clone(),
                })
                .await
            {
                Ok(receipt) => Some(receipt.entity_id),
                Err(e) => {
                    warn!(owner_id = %owner_id, error = %e, "Failed to remember fact");
                    None
                }
            };
            extracted.push(ExtractedFact {
                text: fact,
                fact_id,
            });
        }

        info!(owner_id = %owner_id, facts = extracted.len(), "Fact extraction complete");
        Ok(extracted)
    }

    pub async fn analyze_routines(
        &self,
        owner_id: Uuid,
        cancel: &CancellationToken,
    ) -> AgentResult<Vec<RoutinePattern>> {
        self.analyzer.analyze_routines(owner_id, cancel).await
    }

    pub async fn assess_conflict(
        &self,
        owner_id: Uuid,
        proposed: &ProposedSchedule,
        cancel: &CancellationToken,
    ) -> AgentResult<Option<ConflictAssessment>> {
        self.analyzer
            .assess_conflict(owner_id, proposed, cancel)
            .await
    }

    pub async fn suggest_slots(
        &self,
        owner_id: Uuid,
        title: &str,
        frequency_per_week: u32,
        cancel: &CancellationToken,
    ) -> AgentResult<Vec<TimeSlotSuggestion>> {
        self.analyzer
            .suggest_slots(owner_id, title, frequency_per_week, cancel)
            .await
    }

    /// Model answering requests, for logging by callers
    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }
}

/// Builder for RoutineAgent
pub struct RoutineAgentBuilder {
    config: AgentConfig,
    transport: Option<Arc<dyn CompletionTransport>>,
    snapshots: Option<Arc<dyn SnapshotProvider>>,
    history: Option<Arc<dyn HistoryProvider>>,
    commit: Option<Arc<dyn CommitBoundary>>,
    clock: Option<Arc<dyn CivilClock>>,
}

impl RoutineAgentBuilder {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            transport: None,
            snapshots: None,
            history: None,
            commit: None,
            clock: None,
        }
    }

    /// Start from environment configuration
    pub fn from_env() -> AgentResult<Self> {
        Ok(Self::new(AgentConfig::from_env()?))
    }

    /// Use `transport` instead of the Gemini transport built from config
    pub fn transport(mut self, transport: Arc<dyn CompletionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn snapshots(mut self, snapshots: Arc<dyn SnapshotProvider>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn history(mut self, history: Arc<dyn HistoryProvider>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn commit(mut self, commit: Arc<dyn CommitBoundary>) -> Self {
        self.commit = Some(commit);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn CivilClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use one store for snapshots, history and commits
    pub fn store<S>(self, store: Arc<S>) -> Self
    where
        S: SnapshotProvider + HistoryProvider + CommitBoundary + 'static,
    {
        self.snapshots(store.clone())
            .history(store.clone())
            .commit(store)
    }

    /// Build the agent
    pub fn build(self) -> AgentResult<RoutineAgent> {
        self.config.validate()?;

        let missing = |what: &str| AgentError::Configuration(format!("{} not configured", what));
        let snapshots = self.snapshots.ok_or_else(|| missing("snapshot provider"))?;
        let history = self.history.ok_or_else(|| missing("history provider"))?;
        let commit = self.commit.ok_or_else(|| missing("commit boundary"))?;
        let clock = self.clock.ok_or_else(|| missing("clock"))?;

        let transport: Arc<dyn CompletionTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(GeminiTransport::new(self.config.provider.clone())?),
        };
        info!(
            provider = transport.provider_name(),
            model = transport.model_name(),
            "Routine agent initialized"
        );

        let client = StructuredCompletionClient::new(transport, self.config.retry.clone());
        let prompts = PromptAssembler::new(self.config.prompt.clone())
            .with_plan_limits(self.config.plan.clone());
        let analyzer = Arc::new(RoutineAnalyzer::new(
            client.clone(),
            prompts.clone(),
            snapshots.clone(),
            history,
            clock.clone(),
            self.config.routine.clone(),
        ));
        let executor = ActionExecutor::new(commit.clone(), clock.clone())
            .with_enricher(analyzer.clone(), self.config.enrichment_timeout);

        Ok(RoutineAgent {
            client,
            prompts,
            validator: ActionPlanValidator::new(self.config.plan.clone()),
            executor,
            analyzer,
            snapshots,
            commit,
            clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::scripted::ScriptedTransport;
    use crate::memory::{InMemoryStore, OffsetClock};

    fn agent(store: Arc<InMemoryStore>, transport: Arc<ScriptedTransport>) -> RoutineAgent {
        RoutineAgent::builder(AgentConfig::default())
            .transport(transport)
            .store(store)
            .clock(Arc::new(OffsetClock::utc()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_collaborators() {
        let result = RoutineAgent::builder(AgentConfig::default())
            .transport(Arc::new(ScriptedTransport::new()))
            .build();
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }

    #[test]
    fn test_build_without_api_key_fails_for_gemini() {
        let store = Arc::new(InMemoryStore::new());
        let result = RoutineAgent::builder(AgentConfig::default())
            .store(store)
            .clock(Arc::new(OffsetClock::utc()))
            .build();
        assert!(matches!(result, Err(AgentError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_blank_utterance_skips_provider() {
        let transport = Arc::new(ScriptedTransport::new());
        let agent = agent(Arc::new(InMemoryStore::new()), transport.clone());

        let response = agent
            .submit_utterance(Uuid::new_v4(), "   ", None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(response.actions.is_empty());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_image_is_forwarded() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_text(r#"{"summaryMessage": "Nothing to do.", "actions": []}"#);
        let agent = agent(Arc::new(InMemoryStore::new()), transport.clone());

        let image = InlineImage {
            mime_type: "image/jpeg".to_string(),
            data: vec![0xff, 0xd8],
        };
        let response = agent
            .submit_utterance(Uuid::new_v4(), "", Some(image.clone()), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(response.summary_message, "Nothing to do.");
        assert_eq!(transport.requests()[0].image, Some(image));
    }

    #[tokio::test]
    async fn test_facts_deduplicated_against_snapshot() {
        let store = Arc::new(InMemoryStore::new());
        let owner = Uuid::new_v4();
        store
            .commit(Mutation::RememberFact {
                owner_id: owner,
                text: "Has a dog.".to_string(),
            })
            .await
            .unwrap();

        let transport = Arc::new(ScriptedTransport::new());
        transport.push_text(
            r#"{"Facts": ["has a dog", "Works  night shifts.", "works night shifts.", " "]}"#,
        );
        let agent = agent(store.clone(), transport);

        let facts = agent
            .extract_facts(owner, "I walk my dog after night shifts", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].text, "Works night shifts.");
        assert!(facts[0].fact_id.is_some());
        assert_eq!(store.commits().len(), 2);
    }

    #[tokio::test]
    async fn test_facts_differing_only_in_trailing_period_stored_once() {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_text(r#"{"facts": ["Has a cat.", "has a cat"]}"#);
        let agent = agent(store.clone(), transport);

        let facts = agent
            .extract_facts(Uuid::new_v4(), "my cat is called Miso", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].text, "Has a cat.");
        assert_eq!(store.commits().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_fact_output_is_benign() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_text("null");
        let agent = agent(Arc::new(InMemoryStore::new()), transport);

        let facts = agent
            .extract_facts(Uuid::new_v4(), "nice weather today", &CancellationToken::new())
            .await
            .unwrap();
        assert!(facts.is_empty());
    }

    #[tokio::test]
    async fn test_empty_plan_output_is_an_error() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_text("");
        let agent = agent(Arc::new(InMemoryStore::new()), transport);

        let result = agent
            .submit_utterance(Uuid::new_v4(), "log my run", None, &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(AgentError::EmptyProviderOutput("action plan"))
        ));
    }
}
