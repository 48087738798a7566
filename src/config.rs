//! Agent configuration
//!
//! Everything tunable lives here: provider settings, retry policy, prompt
//! size limits, plan safety limits and the routine-analysis gating policy.
//! Configuration can be built from defaults, from environment variables
//! (`.env` is honoured via `dotenvy`), or from a YAML document.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, AgentResult};

/// Default Gemini model
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default Gemini REST endpoint
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Upper bound for every day-count in [`RoutinePolicy`]
const MAX_POLICY_DAYS: i64 = 3650;

/// Complete agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub provider: ProviderConfig,
    pub retry: RetryPolicy,
    pub prompt: PromptLimits,
    pub plan: PlanLimits,
    pub routine: RoutinePolicy,
    /// Upper bound for one conflict-enrichment call after an action commits
    #[serde(with = "duration_secs")]
    pub enrichment_timeout: Duration,
}

/// Completion provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub timeout_seconds: u64,
}

/// Backoff policy for provider throttling (HTTP 429)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    #[serde(with = "duration_secs")]
    pub initial_backoff: Duration,
}

/// Bounds on how much of the snapshot is serialized into a prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptLimits {
    pub max_subjects: usize,
    pub max_labels: usize,
    pub max_facts: usize,
    pub max_occurrences_per_subject: usize,
    /// Free-form text fields are cut to this many characters
    pub max_text_chars: usize,
}

/// Safety limits enforced on every action plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanLimits {
    pub max_actions: usize,
    pub max_destructive_actions: usize,
}

/// Minimum-data policy for routine analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutinePolicy {
    /// Calendar days (inclusive) the owner's full history must span
    pub min_history_days: i64,
    /// Occurrences a subject needs inside the trailing window to be analyzed
    pub min_occurrences_per_subject: usize,
    pub trailing_window_days: i64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.1,
            max_output_tokens: Some(2048),
            timeout_seconds: 30,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): 2s, 4s, 8s with defaults
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            max_subjects: 50,
            max_labels: 50,
            max_facts: 20,
            max_occurrences_per_subject: 60,
            max_text_chars: 200,
        }
    }
}

impl Default for PlanLimits {
    fn default() -> Self {
        Self {
            max_actions: 20,
            max_destructive_actions: 3,
        }
    }
}

impl Default for RoutinePolicy {
    fn default() -> Self {
        Self {
            min_history_days: 7,
            min_occurrences_per_subject: 5,
            trailing_window_days: 60,
        }
    }
}

impl AgentConfig {
    /// Defaults with an explicit API key
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.provider.api_key = api_key.into();
        config
    }

    /// Build from environment variables, falling back to defaults.
    ///
    /// `GEMINI_API_KEY` is required; `GEMINI_MODEL`, `GEMINI_BASE_URL`,
    /// `AGENT_TEMPERATURE` and `AGENT_TIMEOUT_SECONDS` are optional.
    pub fn from_env() -> AgentResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.provider.api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
            AgentError::Configuration("GEMINI_API_KEY environment variable not set".to_string())
        })?;
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config.provider.model = model;
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            config.provider.base_url = base_url;
        }
        if let Ok(value) = std::env::var("AGENT_TEMPERATURE") {
            config.provider.temperature = value.parse().map_err(|_| {
                AgentError::Configuration(format!("AGENT_TEMPERATURE is not a number: {}", value))
            })?;
        }
        if let Ok(value) = std::env::var("AGENT_TIMEOUT_SECONDS") {
            config.provider.timeout_seconds = value.parse().map_err(|_| {
                AgentError::Configuration(format!(
                    "AGENT_TIMEOUT_SECONDS is not an integer: {}",
                    value
                ))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document. Missing sections keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> AgentResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| AgentError::Configuration(format!("invalid YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the pipeline's guarantees
    pub fn validate(&self) -> AgentResult<()> {
        if !(0.0..=1.0).contains(&self.provider.temperature) {
            return Err(AgentError::Configuration(format!(
                "temperature must be within [0, 1], got {}",
                self.provider.temperature
            )));
        }
        for (name, days) in [
            ("routine.min_history_days", self.routine.min_history_days),
            ("routine.trailing_window_days", self.routine.trailing_window_days),
        ] {
            if !(1..=MAX_POLICY_DAYS).contains(&days) {
                return Err(AgentError::Configuration(format!(
                    "{} must be within 1..={}, got {}",
                    name, MAX_POLICY_DAYS, days
                )));
            }
        }
        if self.plan.max_actions == 0 {
            return Err(AgentError::Configuration(
                "plan.max_actions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            retry: RetryPolicy::default(),
            prompt: PromptLimits::default(),
            plan: PlanLimits::default(),
            routine: RoutinePolicy::default(),
            enrichment_timeout: Duration::from_secs(5),
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_documented_thresholds() {
        let config = AgentConfig::default();
        assert_eq!(config.routine.min_history_days, 7);
        assert_eq!(config.routine.min_occurrences_per_subject, 5);
        assert_eq!(config.routine.trailing_window_days, 60);
        assert_eq!(config.plan.max_destructive_actions, 3);
        assert_eq!(config.enrichment_timeout, Duration::from_secs(5));
        assert!((config.provider.temperature - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn test_backoff_doubles() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff_for(1), Duration::from_secs(2));
        assert_eq!(retry.backoff_for(2), Duration::from_secs(4));
        assert_eq!(retry.backoff_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_yaml_overrides_keep_other_defaults() {
        let yaml = r#"
routine:
  min_history_days: 14
plan:
  max_destructive_actions: 1
enrichment_timeout: 2.5
"#;
        let config = AgentConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.routine.min_history_days, 14);
        assert_eq!(config.routine.min_occurrences_per_subject, 5);
        assert_eq!(config.plan.max_destructive_actions, 1);
        assert_eq!(config.plan.max_actions, 20);
        assert_eq!(config.enrichment_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_oversized_trailing_window_rejected() {
        let yaml = "routine:\n  trailing_window_days: 100000000\n";
        assert!(matches!(
            AgentConfig::from_yaml_str(yaml),
            Err(AgentError::Configuration(_))
        ));

        let mut config = AgentConfig::default();
        config.routine.trailing_window_days = 3650;
        assert!(config.validate().is_ok());
        config.routine.min_history_days = 3651;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unrepresentable_duration_is_an_error() {
        for yaml in ["enrichment_timeout: 1e300\n", "retry:\n  initial_backoff: 1e300\n"] {
            assert!(matches!(
                AgentConfig::from_yaml_str(yaml),
                Err(AgentError::Configuration(_))
            ));
        }
        assert!(matches!(
            AgentConfig::from_yaml_str("enrichment_timeout: -1\n"),
            Err(AgentError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_temperature_rejected() {
        let yaml = "provider:\n  temperature: 1.7\n";
        assert!(matches!(
            AgentConfig::from_yaml_str(yaml),
            Err(AgentError::Configuration(_))
        ));
    }
}
