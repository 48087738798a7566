//! Structured completion client
//!
//! Wraps a [`CompletionTransport`] with the throttling retry policy and the
//! syntactic half of response validation. Semantic checks are left to the
//! caller, which also decides whether an empty answer is acceptable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::utils::{parse_structured, ParsedText};
use crate::config::RetryPolicy;
use crate::error::{AgentError, AgentResult};

const HTTP_TOO_MANY_REQUESTS: u16 = 429;

/// One completion request
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// What the call is for, used in logs and error messages
    pub purpose: &'static str,
    pub prompt: String,
    pub image: Option<InlineImage>,
}

/// Image forwarded alongside the prompt
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl CompletionRequest {
    pub fn new(purpose: &'static str, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            prompt: prompt.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.image = Some(image);
        self
    }
}

/// Raw HTTP outcome of one provider call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub status: u16,
    pub body: String,
}

impl ProviderReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Provider wire access; one `send` per attempt
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Perform one provider call. Network failures are `ProviderUnavailable`;
    /// any HTTP status, including errors, is returned as a reply.
    async fn send(&self, request: &CompletionRequest) -> AgentResult<ProviderReply>;

    /// Pull the first textual candidate out of a 2xx body
    fn first_candidate_text(&self, body: &str) -> Result<Option<String>, String>;

    /// Get the model name for logging
    fn model_name(&self) -> &str;

    /// Get the provider name for logging
    fn provider_name(&self) -> &str;
}

/// Terminal state of a completed call
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome<T> {
    Success(T),
    MalformedOutput(String),
    EmptyOutput,
}

/// Result of one `complete` call along with its retry bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionReport<T> {
    pub outcome: CompletionOutcome<T>,
    /// Provider calls made, including the successful one
    pub attempts: u32,
    /// Backoff delays waited before each retry
    pub backoffs: Vec<Duration>,
}

impl<T> CompletionReport<T> {
    /// Treat empty output as an error (e.g. "no action plan")
    pub fn into_required(self, what: &'static str) -> AgentResult<T> {
        match self.outcome {
            CompletionOutcome::Success(value) => Ok(value),
            CompletionOutcome::MalformedOutput(reason) => {
                Err(AgentError::MalformedProviderOutput(reason))
            }
            CompletionOutcome::EmptyOutput => Err(AgentError::EmptyProviderOutput(what)),
        }
    }

    /// Treat empty output as benign (e.g. "no facts found")
    pub fn into_optional(self) -> AgentResult<Option<T>> {
        match self.outcome {
            CompletionOutcome::Success(value) => Ok(Some(value)),
            CompletionOutcome::MalformedOutput(reason) => {
                Err(AgentError::MalformedProviderOutput(reason))
            }
            CompletionOutcome::EmptyOutput => Ok(None),
        }
    }
}

/// Provider client with throttling backoff and JSON shape validation
#[derive(Clone)]
pub struct StructuredCompletionClient {
    transport: Arc<dyn CompletionTransport>,
    retry: RetryPolicy,
}

impl StructuredCompletionClient {
    pub fn new(transport: Arc<dyn CompletionTransport>, retry: RetryPolicy) -> Self {
        Self { transport, retry }
    }

    pub fn model_name(&self) -> &str {
        self.transport.model_name()
    }

    /// Call the provider and parse the first candidate into `T`.
    ///
    /// HTTP 429 is retried `max_retries` times with doubling backoff, then
    /// surfaces as `ProviderThrottled`. Any other non-2xx fails immediately.
    pub async fn complete<T: DeserializeOwned>(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> AgentResult<CompletionReport<T>> {
        let mut attempts: u32 = 0;
        let mut backoffs: Vec<Duration> = Vec::new();

        let reply = loop {
            attempts += 1;
            let sent = tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                reply = self.transport.send(request) => reply,
            };
            let reply = sent.inspect_err(|e| {
                error!(
                    provider = self.transport.provider_name(),
                    purpose = request.purpose,
                    attempt = attempts,
                    error = %e,
                    "Completion provider call failed"
                );
            })?;

            if reply.status != HTTP_TOO_MANY_REQUESTS {
                break reply;
            }

            let retry = attempts;
            if retry > self.retry.max_retries {
                let waited = backoffs.iter().sum();
                error!(
                    provider = self.transport.provider_name(),
                    purpose = request.purpose,
                    attempts,
                    "Completion provider still throttled, giving up"
                );
                return Err(AgentError::ProviderThrottled { attempts, waited });
            }

            let backoff = self.retry.backoff_for(retry);
            warn!(
                provider = self.transport.provider_name(),
                purpose = request.purpose,
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Completion provider throttled, backing off"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(backoff) => {}
            }
            backoffs.push(backoff);
        };

        if !reply.is_success() {
            error!(
                provider = self.transport.provider_name(),
                purpose = request.purpose,
                status = reply.status,
                "Completion provider error: {}",
                reply.body
            );
            return Err(AgentError::ProviderUnavailable {
                status: Some(reply.status),
                message: format!("HTTP {}", reply.status),
            });
        }

        let outcome = match self.transport.first_candidate_text(&reply.body) {
            Err(reason) => CompletionOutcome::MalformedOutput(reason),
            Ok(None) => CompletionOutcome::EmptyOutput,
            Ok(Some(text)) => {
                debug!(
                    purpose = request.purpose,
                    chars = text.len(),
                    "Parsing provider candidate"
                );
                match parse_structured::<T>(&text) {
                    ParsedText::Parsed(value) => CompletionOutcome::Success(value),
                    ParsedText::Empty => CompletionOutcome::EmptyOutput,
                    ParsedText::Malformed(reason) => CompletionOutcome::MalformedOutput(reason),
                }
            }
        };

        match &outcome {
            CompletionOutcome::Success(_) => info!(
                purpose = request.purpose,
                model = self.transport.model_name(),
                attempts,
                "Completion succeeded"
            ),
            CompletionOutcome::EmptyOutput => info!(
                purpose = request.purpose,
                attempts,
                "Completion returned no usable output"
            ),
            CompletionOutcome::MalformedOutput(reason) => warn!(
                purpose = request.purpose,
                attempts,
                reason = %reason,
                "Completion output did not match the expected shape"
            ),
        }

        Ok(CompletionReport {
            outcome,
            attempts,
            backoffs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::gemini::envelope;
    use crate::ai::scripted::ScriptedTransport;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Answer {
        value: i64,
    }

    fn client(transport: Arc<ScriptedTransport>) -> StructuredCompletionClient {
        StructuredCompletionClient::new(transport, RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_three_times_then_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(429);
        transport.push_status(429);
        transport.push_status(429);
        transport.push_text(r#"{"value": 42}"#);

        let started = tokio::time::Instant::now();
        let report = client(transport.clone())
            .complete::<Answer>(
                &CompletionRequest::new("test", "prompt"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.outcome, CompletionOutcome::Success(Answer { value: 42 }));
        assert_eq!(report.attempts, 4);
        assert_eq!(
            report.backoffs,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        assert!(started.elapsed() >= Duration::from_secs(14));
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_beyond_retries_surfaces() {
        let transport = Arc::new(ScriptedTransport::new());
        for _ in 0..4 {
            transport.push_status(429);
        }
        transport.push_text(r#"{"value": 1}"#);

        let result = client(transport.clone())
            .complete::<Answer>(
                &CompletionRequest::new("test", "prompt"),
                &CancellationToken::new(),
            )
            .await;

        match result {
            Err(AgentError::ProviderThrottled { attempts, waited }) => {
                assert_eq!(attempts, 4);
                assert_eq!(waited, Duration::from_secs(14));
            }
            other => panic!("expected ProviderThrottled, got {:?}", other),
        }
        assert_eq!(transport.request_count(), 4);
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(503);
        transport.push_text(r#"{"value": 1}"#);

        let result = client(transport.clone())
            .complete::<Answer>(
                &CompletionRequest::new("test", "prompt"),
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(AgentError::ProviderUnavailable {
                status: Some(503),
                ..
            })
        ));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_and_malformed_outcomes() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_reply(200, r#"{"candidates":[]}"#);
        transport.push_text(r#"{"unexpected": true}"#);
        transport.push_reply(200, &envelope("```json\n{\"Value\": 7}\n```"));

        let client = client(transport);
        let cancel = CancellationToken::new();
        let request = CompletionRequest::new("test", "prompt");

        let empty = client.complete::<Answer>(&request, &cancel).await.unwrap();
        assert_eq!(empty.outcome, CompletionOutcome::EmptyOutput);
        assert!(matches!(
            empty.into_required("answer"),
            Err(AgentError::EmptyProviderOutput("answer"))
        ));

        let malformed = client.complete::<Answer>(&request, &cancel).await.unwrap();
        assert!(matches!(
            malformed.outcome,
            CompletionOutcome::MalformedOutput(_)
        ));

        let fenced = client.complete::<Answer>(&request, &cancel).await.unwrap();
        assert_eq!(fenced.into_optional().unwrap(), Some(Answer { value: 7 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(429);
        transport.push_text(r#"{"value": 1}"#);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = client(transport.clone())
            .complete::<Answer>(&CompletionRequest::new("test", "prompt"), &cancel)
            .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert_eq!(transport.request_count(), 1);
    }
}
