//! Scripted completion transport
//!
//! Replays a queue of canned provider replies and records every request it
//! receives. Used by the test suite and by the CLI's `--replay` mode, which
//! loads the queue from a JSON or YAML file.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::completion::{CompletionRequest, CompletionTransport, ProviderReply};
use super::gemini::{envelope, first_candidate_text};
use crate::error::{AgentError, AgentResult};

/// One entry of a replay file.
///
/// `text` is wrapped in a Gemini envelope; `body` is sent verbatim.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptedReply {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

fn default_status() -> u16 {
    200
}

impl From<ScriptedReply> for ProviderReply {
    fn from(reply: ScriptedReply) -> Self {
        let body = match (reply.body, reply.text) {
            (Some(body), _) => body,
            (None, Some(text)) => envelope(&text),
            (None, None) => String::new(),
        };
        ProviderReply {
            status: reply.status,
            body,
        }
    }
}

/// Transport answering from a fixed script
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<ProviderReply>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a replay script (a list of [`ScriptedReply`]) from JSON or YAML
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay script {}", path.display()))?;
        let replies: Vec<ScriptedReply> = serde_yaml::from_str(&text)
            .with_context(|| format!("Failed to parse replay script {}", path.display()))?;

        let transport = Self::new();
        for reply in replies {
            transport.push(reply.into());
        }
        Ok(transport)
    }

    pub fn push(&self, reply: ProviderReply) {
        self.lock_replies().push_back(reply);
    }

    /// Queue a raw status/body pair
    pub fn push_reply(&self, status: u16, body: &str) {
        self.push(ProviderReply {
            status,
            body: body.to_string(),
        });
    }

    /// Queue a 200 reply whose first candidate is `text`
    pub fn push_text(&self, text: &str) {
        self.push_reply(200, &envelope(text));
    }

    /// Queue an error status with an empty body
    pub fn push_status(&self, status: u16) {
        self.push_reply(status, "");
    }

    pub fn request_count(&self) -> usize {
        self.lock_requests().len()
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.lock_requests().clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<ProviderReply>> {
        self.replies.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_requests(&self) -> std::sync::MutexGuard<'_, Vec<CompletionRequest>> {
        self.requests.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn send(&self, request: &CompletionRequest) -> AgentResult<ProviderReply> {
        self.lock_requests().push(request.clone());
        self.lock_replies()
            .pop_front()
            .ok_or_else(|| AgentError::ProviderUnavailable {
                status: None,
                message: format!("replay script exhausted at '{}'", request.purpose),
            })
    }

    fn first_candidate_text(&self, body: &str) -> Result<Option<String>, String> {
        first_candidate_text(body)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }

    fn provider_name(&self) -> &str {
        "Scripted"
    }
}
