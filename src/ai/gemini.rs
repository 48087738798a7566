//! Google Gemini transport
//!
//! Sends one `generateContent` call per attempt and hands the raw status and
//! body back to [`super::completion::StructuredCompletionClient`], which owns
//! retry and parsing decisions.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::completion::{CompletionRequest, CompletionTransport, ProviderReply};
use crate::config::ProviderConfig;
use crate::error::{AgentError, AgentResult};

/// Gemini API client
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    config: ProviderConfig,
    client: Client,
}

/// Gemini API request format
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum GeminiPart {
    Text(String),
    InlineData(GeminiBlob),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

/// Gemini generation configuration
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    response_mime_type: &'static str,
}

/// Gemini API response format
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    #[serde(default)]
    prompt_token_count: Option<u32>,
    #[serde(default)]
    candidates_token_count: Option<u32>,
    #[serde(default)]
    total_token_count: Option<u32>,
}

impl GeminiTransport {
    /// Create a new Gemini transport
    pub fn new(config: ProviderConfig) -> AgentResult<Self> {
        if config.api_key.is_empty() {
            return Err(AgentError::Configuration(
                "Gemini API key is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AgentError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn build_request(&self, request: &CompletionRequest) -> GeminiRequest {
        let mut parts = vec![GeminiPart::Text(request.prompt.clone())];
        if let Some(image) = &request.image {
            parts.push(GeminiPart::InlineData(GeminiBlob {
                mime_type: image.mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(&image.data),
            }));
        }

        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user",
                parts,
            }],
            generation_config: GeminiGenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
                response_mime_type: "application/json",
            },
        }
    }
}

#[async_trait]
impl CompletionTransport for GeminiTransport {
    async fn send(&self, request: &CompletionRequest) -> AgentResult<ProviderReply> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.config.base_url, self.config.model, self.config.api_key
        );

        debug!(
            purpose = request.purpose,
            prompt_chars = request.prompt.len(),
            has_image = request.image.is_some(),
            "Sending request to Gemini API: {}",
            url.replace(&self.config.api_key, "***")
        );

        let response = self
            .client
            .post(&url)
            .json(&self.build_request(request))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        debug!(status, body_chars = body.len(), "Gemini API response");

        Ok(ProviderReply { status, body })
    }

    fn first_candidate_text(&self, body: &str) -> Result<Option<String>, String> {
        first_candidate_text(body)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn provider_name(&self) -> &str {
        "Gemini"
    }
}

/// Extract the first non-blank text part of the first candidate.
///
/// `Ok(None)` means the envelope was valid but carried no usable text
/// (no candidates, a safety stop, or only blank parts).
pub fn first_candidate_text(body: &str) -> Result<Option<String>, String> {
    let response: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| format!("Failed to parse Gemini envelope: {}", e))?;

    if let Some(usage) = &response.usage_metadata {
        info!(
            prompt_tokens = ?usage.prompt_token_count,
            response_tokens = ?usage.candidates_token_count,
            total_tokens = ?usage.total_token_count,
            "Gemini API usage"
        );
    }

    let Some(candidate) = response.candidates.first() else {
        return Ok(None);
    };
    if let Some(reason) = &candidate.finish_reason {
        debug!(finish_reason = %reason, "Gemini candidate finished");
    }

    Ok(candidate
        .content
        .iter()
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| part.text.as_deref())
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string))
}

/// Wrap `text` in a minimal Gemini response envelope
pub fn envelope(text: &str) -> String {
    serde_json::json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::completion::InlineImage;

    fn create_test_config() -> ProviderConfig {
        ProviderConfig {
            api_key: "test-key".to_string(),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_gemini_transport_creation() {
        assert!(GeminiTransport::new(create_test_config()).is_ok());
    }

    #[test]
    fn test_gemini_transport_empty_api_key() {
        let mut config = create_test_config();
        config.api_key = String::new();
        assert!(matches!(
            GeminiTransport::new(config),
            Err(AgentError::Configuration(_))
        ));
    }

    #[test]
    fn test_request_uses_json_mode_and_low_temperature() {
        let transport = GeminiTransport::new(create_test_config()).unwrap();
        let request = CompletionRequest::new("action plan", "PROMPT").with_image(InlineImage {
            mime_type: "image/png".to_string(),
            data: vec![1, 2, 3],
        });

        let body = serde_json::to_value(transport.build_request(&request)).unwrap();
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        let temperature = body["generationConfig"]["temperature"].as_f64().unwrap();
        assert!((temperature - 0.1).abs() < 1e-6);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "PROMPT");
        assert_eq!(
            body["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert_eq!(body["contents"][0]["parts"][1]["inlineData"]["data"], "AQID");
    }

    #[test]
    fn test_first_candidate_text() {
        assert_eq!(
            first_candidate_text(&envelope("{\"a\":1}")).unwrap(),
            Some("{\"a\":1}".to_string())
        );
        assert_eq!(first_candidate_text(r#"{"candidates":[]}"#).unwrap(), None);
        assert_eq!(
            first_candidate_text(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap(),
            None
        );
        assert_eq!(
            first_candidate_text(
                r#"{"candidates":[{"content":{"parts":[{"text":"  "},{"text":"[]"}]}}]}"#
            )
            .unwrap(),
            Some("[]".to_string())
        );
        assert!(first_candidate_text("<html>").is_err());
    }
}
