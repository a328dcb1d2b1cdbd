use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::traits::Backend;
use super::types::{Role, Turn};
use crate::app::{ApiKey, BackendSettings};
use crate::constants::HEALTH_CHECK_TIMEOUT_SECS;
use crate::utils::BackendError;

/// Google Gemini `generateContent` backend
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: ApiKey,
    system_prompt: Option<String>,
    generation_config: Option<GenerationConfig>,
}

impl GeminiBackend {
    /// Create a new Gemini backend from settings and a resolved credential
    pub fn new(settings: &BackendSettings, api_key: ApiKey) -> Result<Self> {
        let generation_config = GenerationConfig {
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            top_p: settings.top_p,
        };

        Ok(Self {
            client: Client::builder().timeout(settings.timeout()).build()?,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
            system_prompt: settings.system_prompt.clone(),
            generation_config: (!generation_config.is_empty()).then_some(generation_config),
        })
    }

    fn model_url(&self) -> String {
        format!("{}/v1beta/models/{}", self.base_url, self.model)
    }

    /// Map the history onto Gemini contents.
    /// Adjacent turns with the same role become one content with several parts,
    /// which happens when an earlier generation failed after its user turn was recorded.
    fn build_request<'a>(&'a self, history: &'a [Turn]) -> GenerateContentRequest<'a> {
        let mut contents: Vec<Content<'a>> = Vec::new();

        for turn in history {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            let part = Part { text: &turn.text };
            match contents.last_mut() {
                Some(last) if last.role == role => last.parts.push(part),
                _ => contents.push(Content {
                    role,
                    parts: vec![part],
                }),
            }
        }

        GenerateContentRequest {
            contents,
            system_instruction: self.system_prompt.as_deref().map(|text| SystemInstruction {
                parts: vec![Part { text }],
            }),
            generation_config: self.generation_config.clone(),
        }
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    async fn generate(&self, history: &[Turn]) -> Result<String, BackendError> {
        let url = format!("{}:generateContent", self.model_url());
        let body = self.build_request(history);

        debug!(model = %self.model, contents = body.contents.len(), "sending generateContent");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &error_text));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| BackendError::unavailable(format!("malformed response: {e}")))?;

        extract_text(parsed)
    }

    fn name(&self) -> &str {
        &self.model
    }

    async fn validate_connection(&self) -> Result<bool, BackendError> {
        let health_client = Client::builder()
            .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
            .build()
            .map_err(transport_error)?;

        match health_client
            .get(self.model_url())
            .header("x-goog-api-key", self.api_key.expose())
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::unavailable("request to Gemini timed out")
    } else {
        BackendError::unavailable(format!("request to Gemini failed: {e}"))
    }
}

/// Map a non-success HTTP status onto the error taxonomy
fn classify_status(status: u16, body: &str) -> BackendError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| {
            let snippet: String = body.chars().take(200).collect();
            format!("HTTP {status}: {snippet}")
        });

    match status {
        401 | 403 | 408 | 429 | 500..=599 => BackendError::Unavailable {
            reason: message,
            status: Some(status),
        },
        400..=499 => BackendError::Rejected(message),
        _ => BackendError::Unavailable {
            reason: message,
            status: Some(status),
        },
    }
}

fn extract_text(response: GenerateContentResponse) -> Result<String, BackendError> {
    if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(BackendError::Rejected(format!("prompt blocked ({reason})")));
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Rejected("no candidates returned".to_string()))?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "UNKNOWN".to_string());
        return Err(BackendError::Rejected(format!(
            "empty response (finish reason {reason})"
        )));
    }

    Ok(text)
}

// Request structures for the Gemini API

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

impl GenerationConfig {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.max_output_tokens.is_none() && self.top_p.is_none()
    }
}

// Response structures

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
