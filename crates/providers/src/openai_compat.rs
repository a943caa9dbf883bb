//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, vLLM, llama.cpp server, and any endpoint
//! exposing `/chat/completions`.

use async_trait::async_trait;
use chatfuse_core::error::ProviderError;
use chatfuse_core::message::Role;
use chatfuse_core::provider::{LlmCompletion, LlmProvider, LlmRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::http;

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: http::client(),
        }
    }

    /// Convert our turns to OpenAI API format.
    fn to_api_messages(request: &LlmRequest) -> Vec<ApiMessage> {
        let system = request.system_prompt.iter().map(|s| ApiMessage {
            role: "system".into(),
            content: Some(s.clone()),
        });
        let turns = request.turns.iter().map(|m| ApiMessage {
            role: match m.role {
                Role::User => "user".into(),
                Role::Model => "assistant".into(),
            },
            content: Some(m.text().to_string()),
        });
        system.chain(turns).collect()
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: LlmRequest,
        timeout: Duration,
    ) -> Result<LlmCompletion, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
            "stream": false,
        });

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let api_response: ApiResponse = http::send_json(builder, timeout).await?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::MalformedPayload("No choices in response".into()))?;

        Ok(LlmCompletion {
            text: choice.message.content.unwrap_or_default(),
            thinking: None,
            model: api_response.model.unwrap_or(request.model),
        })
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}
