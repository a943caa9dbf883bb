//! Ollama native chat provider (`POST /api/chat`).

use async_trait::async_trait;
use chatfuse_core::error::ProviderError;
use chatfuse_core::message::Role;
use chatfuse_core::provider::{LlmCompletion, LlmProvider, LlmRequest};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::http;

pub struct OllamaProvider {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http::client(),
        }
    }

    /// Convert turns to Ollama chat messages. The system prompt goes first.
    fn to_api_messages(request: &LlmRequest) -> Vec<ApiMessage> {
        let system = request.system_prompt.iter().map(|s| ApiMessage {
            role: "system".into(),
            content: s.clone(),
        });
        let turns = request.turns.iter().map(|m| ApiMessage {
            role: match m.role {
                Role::User => "user".into(),
                Role::Model => "assistant".into(),
            },
            content: m.text().to_string(),
        });
        system.chain(turns).collect()
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: LlmRequest,
        timeout: Duration,
    ) -> Result<LlmCompletion, ProviderError> {
        let url = format!("{}/api/chat", self.base_url);

        let body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request),
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        debug!(provider = %self.name, model = %request.model, "Sending ollama chat request");

        let response: ApiResponse = http::send_json(self.client.post(&url).json(&body), timeout).await?;

        Ok(LlmCompletion {
            text: response.message.content,
            thinking: None,
            model: response.model.unwrap_or(request.model),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    message: ApiMessage,
}
