//! Single-prompt generation provider (`POST /generate`).
//!
//! The backend takes the final user turn as `query`, prior turns as
//! `chat_history`, and answers with `{response, thinking_process}`.

use async_trait::async_trait;
use chatfuse_core::error::ProviderError;
use chatfuse_core::message::Role;
use chatfuse_core::provider::{LlmCompletion, LlmProvider, LlmRequest};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::http;

pub struct GenerateProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GenerateProvider {
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

    fn build_body(request: &LlmRequest) -> serde_json::Value {
        let history: Vec<serde_json::Value> = request
            .turns
            .iter()
            .take(request.turns.len().saturating_sub(1))
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Model => "assistant",
                    },
                    "content": m.text(),
                })
            })
            .collect();

        serde_json::json!({
            "query": request.prompt(),
            "context": "",
            "chat_history": history,
            "llm_preference": request.model,
            "system_prompt": request.system_prompt,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        })
    }
}

#[async_trait]
impl LlmProvider for GenerateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: LlmRequest,
        timeout: Duration,
    ) -> Result<LlmCompletion, ProviderError> {
        let url = format!("{}/generate", self.base_url);
        let body = Self::build_body(&request);

        debug!(provider = %self.name, model = %request.model, "Sending generate request");

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response: ApiResponse = http::send_json(builder, timeout).await?;

        Ok(LlmCompletion {
            text: response.response,
            thinking: response.thinking_process.filter(|t| !t.trim().is_empty()),
            model: request.model,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    response: String,
    #[serde(default)]
    thinking_process: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{Json, Router, routing::post};
    use chatfuse_core::message::Message;
    use serde_json::{Value, json};

    #[test]
    fn body_splits_query_from_history() {
        let request = LlmRequest::new(
            "gemini",
            vec![Message::user("one"), Message::model("two"), Message::user("three")],
        );
        let body = GenerateProvider::build_body(&request);
        assert_eq!(body["query"], "three");
        assert_eq!(body["chat_history"].as_array().unwrap().len(), 2);
        assert_eq!(body["chat_history"][1]["role"], "assistant");
    }

    #[tokio::test]
    async fn complete_keeps_out_of_band_thinking() {
        let app = Router::new().route(
            "/generate",
            post(|Json(body): Json<Value>| async move {
                Json(json!({
                    "response": format!("echo: {}", body["query"].as_str().unwrap_or_default()),
                    "thinking_process": "considered it"
                }))
            }),
        );
        let base = serve(app).await;

        let provider = GenerateProvider::new("gemini", base, None);
        let completion = provider
            .complete(LlmRequest::new("gemini", vec![Message::user("ping")]), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(completion.text, "echo: ping");
        assert_eq!(completion.thinking.as_deref(), Some("considered it"));
    }
}
