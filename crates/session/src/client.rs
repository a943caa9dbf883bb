//! HTTP client for the gateway's chat routes.
//!
//! Implements [`HistoryPersistence`] over `POST /chat/history` and
//! [`ChatTransport`] over `POST /chat/message`, so an [`ActiveSession`]
//! can drive a remote gateway.
//!
//! [`ActiveSession`]: crate::rotation::ActiveSession

use std::time::Duration;

use async_trait::async_trait;
use chatfuse_core::error::{Error, ProviderError, Result};
use chatfuse_core::message::Message;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::rotation::{ChatTransport, HistoryPersistence};
use crate::store::SaveReceipt;

/// Header carrying the verified principal.
pub const USER_HEADER: &str = "x-user-id";

/// Per-message chat options sent with every request.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub system_prompt: Option<String>,
    pub use_rag: bool,
    pub use_kg: bool,
    pub llm_provider: Option<String>,
}

pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
    timeout: Duration,
    options: ChatOptions,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            timeout: Duration::from_secs(180),
            options: ChatOptions::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> std::result::Result<T, Failure> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .client
            .post(&url)
            .header(USER_HEADER, &self.user_id)
            .json(body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| Failure::Timeout(self.timeout))?
            .map_err(|e| Failure::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Failure::Unauthorized);
        }
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            return Err(Failure::Status(status.as_u16(), message));
        }

        response.json::<T>().await.map_err(|e| Failure::Decode(e.to_string()))
    }
}

enum Failure {
    Unauthorized,
    Timeout(Duration),
    Network(String),
    Status(u16, String),
    Decode(String),
}

impl Failure {
    fn describe(&self) -> String {
        match self {
            Self::Unauthorized => "unauthorized".into(),
            Self::Timeout(after) => format!("timed out after {}ms", after.as_millis()),
            Self::Network(e) => e.clone(),
            Self::Status(code, message) => format!("{message} (status {code})"),
            Self::Decode(e) => format!("invalid response: {e}"),
        }
    }
}

#[async_trait]
impl HistoryPersistence for GatewayClient {
    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<SaveReceipt> {
        debug!(session_id, messages = messages.len(), "Saving chat history");
        let body = json!({"sessionId": session_id, "messages": messages});
        match self.post::<SaveReceipt>("/chat/history", &body).await {
            Ok(receipt) => Ok(receipt),
            Err(Failure::Unauthorized) => Err(Error::AuthInvalidated("session save rejected".into())),
            Err(failure) => Err(Error::PersistenceFailure(failure.describe())),
        }
    }
}

#[async_trait]
impl ChatTransport for GatewayClient {
    async fn send(&self, session_id: &str, text: &str, history: &[Message]) -> Result<Message> {
        let body = json!({
            "message": text,
            "history": history,
            "sessionId": session_id,
            "systemPrompt": self.options.system_prompt,
            "useRag": self.options.use_rag,
            "useKg": self.options.use_kg,
            "llmProvider": self.options.llm_provider,
        });

        let reply: Value = match self.post("/chat/message", &body).await {
            Ok(reply) => reply,
            Err(Failure::Unauthorized) => return Err(Error::AuthInvalidated("chat request rejected".into())),
            Err(Failure::Timeout(after)) => {
                return Err(Error::upstream(
                    "gateway",
                    ProviderError::Timeout {
                        after_ms: after.as_millis() as u64,
                    },
                ));
            }
            Err(Failure::Status(status_code, message)) => {
                return Err(Error::upstream("gateway", ProviderError::ApiError { status_code, message }));
            }
            Err(failure) => return Err(Error::upstream("gateway", ProviderError::Network(failure.describe()))),
        };

        reply
            .get("reply")
            .and_then(Message::from_wire)
            .ok_or_else(|| {
                Error::upstream(
                    "gateway",
                    ProviderError::MalformedPayload("Received an invalid response from the AI.".into()),
                )
            })
    }
}
