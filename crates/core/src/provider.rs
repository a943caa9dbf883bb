//! LlmProvider trait: the abstraction over LLM wire dialects.
//!
//! A provider knows how to translate a unified request into one backend's
//! request shape and how to translate the reply back. Implementations live in
//! `chatfuse-providers`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ProviderError;
use crate::message::{Message, Reference};

/// A provider-neutral generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    /// The model to use (e.g., "llama2")
    pub model: String,

    /// Optional system instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Conversation turns, oldest first. The last turn is the one to answer.
    pub turns: Vec<Message>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, turns: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            turns,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    /// Text of the final turn.
    pub fn prompt(&self) -> &str {
        self.turns.last().map(|m| m.text()).unwrap_or_default()
    }
}

/// Raw text produced by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCompletion {
    pub text: String,

    /// Reasoning reported out-of-band by backends that separate it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

impl LlmCompletion {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            thinking: None,
            model: model.into(),
        }
    }
}

/// The normalized reply the core hands back to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmReply {
    pub answer: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    #[serde(default)]
    pub references: Vec<Reference>,

    /// Id of the service that produced the reply
    pub service: String,

    pub model: String,
}

/// The core provider trait.
///
/// Every LLM dialect implements this. The caller supplies the timeout, which
/// is already capped by the request deadline.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// The service id this provider is bound to.
    fn name(&self) -> &str;

    /// Send a request and wait for the complete response.
    async fn complete(
        &self,
        request: LlmRequest,
        timeout: Duration,
    ) -> std::result::Result<LlmCompletion, ProviderError>;
}
