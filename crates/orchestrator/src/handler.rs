//! Per-kind service handlers.
//!
//! Each backend kind is one variant of [`ServiceHandler`]; every variant
//! answers the same `handle(request) -> NormalizedResponse` contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatfuse_config::AppConfig;
use chatfuse_core::deadline::Deadline;
use chatfuse_core::error::{Error, ProviderError, Result};
use chatfuse_core::evidence::{KgData, RagDocument};
use chatfuse_core::message::{Message, Reference};
use chatfuse_core::provider::{LlmProvider, LlmReply, LlmRequest};
use chatfuse_core::retry::RetryPolicy;
use chatfuse_core::service::{ServiceDescriptor, ServiceKind};
use chatfuse_providers::{KgClient, ProviderRouter, RagClient, extract_entity_mentions, parse_thinking};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::fusion::{self, FusionInput};

/// A request addressed to one service through a context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    #[serde(alias = "query")]
    pub message: String,

    /// Prior turns in client wire form; malformed items are dropped.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// KG only. Extracted from `message` when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_mentions: Vec<String>,

    #[serde(default)]
    pub options: RequestOptions,
}

impl ServiceRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    fn mentions(&self) -> Vec<String> {
        if self.entity_mentions.is_empty() {
            extract_entity_mentions(&self.message)
        } else {
            self.entity_mentions.clone()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, alias = "useKG")]
    pub use_kg: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// The reply of any service, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NormalizedResponse {
    Llm(LlmReply),
    Rag { documents: Vec<RagDocument> },
    Kg(KgData),
}

/// Timeouts, retry policy, and generation defaults shared by all handlers.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub retrieval_timeout: Duration,
    pub llm_timeout: Duration,
    pub retry: RetryPolicy,
    pub default_model: String,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            retrieval_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
            default_model: "llama2".into(),
            default_temperature: 0.7,
            default_max_tokens: 1000,
        }
    }
}

impl HandlerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retrieval_timeout: config.timeouts.retrieval(),
            llm_timeout: config.timeouts.llm(),
            retry: RetryPolicy::new(config.protocol.retry_attempts, config.protocol.retry_delay()),
            default_model: config.protocol.default_model.clone(),
            default_temperature: config.protocol.default_temperature,
            default_max_tokens: config.protocol.default_max_tokens,
        }
    }
}

/// Per-call state handed to a handler.
pub struct Call<'a> {
    pub service_id: &'a str,
    pub settings: &'a HandlerSettings,
    pub deadline: Deadline,
    /// Knowledge-graph collaborator for LLM calls with `useKG`
    pub kg: Option<&'a KgClient>,
}

pub enum ServiceHandler {
    Llm {
        provider: Arc<dyn LlmProvider>,
        model: Option<String>,
    },
    Rag(RagClient),
    Kg(KgClient),
}

impl ServiceHandler {
    /// Build the handler for a descriptor. LLM descriptors need a provider in
    /// `providers`.
    pub fn for_descriptor(descriptor: &ServiceDescriptor, providers: &ProviderRouter) -> Option<Self> {
        match descriptor.kind {
            ServiceKind::Llm => providers.get(&descriptor.id).map(|provider| Self::Llm {
                provider,
                model: descriptor.model.clone(),
            }),
            ServiceKind::Rag => Some(Self::Rag(RagClient::new(&descriptor.id, &descriptor.base_url))),
            ServiceKind::Kg => Some(Self::Kg(KgClient::new(&descriptor.id, &descriptor.base_url))),
        }
    }

    pub fn kind(&self) -> ServiceKind {
        match self {
            Self::Llm { .. } => ServiceKind::Llm,
            Self::Rag(_) => ServiceKind::Rag,
            Self::Kg(_) => ServiceKind::Kg,
        }
    }

    /// The result a retrieval handler degrades to when its upstream fails.
    pub fn empty_response(&self) -> Option<NormalizedResponse> {
        match self {
            Self::Llm { .. } => None,
            Self::Rag(_) => Some(NormalizedResponse::Rag { documents: Vec::new() }),
            Self::Kg(_) => Some(NormalizedResponse::Kg(KgData::default())),
        }
    }

    pub async fn handle(&self, request: &ServiceRequest, call: &Call<'_>) -> Result<NormalizedResponse> {
        match self {
            Self::Llm { provider, model } => {
                let kg_data = match (request.options.use_kg, call.kg) {
                    (true, Some(kg)) => {
                        let mentions = request.mentions();
                        fetch_kg(kg, &request.message, request.user_id.as_deref(), &mentions, call)
                            .await
                            .unwrap_or_else(|e| {
                                warn!(service_id = %kg.service_id(), error = %e, "Knowledge graph lookup failed, continuing without it");
                                KgData::default()
                            })
                    }
                    (true, None) => {
                        debug!("useKG set but no active knowledge graph service");
                        KgData::default()
                    }
                    (false, _) => KgData::default(),
                };

                let prior: Vec<Message> = request.history.iter().filter_map(Message::from_wire).collect();
                let fused = fusion::fuse(FusionInput {
                    query: &request.message,
                    prior_turns: &prior,
                    rag_documents: &[],
                    kg_data: Some(&kg_data),
                    system_prompt: request.options.system_prompt.as_deref(),
                });

                let settings = call.settings;
                let model = request
                    .options
                    .model
                    .clone()
                    .or_else(|| model.clone())
                    .unwrap_or_else(|| settings.default_model.clone());
                let references = fused.references.clone();
                let llm_request = fused.into_request(
                    model,
                    request.options.temperature.unwrap_or(settings.default_temperature),
                    request.options.max_tokens.unwrap_or(settings.default_max_tokens),
                );

                let reply = generate(provider.as_ref(), llm_request, references, call).await?;
                Ok(NormalizedResponse::Llm(reply))
            }
            Self::Rag(client) => {
                let user_id = request.user_id.as_deref().unwrap_or_default();
                let documents = fetch_rag(client, &request.message, user_id, call).await?;
                Ok(NormalizedResponse::Rag { documents })
            }
            Self::Kg(client) => {
                let mentions = request.mentions();
                let data = fetch_kg(client, &request.message, request.user_id.as_deref(), &mentions, call).await?;
                Ok(NormalizedResponse::Kg(data))
            }
        }
    }
}

/// Call an LLM and normalize its reply. The thinking block is split out of
/// the raw text unless the backend already reported it separately.
pub async fn generate(
    provider: &dyn LlmProvider,
    request: LlmRequest,
    references: Vec<Reference>,
    call: &Call<'_>,
) -> Result<LlmReply> {
    let requested_model = request.model.clone();
    let timeout = call.deadline.cap(call.settings.llm_timeout);
    let completion = provider
        .complete(request, timeout)
        .await
        .map_err(|e| Error::upstream(call.service_id, e))?;

    let parsed = parse_thinking(&completion.text);
    Ok(LlmReply {
        answer: parsed.answer,
        thinking: completion.thinking.or(parsed.thinking),
        references,
        service: call.service_id.to_string(),
        model: if completion.model.is_empty() { requested_model } else { completion.model },
    })
}

/// Query the retrieval service with bounded retry.
pub async fn fetch_rag(client: &RagClient, query: &str, user_id: &str, call: &Call<'_>) -> Result<Vec<RagDocument>> {
    call.settings
        .retry
        .run_within(call.deadline, ProviderError::is_retryable, move |attempt| {
            let timeout = call.deadline.cap(call.settings.retrieval_timeout);
            debug!(service_id = %client.service_id(), attempt, "Retrieval attempt");
            client.query(query, user_id, timeout)
        })
        .await
        .map_err(|e| Error::upstream(client.service_id(), e))
}

/// Query the knowledge-graph service with bounded retry.
pub async fn fetch_kg(
    client: &KgClient,
    query: &str,
    user_id: Option<&str>,
    mentions: &[String],
    call: &Call<'_>,
) -> Result<KgData> {
    call.settings
        .retry
        .run_within(call.deadline, ProviderError::is_retryable, move |attempt| {
            let timeout = call.deadline.cap(call.settings.retrieval_timeout);
            debug!(service_id = %client.service_id(), attempt, "Knowledge graph attempt");
            client.query(query, user_id, mentions, timeout)
        })
        .await
        .map_err(|e| Error::upstream(client.service_id(), e))
}

/// Handlers for every registered service, keyed by service id.
#[derive(Default)]
pub struct HandlerSet {
    handlers: HashMap<String, ServiceHandler>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(descriptors: &[ServiceDescriptor], providers: &ProviderRouter) -> Self {
        let mut set = Self::new();
        for descriptor in descriptors {
            match ServiceHandler::for_descriptor(descriptor, providers) {
                Some(handler) => set.insert(&descriptor.id, handler),
                None => warn!(service_id = %descriptor.id, "No handler for service, requests to it will be rejected"),
            }
        }
        set
    }

    pub fn insert(&mut self, service_id: impl Into<String>, handler: ServiceHandler) {
        self.handlers.insert(service_id.into(), handler);
    }

    pub fn get(&self, service_id: &str) -> Option<&ServiceHandler> {
        self.handlers.get(service_id)
    }

    pub fn rag(&self, service_id: &str) -> Option<&RagClient> {
        match self.handlers.get(service_id)? {
            ServiceHandler::Rag(client) => Some(client),
            _ => None,
        }
    }

    pub fn kg(&self, service_id: &str) -> Option<&KgClient> {
        match self.handlers.get(service_id)? {
            ServiceHandler::Kg(client) => Some(client),
            _ => None,
        }
    }

    pub fn llm(&self, service_id: &str) -> Option<&Arc<dyn LlmProvider>> {
        match self.handlers.get(service_id)? {
            ServiceHandler::Llm { provider, .. } => Some(provider),
            _ => None,
        }
    }
}
