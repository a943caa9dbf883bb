//! Chat pipeline: retrieval and knowledge-graph evidence fetched in parallel,
//! fused into one prompt, answered by the selected LLM.

use std::sync::Arc;

use chatfuse_core::deadline::Deadline;
use chatfuse_core::error::{Error, Result};
use chatfuse_core::evidence::{KgData, RagDocument};
use chatfuse_core::message::Message;
use chatfuse_core::service::ServiceKind;
use chatfuse_providers::extract_entity_mentions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::fusion::{self, FusionInput};
use crate::handler::{self, Call, HandlerSet, HandlerSettings};
use crate::registry::ServiceRegistry;

/// Body of `POST /chat/message`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub history: Vec<Value>,

    #[serde(default)]
    pub session_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub use_rag: bool,

    #[serde(default, alias = "useKG")]
    pub use_kg: bool,

    /// LLM service id; the configured default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
}

impl ChatRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            ..Self::default()
        }
    }
}

pub struct ChatService {
    registry: Arc<ServiceRegistry>,
    handlers: Arc<HandlerSet>,
    settings: HandlerSettings,
    default_llm: String,
}

impl ChatService {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        handlers: Arc<HandlerSet>,
        settings: HandlerSettings,
        default_llm: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            handlers,
            settings,
            default_llm: default_llm.into(),
        }
    }

    /// Answer one chat message for `user_id`. Evidence lookups never fail the
    /// call; the LLM call does.
    pub async fn send(&self, user_id: &str, request: ChatRequest, deadline: Deadline) -> Result<Message> {
        let query = request.message.trim();
        if query.is_empty() {
            return Err(Error::InvalidRequest("message is required".into()));
        }
        if request.session_id.trim().is_empty() {
            return Err(Error::InvalidRequest("sessionId is required".into()));
        }

        let llm_id = request
            .llm_provider
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.default_llm);
        let descriptor = self.registry.resolve(llm_id).await?;
        let provider = self.handlers.llm(llm_id).ok_or_else(|| {
            Error::UnsupportedServiceKind(format!("'{llm_id}' is a {} service, not an llm", descriptor.kind))
        })?;

        let (documents, kg_data) = tokio::join!(
            self.retrieve(request.use_rag, query, user_id, deadline),
            self.graph_facts(request.use_kg, query, user_id, deadline),
        );

        let prior: Vec<Message> = request.history.iter().filter_map(Message::from_wire).collect();
        let fused = fusion::fuse(FusionInput {
            query,
            prior_turns: &prior,
            rag_documents: &documents,
            kg_data: Some(&kg_data),
            system_prompt: request.system_prompt.as_deref(),
        });
        let (used_rag, used_kg) = (fused.used_rag, fused.used_kg);

        let model = descriptor
            .model
            .clone()
            .unwrap_or_else(|| self.settings.default_model.clone());
        let references = fused.references.clone();
        let llm_request = fused.into_request(model, self.settings.default_temperature, self.settings.default_max_tokens);

        let call = Call {
            service_id: llm_id,
            settings: &self.settings,
            deadline,
            kg: None,
        };
        let reply = handler::generate(provider.as_ref(), llm_request, references, &call).await?;

        info!(
            user_id,
            session_id = %request.session_id,
            service_id = %llm_id,
            used_rag,
            used_kg,
            "Chat reply generated"
        );

        let mut message = Message::model(reply.answer);
        message.references = reply.references;
        message.thinking = reply.thinking;
        Ok(message)
    }

    async fn retrieve(&self, enabled: bool, query: &str, user_id: &str, deadline: Deadline) -> Vec<RagDocument> {
        if !enabled {
            return Vec::new();
        }
        let Some(descriptor) = self.registry.first_active(ServiceKind::Rag).await else {
            debug!("RAG requested but no active retrieval service");
            return Vec::new();
        };
        let Some(client) = self.handlers.rag(&descriptor.id) else {
            return Vec::new();
        };
        let call = Call {
            service_id: &descriptor.id,
            settings: &self.settings,
            deadline,
            kg: None,
        };
        handler::fetch_rag(client, query, user_id, &call)
            .await
            .unwrap_or_else(|e| {
                warn!(service_id = %descriptor.id, error = %e, "Retrieval failed, continuing without documents");
                Vec::new()
            })
    }

    async fn graph_facts(&self, enabled: bool, query: &str, user_id: &str, deadline: Deadline) -> KgData {
        if !enabled {
            return KgData::default();
        }
        let Some(descriptor) = self.registry.first_active(ServiceKind::Kg).await else {
            debug!("KG requested but no active knowledge graph service");
            return KgData::default();
        };
        let Some(client) = self.handlers.kg(&descriptor.id) else {
            return KgData::default();
        };
        let call = Call {
            service_id: &descriptor.id,
            settings: &self.settings,
            deadline,
            kg: None,
        };
        let mentions = extract_entity_mentions(query);
        handler::fetch_kg(client, query, Some(user_id), &mentions, &call)
            .await
            .unwrap_or_else(|e| {
                warn!(service_id = %descriptor.id, error = %e, "Knowledge graph lookup failed, continuing without facts");
                KgData::default()
            })
    }
}
