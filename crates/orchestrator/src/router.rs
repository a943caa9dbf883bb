//! Request router: context lookup, service resolution, dispatch, logging.

use std::sync::Arc;

use chatfuse_context::ContextStore;
use chatfuse_core::context::HistoryEntry;
use chatfuse_core::deadline::Deadline;
use chatfuse_core::error::{Error, Result};
use chatfuse_core::service::ServiceKind;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::handler::{Call, HandlerSet, HandlerSettings, NormalizedResponse, ServiceRequest};
use crate::registry::ServiceRegistry;

pub struct RequestRouter {
    registry: Arc<ServiceRegistry>,
    contexts: ContextStore,
    handlers: Arc<HandlerSet>,
    settings: HandlerSettings,
}

impl RequestRouter {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        contexts: ContextStore,
        handlers: Arc<HandlerSet>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            registry,
            contexts,
            handlers,
            settings,
        }
    }

    /// Process one request through the service bound to `context_id`.
    ///
    /// The request is logged before dispatch and the normalized response
    /// after it. Retrieval-service failures degrade to an empty result; LLM
    /// failures are returned and no response entry is written.
    pub async fn process(
        &self,
        context_id: &str,
        mut request: ServiceRequest,
        deadline: Deadline,
    ) -> Result<NormalizedResponse> {
        let context = self.contexts.get(context_id).await?;
        let service = self.registry.resolve(&context.service_id).await?;

        if request.user_id.is_none() {
            request.user_id = context
                .owner_data
                .get("userId")
                .and_then(Value::as_str)
                .map(String::from);
        }

        self.contexts
            .append(context_id, HistoryEntry::request(serde_json::to_value(&request)?))
            .await?;

        let handler = self.handlers.get(&service.id).ok_or_else(|| {
            Error::UnsupportedServiceKind(format!("no handler for {} service '{}'", service.kind, service.id))
        })?;

        let kg = if handler.kind() == ServiceKind::Llm && request.options.use_kg {
            match self.registry.first_active(ServiceKind::Kg).await {
                Some(descriptor) => self.handlers.kg(&descriptor.id),
                None => None,
            }
        } else {
            None
        };

        let call = Call {
            service_id: &service.id,
            settings: &self.settings,
            deadline,
            kg,
        };

        debug!(context_id, service_id = %service.id, kind = %service.kind, "Dispatching request");

        let response = match handler.handle(&request, &call).await {
            Ok(response) => response,
            Err(e) if e.is_upstream() => match handler.empty_response() {
                Some(empty) => {
                    warn!(context_id, service_id = %service.id, error = %e, "Retrieval failed, returning empty result");
                    empty
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        };

        self.contexts
            .append(context_id, HistoryEntry::response(serde_json::to_value(&response)?))
            .await?;

        info!(context_id, service_id = %service.id, "Request processed");
        Ok(response)
    }
}
