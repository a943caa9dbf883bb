//! The orchestration core of Chatfuse.
//!
//! An [`Orchestrator`] is built once per process (or per test) from
//! configuration and owns everything the request paths share:
//!
//! 1. **Registry**: every backend service and its health
//! 2. **Contexts**: per-conversation interaction logs with bounded lifetime
//! 3. **Router**: context-bound requests dispatched to the right handler
//! 4. **Chat**: evidence retrieval, prompt fusion, and LLM generation

pub mod chat;
pub mod fusion;
pub mod handler;
pub mod registry;
pub mod router;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use chat::{ChatRequest, ChatService};
pub use fusion::{FusedPrompt, FusionInput, fuse};
pub use handler::{HandlerSet, HandlerSettings, NormalizedResponse, RequestOptions, ServiceHandler, ServiceRequest};
pub use registry::{InitReport, Registered, ServiceRegistry};
pub use router::RequestRouter;

use std::sync::Arc;
use std::time::Duration;

use chatfuse_config::AppConfig;
use chatfuse_context::{ContextLimits, ContextStore};
use chatfuse_core::deadline::Deadline;
use chatfuse_core::error::Result;
use chatfuse_providers::ProviderRouter;
use tracing::info;

pub struct Orchestrator {
    pub registry: Arc<ServiceRegistry>,
    pub contexts: ContextStore,
    pub router: RequestRouter,
    pub chat: ChatService,
    report: InitReport,
    request_deadline: Duration,
    cleanup_interval: Duration,
    sweep_enabled: bool,
}

impl Orchestrator {
    /// Build providers from `config`, probe every service, and wire the
    /// request paths. Fails if a required service is unreachable.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let providers = chatfuse_providers::router::build_from_config(config)?;
        Self::with_providers(config, providers).await
    }

    /// Like [`from_config`](Self::from_config) with caller-supplied LLM
    /// providers.
    pub async fn with_providers(config: &AppConfig, providers: ProviderRouter) -> Result<Self> {
        config.validate()?;
        let descriptors = config.descriptors()?;

        let registry = Arc::new(ServiceRegistry::new(config.timeouts.health()));
        let report = registry.initialize(descriptors.clone()).await?;

        let handlers = Arc::new(HandlerSet::build(&descriptors, &providers));
        let settings = HandlerSettings::from_config(config);

        let contexts = ContextStore::new(ContextLimits {
            max_age: config.protocol.max_context_age(),
            max_entries: config.protocol.max_context_entries,
        });

        let router = RequestRouter::new(registry.clone(), contexts.clone(), handlers.clone(), settings.clone());
        let chat = ChatService::new(registry.clone(), handlers, settings, &config.default_llm);

        info!(
            services = descriptors.len(),
            active = report.active.len(),
            default_llm = %config.default_llm,
            "Orchestrator ready"
        );

        Ok(Self {
            registry,
            contexts,
            router,
            chat,
            report,
            request_deadline: config.timeouts.request_deadline(),
            cleanup_interval: config.protocol.cleanup_interval(),
            sweep_enabled: config.protocol.sweep_enabled,
        })
    }

    /// Which services came up active at startup.
    pub fn init_report(&self) -> &InitReport {
        &self.report
    }

    /// Open a context bound to an existing service.
    pub async fn open_context(&self, service_id: &str, owner_data: serde_json::Value) -> Result<String> {
        self.registry.resolve(service_id).await?;
        Ok(self.contexts.create(service_id, owner_data).await)
    }

    /// A fresh deadline for one inbound request.
    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.request_deadline)
    }

    /// Start the background eviction sweep, unless disabled.
    pub fn spawn_sweeper(&self) -> Option<tokio::task::JoinHandle<()>> {
        self.sweep_enabled
            .then(|| self.contexts.spawn_sweeper(self.cleanup_interval))
    }
}
