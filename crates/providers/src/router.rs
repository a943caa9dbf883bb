//! Provider router: one LLM provider per configured LLM service.

use std::collections::HashMap;
use std::sync::Arc;

use chatfuse_config::{AppConfig, ConfigError};
use chatfuse_core::provider::LlmProvider;
use chatfuse_core::service::{LlmAdapter, ServiceDescriptor, ServiceKind};

use crate::generate::GenerateProvider;
use crate::ollama::OllamaProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Routes LLM requests to the provider bound to a service id.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider under a service id.
    pub fn register(&mut self, service_id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(service_id.into(), provider);
    }

    pub fn get(&self, service_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(service_id).cloned()
    }

    pub fn default_id(&self) -> &str {
        &self.default_provider
    }

    pub fn default(&self) -> Option<Arc<dyn LlmProvider>> {
        self.get(&self.default_provider)
    }

    /// List all registered service ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

/// Build the provider for one LLM descriptor.
pub fn provider_for(descriptor: &ServiceDescriptor, api_key: Option<String>) -> Option<Arc<dyn LlmProvider>> {
    if descriptor.kind != ServiceKind::Llm {
        return None;
    }
    let provider: Arc<dyn LlmProvider> = match descriptor.adapter? {
        LlmAdapter::Ollama => Arc::new(OllamaProvider::new(&descriptor.id, &descriptor.base_url)),
        LlmAdapter::OpenAi => Arc::new(OpenAiCompatProvider::new(
            &descriptor.id,
            &descriptor.base_url,
            api_key,
        )),
        LlmAdapter::Generate => Arc::new(GenerateProvider::new(
            &descriptor.id,
            &descriptor.base_url,
            api_key,
        )),
    };
    Some(provider)
}

/// Build providers from configuration.
pub fn build_from_config(config: &AppConfig) -> Result<ProviderRouter, ConfigError> {
    let mut router = ProviderRouter::new(&config.default_llm);

    for service in &config.services {
        if service.base_url.trim().is_empty() {
            continue;
        }
        let descriptor = service.to_descriptor()?;
        if let Some(provider) = provider_for(&descriptor, service.resolve_api_key()) {
            router.register(descriptor.id.clone(), provider);
        }
    }

    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_from_default_config() {
        let config = AppConfig::default();
        let router = build_from_config(&config).unwrap();
        assert_eq!(router.list(), vec!["gemini", "ollama"]);
        assert_eq!(router.default().unwrap().name(), "gemini");
        assert!(router.get("rag").is_none());
    }

    #[test]
    fn non_llm_descriptors_get_no_provider() {
        let rag = ServiceDescriptor::new("rag", ServiceKind::Rag, "http://localhost:5000");
        assert!(provider_for(&rag, None).is_none());

        let bare_llm = ServiceDescriptor::new("llm", ServiceKind::Llm, "http://localhost:1");
        assert!(provider_for(&bare_llm, None).is_none());
    }
}
