//! Backend service descriptors.
//!
//! Every backend the core talks to (an LLM endpoint, the retrieval service,
//! the knowledge-graph service) is described by a [`ServiceDescriptor`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// The closed set of backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Llm,
    Rag,
    Kg,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llm => "llm",
            Self::Rag => "rag",
            Self::Kg => "kg",
        }
    }
}

impl FromStr for ServiceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "llm" => Ok(Self::Llm),
            "rag" => Ok(Self::Rag),
            "kg" => Ok(Self::Kg),
            other => Err(Error::UnsupportedServiceKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire dialect spoken by an LLM backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmAdapter {
    /// `POST /api/chat` with `{model, messages, stream, options}`
    Ollama,
    /// `POST /chat/completions` with `{model, messages, temperature, max_tokens}`
    OpenAi,
    /// `POST /generate` with a single flattened prompt
    Generate,
}

impl FromStr for LlmAdapter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" | "openai_compat" => Ok(Self::OpenAi),
            "generate" | "gemini" => Ok(Self::Generate),
            other => Err(Error::UnsupportedServiceKind(format!("llm adapter '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Unknown,
    Active,
    Inactive,
}

/// A registered backend service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub id: String,
    pub kind: ServiceKind,
    pub base_url: String,
    pub health_path: String,

    /// A required service that fails its startup probe aborts initialization.
    pub required: bool,

    pub status: ServiceStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// LLM only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<LlmAdapter>,

    /// LLM only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ServiceDescriptor {
    pub fn new(id: impl Into<String>, kind: ServiceKind, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_path: "/health".into(),
            required: false,
            status: ServiceStatus::Unknown,
            last_heartbeat: None,
            adapter: None,
            model: None,
        }
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_adapter(mut self, adapter: LlmAdapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Absolute URL of the health endpoint.
    pub fn health_url(&self) -> String {
        self.endpoint(&self.health_path)
    }

    /// Join a path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parsing() {
        assert_eq!("LLM".parse::<ServiceKind>().unwrap(), ServiceKind::Llm);
        assert_eq!("kg".parse::<ServiceKind>().unwrap(), ServiceKind::Kg);
        let err = "vector".parse::<ServiceKind>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedServiceKind(k) if k == "vector"));
    }

    #[test]
    fn adapter_parsing() {
        assert_eq!("ollama".parse::<LlmAdapter>().unwrap(), LlmAdapter::Ollama);
        assert_eq!("gemini".parse::<LlmAdapter>().unwrap(), LlmAdapter::Generate);
        assert!("carrier-pigeon".parse::<LlmAdapter>().is_err());
    }

    #[test]
    fn endpoints_join_cleanly() {
        let svc = ServiceDescriptor::new("rag", ServiceKind::Rag, "http://localhost:5000/")
            .with_health_path("/health");
        assert_eq!(svc.health_url(), "http://localhost:5000/health");
        assert_eq!(svc.endpoint("query"), "http://localhost:5000/query");
        assert_eq!(svc.status, ServiceStatus::Unknown);
        assert!(!svc.required);
    }
}
