//! Configuration loading, validation, and management for Chatfuse.
//!
//! Loads configuration from `~/.chatfuse/config.toml` with environment
//! variable overrides. Validates all settings at startup so that a missing
//! required service URL fails the process before any request is served.

use chatfuse_core::service::{LlmAdapter, ServiceDescriptor, ServiceKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.chatfuse/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Service id of the LLM used when a chat request names none
    #[serde(default = "default_llm")]
    pub default_llm: String,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Backend services
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
}

fn default_llm() -> String {
    "gemini".into()
}

fn default_true() -> bool {
    true
}

fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            id: "gemini".into(),
            kind: "llm".into(),
            base_url: "http://localhost:5001".into(),
            health_path: default_health_path(),
            required: true,
            adapter: Some("generate".into()),
            model: None,
            api_key: None,
            api_key_env: None,
        },
        ServiceConfig {
            id: "ollama".into(),
            kind: "llm".into(),
            base_url: "http://localhost:11434".into(),
            health_path: "/api/version".into(),
            required: false,
            adapter: Some("ollama".into()),
            model: Some("llama2".into()),
            api_key: None,
            api_key_env: None,
        },
        ServiceConfig::optional("rag", "rag", "http://localhost:5000"),
        ServiceConfig::optional("kg", "kg", "http://localhost:5000"),
    ]
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    5000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_body_limit() -> usize {
    1024 * 1024
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            body_limit_bytes: default_body_limit(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// Context lifetime, retry, and generation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_max_context_age")]
    pub max_context_age_secs: u64,

    #[serde(default = "default_max_context_entries")]
    pub max_context_entries: usize,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Run the eviction sweep in the background
    #[serde(default = "default_true")]
    pub sweep_enabled: bool,
}

fn default_max_context_age() -> u64 {
    24 * 60 * 60
}
fn default_max_context_entries() -> usize {
    1000
}
fn default_cleanup_interval() -> u64 {
    60 * 60
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_model() -> String {
    "llama2".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_context_age_secs: default_max_context_age(),
            max_context_entries: default_max_context_entries(),
            cleanup_interval_secs: default_cleanup_interval(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            sweep_enabled: true,
        }
    }
}

impl ProtocolConfig {
    pub fn max_context_age(&self) -> Duration {
        Duration::from_secs(self.max_context_age_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Per-kind caps on outbound calls, plus the overall request budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_health_secs")]
    pub health_secs: u64,

    #[serde(default = "default_retrieval_secs")]
    pub retrieval_secs: u64,

    #[serde(default = "default_llm_secs")]
    pub llm_secs: u64,

    #[serde(default = "default_analysis_secs")]
    pub analysis_secs: u64,

    #[serde(default = "default_request_deadline_secs")]
    pub request_deadline_secs: u64,
}

fn default_health_secs() -> u64 {
    5
}
fn default_retrieval_secs() -> u64 {
    30
}
fn default_llm_secs() -> u64 {
    120
}
fn default_analysis_secs() -> u64 {
    300
}
fn default_request_deadline_secs() -> u64 {
    180
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            health_secs: default_health_secs(),
            retrieval_secs: default_retrieval_secs(),
            llm_secs: default_llm_secs(),
            analysis_secs: default_analysis_secs(),
            request_deadline_secs: default_request_deadline_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn health(&self) -> Duration {
        Duration::from_secs(self.health_secs)
    }

    pub fn retrieval(&self) -> Duration {
        Duration::from_secs(self.retrieval_secs)
    }

    pub fn llm(&self) -> Duration {
        Duration::from_secs(self.llm_secs)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }
}

/// One `[[services]]` entry.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub id: String,

    /// `llm`, `rag`, or `kg`
    pub kind: String,

    #[serde(default)]
    pub base_url: String,

    #[serde(default = "default_health_path")]
    pub health_path: String,

    #[serde(default)]
    pub required: bool,

    /// LLM wire dialect: `ollama`, `openai`, or `generate`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

fn default_health_path() -> String {
    "/health".into()
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("health_path", &self.health_path)
            .field("required", &self.required)
            .field("adapter", &self.adapter)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("api_key_env", &self.api_key_env)
            .finish()
    }
}

impl ServiceConfig {
    /// A non-required service with the default health path.
    pub fn optional(id: impl Into<String>, kind: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            base_url: base_url.into(),
            health_path: default_health_path(),
            required: false,
            adapter: None,
            model: None,
            api_key: None,
            api_key_env: None,
        }
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    /// The API key, from the inline value or the named environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
        })
    }

    /// Convert to a registry descriptor.
    pub fn to_descriptor(&self) -> Result<ServiceDescriptor, ConfigError> {
        let kind: ServiceKind = self.kind.parse().map_err(|_| {
            ConfigError::ValidationError(format!(
                "service '{}' has unknown kind '{}'",
                self.id, self.kind
            ))
        })?;

        let mut descriptor = ServiceDescriptor::new(&self.id, kind, &self.base_url)
            .with_health_path(&self.health_path)
            .required(self.required);

        if kind == ServiceKind::Llm {
            let adapter = self.adapter.as_deref().ok_or_else(|| {
                ConfigError::ValidationError(format!("llm service '{}' has no adapter", self.id))
            })?;
            let adapter: LlmAdapter = adapter.parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "llm service '{}' has unknown adapter '{adapter}'",
                    self.id
                ))
            })?;
            descriptor = descriptor.with_adapter(adapter);
            if let Some(model) = &self.model {
                descriptor = descriptor.with_model(model);
            }
        }

        Ok(descriptor)
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.chatfuse/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CHATFUSE_HOST`, `CHATFUSE_PORT`
    /// - `CHATFUSE_DEFAULT_LLM`
    /// - `CHATFUSE_SERVICE_<ID>_URL` for each configured service
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::read(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("CHATFUSE_HOST") {
            self.gateway.host = host;
        }

        if let Some(port) = lookup("CHATFUSE_PORT") {
            match port.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid CHATFUSE_PORT"),
            }
        }

        if let Some(llm) = lookup("CHATFUSE_DEFAULT_LLM") {
            self.default_llm = llm;
        }

        for service in &mut self.services {
            let key = format!(
                "CHATFUSE_SERVICE_{}_URL",
                service.id.to_ascii_uppercase().replace('-', "_")
            );
            if let Some(url) = lookup(&key) {
                service.base_url = url;
            }
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatfuse")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if service.id.is_empty() {
                return Err(ConfigError::ValidationError("service id must not be empty".into()));
            }
            if !seen.insert(service.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate service id '{}'",
                    service.id
                )));
            }
            if service.required && service.base_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "required service '{}' has no base_url",
                    service.id
                )));
            }
            service.to_descriptor()?;
        }

        if let Some(llm) = self.services.iter().find(|s| s.id == self.default_llm) {
            if !llm.kind.eq_ignore_ascii_case("llm") {
                return Err(ConfigError::ValidationError(format!(
                    "default_llm '{}' is not an llm service",
                    self.default_llm
                )));
            }
        } else if self.services.iter().any(|s| s.kind.eq_ignore_ascii_case("llm")) {
            return Err(ConfigError::ValidationError(format!(
                "default_llm '{}' is not a configured service",
                self.default_llm
            )));
        }

        let protocol = &self.protocol;
        if protocol.default_temperature < 0.0 || protocol.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if protocol.max_context_entries == 0 || protocol.max_context_age_secs == 0 {
            return Err(ConfigError::ValidationError(
                "context limits must be greater than zero".into(),
            ));
        }
        if protocol.cleanup_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "cleanup_interval_secs must be greater than zero".into(),
            ));
        }
        if protocol.retry_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry_attempts must be at least 1".into(),
            ));
        }

        let t = &self.timeouts;
        if [t.health_secs, t.retrieval_secs, t.llm_secs, t.request_deadline_secs].contains(&0) {
            return Err(ConfigError::ValidationError(
                "timeouts must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Descriptors for every service with a base URL. Optional services
    /// without one are skipped.
    pub fn descriptors(&self) -> Result<Vec<ServiceDescriptor>, ConfigError> {
        let mut descriptors = Vec::with_capacity(self.services.len());
        for service in &self.services {
            if service.base_url.trim().is_empty() {
                tracing::warn!(service_id = %service.id, "Optional service has no base_url, skipping");
                continue;
            }
            descriptors.push(service.to_descriptor()?);
        }
        Ok(descriptors)
    }

    pub fn service(&self, id: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.id == id)
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_llm: default_llm(),
            gateway: GatewayConfig::default(),
            protocol: ProtocolConfig::default(),
            timeouts: TimeoutConfig::default(),
            services: default_services(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for chatfuse_core::Error {
    fn from(e: ConfigError) -> Self {
        chatfuse_core::Error::Config {
            message: e.to_string(),
        }
    }
}
