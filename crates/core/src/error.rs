//! Error types for the Chatfuse domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Upstream wire failures are modelled by [`ProviderError`] and folded into
//! the top-level [`Error`] together with the id of the service that failed.

use thiserror::Error;

/// The top-level error type for all Chatfuse operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Registry ---
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Unsupported service kind: {0}")]
    UnsupportedServiceKind(String),

    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    // --- Contexts and sessions ---
    #[error("Context not found: {0}")]
    ContextNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // --- Upstream calls ---
    #[error("Upstream error from '{service_id}': {cause}")]
    Upstream {
        service_id: String,
        cause: ProviderError,
    },

    #[error("Upstream '{service_id}' timed out after {after_ms}ms")]
    UpstreamTimeout { service_id: String, after_ms: u64 },

    #[error("Malformed payload from '{service_id}': {reason}")]
    MalformedUpstreamPayload { service_id: String, reason: String },

    // --- Boundary ---
    #[error("Authentication invalidated: {0}")]
    AuthInvalidated(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Attribute a wire-level failure to the service that produced it.
    pub fn upstream(service_id: impl Into<String>, cause: ProviderError) -> Self {
        let service_id = service_id.into();
        match cause {
            ProviderError::Timeout { after_ms } => Self::UpstreamTimeout {
                service_id,
                after_ms,
            },
            ProviderError::MalformedPayload(reason) => Self::MalformedUpstreamPayload {
                service_id,
                reason,
            },
            cause => Self::Upstream { service_id, cause },
        }
    }

    /// Whether this error came from a backend service rather than the core.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::UpstreamTimeout { .. } | Self::MalformedUpstreamPayload { .. }
        )
    }
}

// --- Bounded context errors ---

/// A failure talking to one backend over the wire.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by upstream, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedPayload(String),
}

impl ProviderError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

/// Raised by the registry when startup cannot proceed.
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    #[error("Required service '{service_id}' failed its health probe: {reason}")]
    RequiredUnavailable { service_id: String, reason: String },

    #[error("Service '{0}' is already registered")]
    Duplicate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::upstream(
            "ollama",
            ProviderError::ApiError {
                status_code: 502,
                message: "bad gateway".into(),
            },
        );
        assert!(err.to_string().contains("ollama"));
        assert!(err.to_string().contains("502"));
        assert!(err.is_upstream());
    }

    #[test]
    fn timeouts_become_upstream_timeouts() {
        let err = Error::upstream("rag", ProviderError::Timeout { after_ms: 5000 });
        assert!(matches!(
            err,
            Error::UpstreamTimeout { ref service_id, after_ms: 5000 } if service_id == "rag"
        ));
    }

    #[test]
    fn malformed_payloads_keep_their_reason() {
        let err = Error::upstream("kg", ProviderError::MalformedPayload("not json".into()));
        assert!(matches!(err, Error::MalformedUpstreamPayload { .. }));
        assert!(err.to_string().contains("not json"));
    }

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::Timeout { after_ms: 1 }.is_retryable());
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_retryable());
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!ProviderError::AuthenticationFailed("nope".into()).is_retryable());
    }
}
