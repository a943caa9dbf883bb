//! Service registry: descriptors of every backend plus their health.
//!
//! Registration probes the service's health endpoint with a short timeout.
//! Optional services that fail are kept as `Inactive`; a required service
//! that fails makes registration (and therefore startup) fail.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::time::Duration;

use chatfuse_core::error::{Error, RegistrationError, Result};
use chatfuse_core::service::{ServiceDescriptor, ServiceKind, ServiceStatus};
use chatfuse_providers::HealthProber;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registered {
    pub id: String,
    pub status: ServiceStatus,
}

impl Registered {
    pub fn is_active(&self) -> bool {
        self.status == ServiceStatus::Active
    }
}

/// Summary of [`ServiceRegistry::initialize`].
#[derive(Debug, Clone, Default)]
pub struct InitReport {
    pub active: Vec<String>,
    pub inactive: Vec<String>,
}

pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceDescriptor>>,
    prober: HealthProber,
    probe_timeout: Duration,
}

impl ServiceRegistry {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            prober: HealthProber::new(),
            probe_timeout,
        }
    }

    /// Probe and record one service.
    pub async fn register(
        &self,
        mut descriptor: ServiceDescriptor,
    ) -> std::result::Result<Registered, RegistrationError> {
        if self.services.read().await.contains_key(&descriptor.id) {
            return Err(RegistrationError::Duplicate(descriptor.id));
        }

        let probe = self
            .prober
            .probe(&descriptor.health_url(), self.probe_timeout)
            .await;

        let id = descriptor.id.clone();
        let required = descriptor.required;
        match &probe {
            Ok(()) => {
                descriptor.status = ServiceStatus::Active;
                descriptor.last_heartbeat = Some(Utc::now());
                info!(service_id = %id, kind = %descriptor.kind, "Service registered");
            }
            Err(reason) => {
                descriptor.status = ServiceStatus::Inactive;
                if required {
                    warn!(service_id = %id, reason = %reason, "Required service failed health probe");
                } else {
                    warn!(service_id = %id, reason = %reason, "Optional service unavailable, registered as inactive");
                }
            }
        }

        let status = descriptor.status;
        match self.services.write().await.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RegistrationError::Duplicate(id)),
            Entry::Vacant(slot) => {
                slot.insert(descriptor);
            }
        }

        match probe {
            Err(reason) if required => Err(RegistrationError::RequiredUnavailable {
                service_id: id,
                reason,
            }),
            _ => Ok(Registered { id, status }),
        }
    }

    /// Register every descriptor concurrently. Fails iff a required service
    /// failed; optional failures are only logged.
    pub async fn initialize(
        &self,
        descriptors: Vec<ServiceDescriptor>,
    ) -> std::result::Result<InitReport, RegistrationError> {
        let outcomes =
            futures::future::join_all(descriptors.into_iter().map(|d| self.register(d))).await;

        let mut report = InitReport::default();
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(registered) if registered.is_active() => report.active.push(registered.id),
                Ok(registered) => report.inactive.push(registered.id),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        report.active.sort();
        report.inactive.sort();
        info!(
            active = report.active.len(),
            inactive = report.inactive.len(),
            "Service registry initialized"
        );
        Ok(report)
    }

    /// Re-probe a service. Success refreshes `last_heartbeat`; failure only
    /// marks it inactive. Unknown ids are unhealthy.
    pub async fn health(&self, id: &str) -> bool {
        let Some(url) = self.services.read().await.get(id).map(|s| s.health_url()) else {
            return false;
        };

        let healthy = self.prober.probe(&url, self.probe_timeout).await.is_ok();

        if let Some(service) = self.services.write().await.get_mut(id) {
            if healthy {
                service.status = ServiceStatus::Active;
                service.last_heartbeat = Some(Utc::now());
            } else {
                service.status = ServiceStatus::Inactive;
            }
        }
        healthy
    }

    pub async fn resolve(&self, id: &str) -> Result<ServiceDescriptor> {
        self.services
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::ServiceNotFound(id.to_string()))
    }

    /// The active service of `kind` with the smallest id.
    pub async fn first_active(&self, kind: ServiceKind) -> Option<ServiceDescriptor> {
        self.services
            .read()
            .await
            .values()
            .filter(|s| s.kind == kind && s.is_active())
            .min_by(|a, b| a.id.cmp(&b.id))
            .cloned()
    }

    /// All descriptors, sorted by id.
    pub async fn list(&self) -> Vec<ServiceDescriptor> {
        let mut services: Vec<ServiceDescriptor> =
            self.services.read().await.values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{serve_health, stalled_endpoint, unreachable_url};

    fn rag(url: &str) -> ServiceDescriptor {
        ServiceDescriptor::new("rag", ServiceKind::Rag, url)
    }

    #[tokio::test]
    async fn healthy_service_becomes_active() {
        let base = serve_health().await;
        let registry = ServiceRegistry::new(Duration::from_secs(2));

        let registered = registry.register(rag(&base)).await.unwrap();
        assert!(registered.is_active());

        let descriptor = registry.resolve("rag").await.unwrap();
        assert_eq!(descriptor.status, ServiceStatus::Active);
        assert!(descriptor.last_heartbeat.is_some());
    }

    #[tokio::test]
    async fn optional_failure_registers_inactive() {
        let registry = ServiceRegistry::new(Duration::from_secs(2));
        let registered = registry.register(rag(&unreachable_url())).await.unwrap();
        assert_eq!(registered.status, ServiceStatus::Inactive);
        assert!(registry.resolve("rag").await.unwrap().last_heartbeat.is_none());
    }

    #[tokio::test]
    async fn required_failure_is_an_error() {
        let registry = ServiceRegistry::new(Duration::from_secs(2));
        let err = registry
            .register(
                ServiceDescriptor::new("gemini", ServiceKind::Llm, unreachable_url()).required(true),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::RequiredUnavailable { ref service_id, .. } if service_id == "gemini"));
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let base = serve_health().await;
        let registry = ServiceRegistry::new(Duration::from_secs(2));
        registry.register(rag(&base)).await.unwrap();
        assert!(matches!(
            registry.register(rag(&base)).await,
            Err(RegistrationError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_duplicate_registration_keeps_one() {
        let base = serve_health().await;
        let registry = ServiceRegistry::new(Duration::from_secs(2));

        let (first, second) = tokio::join!(registry.register(rag(&base)), registry.register(rag(&base)));
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(RegistrationError::Duplicate(id)) if id == "rag"))
                .count(),
            1
        );
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn initialize_tolerates_all_optional_failures() {
        let base = serve_health().await;
        let registry = ServiceRegistry::new(Duration::from_secs(2));
        let descriptors = vec![
            ServiceDescriptor::new("gemini", ServiceKind::Llm, &base).required(true),
            ServiceDescriptor::new("ollama", ServiceKind::Llm, unreachable_url()),
            ServiceDescriptor::new("rag", ServiceKind::Rag, unreachable_url()),
            ServiceDescriptor::new("kg", ServiceKind::Kg, unreachable_url()),
        ];

        let report = registry.initialize(descriptors).await.unwrap();
        assert_eq!(report.active, vec!["gemini"]);
        assert_eq!(report.inactive, vec!["kg", "ollama", "rag"]);
        assert_eq!(registry.list().await.len(), 4);
    }

    #[tokio::test]
    async fn initialize_fails_on_required_failure() {
        let base = serve_health().await;
        let registry = ServiceRegistry::new(Duration::from_secs(2));
        let descriptors = vec![
            ServiceDescriptor::new("rag", ServiceKind::Rag, &base),
            ServiceDescriptor::new("gemini", ServiceKind::Llm, unreachable_url()).required(true),
        ];
        assert!(registry.initialize(descriptors).await.is_err());
    }

    #[tokio::test]
    async fn health_reprobes_and_updates_status() {
        let base = serve_health().await;
        let registry = ServiceRegistry::new(Duration::from_secs(2));
        registry.register(rag(&base)).await.unwrap();
        assert!(registry.health("rag").await);

        let registry = ServiceRegistry::new(Duration::from_secs(2));
        registry.register(rag(&unreachable_url())).await.unwrap();
        assert!(!registry.health("rag").await);
        assert_eq!(registry.resolve("rag").await.unwrap().status, ServiceStatus::Inactive);

        assert!(!registry.health("missing").await);
    }

    #[tokio::test]
    async fn stalled_service_times_out_at_probe_timeout() {
        let base = stalled_endpoint(Duration::from_secs(10)).await;
        let registry = ServiceRegistry::new(Duration::from_secs(5));
        registry.register(rag(&base)).await.unwrap();

        let started = std::time::Instant::now();
        assert!(!registry.health("rag").await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(4900), "returned too early: {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(5400), "returned too late: {elapsed:?}");
    }

    #[tokio::test]
    async fn resolve_unknown_is_not_found() {
        let registry = ServiceRegistry::new(Duration::from_secs(1));
        assert!(matches!(
            registry.resolve("nope").await,
            Err(Error::ServiceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn first_active_skips_inactive() {
        let base = serve_health().await;
        let registry = ServiceRegistry::new(Duration::from_secs(2));
        registry
            .register(ServiceDescriptor::new("a-kg", ServiceKind::Kg, unreachable_url()))
            .await
            .unwrap();
        registry
            .register(ServiceDescriptor::new("b-kg", ServiceKind::Kg, &base))
            .await
            .unwrap();
        assert_eq!(registry.first_active(ServiceKind::Kg).await.unwrap().id, "b-kg");
        assert!(registry.first_active(ServiceKind::Rag).await.is_none());
    }
}
