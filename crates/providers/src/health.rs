//! Health probing.

use std::time::Duration;
use tracing::debug;

use crate::http;

/// Issues GET probes against service health endpoints.
#[derive(Clone)]
pub struct HealthProber {
    client: reqwest::Client,
}

impl HealthProber {
    pub fn new() -> Self {
        Self {
            client: http::client(),
        }
    }

    /// GET `url` and report whether it answered 2xx within `timeout`.
    ///
    /// Connection errors, non-2xx statuses, and timeouts all count as
    /// unhealthy; the error string says which.
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<(), String> {
        match tokio::time::timeout(timeout, self.client.get(url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => Ok(()),
            Ok(Ok(response)) => Err(format!("health probe returned {}", response.status())),
            Ok(Err(e)) => Err(format!("health probe failed: {e}")),
            Err(_) => {
                debug!(url, timeout_ms = timeout.as_millis() as u64, "Health probe timed out");
                Err(format!("health probe timed out after {}ms", timeout.as_millis()))
            }
        }
    }
}

impl Default for HealthProber {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{Router, http::StatusCode, routing::get};

    #[tokio::test]
    async fn healthy_endpoint() {
        let base = serve(Router::new().route("/health", get(|| async { "ok" }))).await;
        let prober = HealthProber::new();
        assert!(prober.probe(&format!("{base}/health"), Duration::from_secs(2)).await.is_ok());
    }

    #[tokio::test]
    async fn error_status_is_unhealthy() {
        let base = serve(Router::new().route(
            "/health",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let prober = HealthProber::new();
        let err = prober
            .probe(&format!("{base}/health"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.contains("503"));
    }

    #[tokio::test]
    async fn refused_connection_is_unhealthy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let prober = HealthProber::new();
        assert!(
            prober
                .probe(&format!("http://{addr}/health"), Duration::from_secs(2))
                .await
                .is_err()
        );
    }
}
