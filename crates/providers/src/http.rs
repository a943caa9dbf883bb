//! Shared request execution: one timeout around send + status mapping + decode.

use chatfuse_core::error::ProviderError;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

pub(crate) fn client() -> reqwest::Client {
    reqwest::Client::new()
}

/// Send `request` and decode a JSON body of type `T`, all within `timeout`.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<T, ProviderError> {
    let call = async {
        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if !(200..300).contains(&status) {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Upstream returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::MalformedPayload(format!("Failed to parse response: {e}")))
    };

    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            after_ms: timeout.as_millis() as u64,
        }),
    }
}
