//! Shared test helpers: a scripted LLM and in-process upstream fakes.

use std::sync::Mutex;
use std::time::Duration;

use axum::{Router, routing::get};
use chatfuse_core::error::ProviderError;
use chatfuse_core::provider::{LlmCompletion, LlmProvider, LlmRequest};

/// A mock provider that returns a sequence of scripted completions.
///
/// Each call to `complete` returns the next entry in the queue and records
/// the request. Panics if more calls are made than entries provided.
pub struct ScriptedLlm {
    responses: Mutex<Vec<Result<LlmCompletion, ProviderError>>>,
    requests: Mutex<Vec<LlmRequest>>,
    call_count: Mutex<usize>,
}

impl ScriptedLlm {
    pub fn new(texts: Vec<&str>) -> Self {
        Self::scripted(
            texts
                .into_iter()
                .map(|t| Ok(LlmCompletion::new(t, "")))
                .collect(),
        )
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    pub fn scripted(responses: Vec<Result<LlmCompletion, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            call_count: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn last_request(&self) -> Option<LlmRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: LlmRequest, _timeout: Duration) -> Result<LlmCompletion, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "ScriptedLlm: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        let response = responses[*count].clone();
        *count += 1;
        self.requests.lock().unwrap().push(request);
        response
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A service whose `/health` answers 200.
pub async fn serve_health() -> String {
    serve(Router::new().route("/health", get(|| async { "ok" }))).await
}

/// Accepts connections and then says nothing for `stall`.
pub async fn stalled_endpoint(stall: Duration) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                tokio::time::sleep(stall).await;
                drop(socket);
            });
        }
    });
    format!("http://{addr}")
}

/// A URL nothing is listening on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}
