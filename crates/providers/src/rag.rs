//! Retrieval service client (`POST /query`).

use chatfuse_core::error::ProviderError;
use chatfuse_core::evidence::RagDocument;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::http;

pub struct RagClient {
    service_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl RagClient {
    pub fn new(service_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: http::client(),
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Retrieve documents relevant to `query` for `user_id`.
    ///
    /// The reply list may be named `documents` or `relevant_chunks`. Items that
    /// are not objects are skipped; objects missing `source` or `content` are
    /// kept with those fields empty so fusion can decide.
    pub async fn query(
        &self,
        query: &str,
        user_id: &str,
        timeout: Duration,
    ) -> Result<Vec<RagDocument>, ProviderError> {
        let url = format!("{}/query", self.base_url);
        let body = serde_json::json!({
            "query": query,
            "user_id": user_id,
        });

        debug!(service_id = %self.service_id, "Querying retrieval service");

        let reply: Value = http::send_json(self.client.post(&url).json(&body), timeout).await?;

        let items = reply
            .get("documents")
            .or_else(|| reply.get("relevant_chunks"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ProviderError::MalformedPayload("reply has no document list".into())
            })?;

        let documents: Vec<RagDocument> = items.iter().filter_map(normalize_document).collect();
        if documents.len() < items.len() {
            warn!(
                service_id = %self.service_id,
                skipped = items.len() - documents.len(),
                "Skipped malformed retrieval items"
            );
        }
        Ok(documents)
    }
}

fn normalize_document(item: &Value) -> Option<RagDocument> {
    let obj = item.as_object()?;
    let text = |key: &str| obj.get(key).and_then(Value::as_str).map(String::from);

    let source = text("source")
        .or_else(|| text("documentName"))
        .or_else(|| {
            obj.get("metadata")
                .and_then(|m| m.get("source"))
                .and_then(Value::as_str)
                .map(String::from)
        });
    let content = text("content").or_else(|| text("text"));
    let score = obj.get("score").and_then(Value::as_f64);

    Some(RagDocument {
        source,
        content,
        score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::{Json, Router, routing::post};
    use serde_json::json;

    #[test]
    fn normalize_accepts_alternate_keys() {
        let doc = normalize_document(&json!({
            "documentName": "notes.pdf",
            "text": "body",
            "score": 0.25
        }))
        .unwrap();
        assert_eq!(doc.source.as_deref(), Some("notes.pdf"));
        assert_eq!(doc.content.as_deref(), Some("body"));
        assert_eq!(doc.score, Some(0.25));

        let doc = normalize_document(&json!({"metadata": {"source": "m.txt"}})).unwrap();
        assert_eq!(doc.source.as_deref(), Some("m.txt"));
        assert!(doc.content.is_none());

        assert!(normalize_document(&json!("just a string")).is_none());
    }

    #[tokio::test]
    async fn query_sends_user_and_skips_garbage() {
        let app = Router::new().route(
            "/query",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["user_id"], "u1");
                Json(json!({
                    "relevant_chunks": [
                        {"source": "a.pdf", "content": "alpha", "score": 0.1},
                        42,
                        {"source": "b.pdf"}
                    ]
                }))
            }),
        );
        let base = serve(app).await;

        let client = RagClient::new("rag", base);
        let docs = client.query("alpha?", "u1", Duration::from_secs(5)).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].source.as_deref(), Some("a.pdf"));
        assert!(docs[1].content.is_none());
    }

    #[tokio::test]
    async fn missing_list_is_malformed() {
        let app = Router::new().route("/query", post(|| async { Json(json!({"ok": true})) }));
        let base = serve(app).await;

        let client = RagClient::new("rag", base);
        let err = client.query("q", "u", Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedPayload(_)));
    }
}
