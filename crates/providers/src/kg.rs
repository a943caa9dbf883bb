//! Knowledge-graph service client (`POST /query_kg`).

use chatfuse_core::error::ProviderError;
use chatfuse_core::evidence::{KgData, KgEdge, KgNode};
use regex_lite::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

use crate::http;

const MAX_NODES: usize = 15;
const MAX_EDGES: usize = 30;
const MAX_MENTIONS: usize = 20;

pub struct KgClient {
    service_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl KgClient {
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

    /// Fetch entities and relationships relevant to `query`.
    ///
    /// Malformed nodes and edges are dropped individually; a reply without
    /// `nodes` and `edges` arrays is a malformed payload.
    pub async fn query(
        &self,
        query: &str,
        user_id: Option<&str>,
        entity_mentions: &[String],
        timeout: Duration,
    ) -> Result<KgData, ProviderError> {
        let url = format!("{}/query_kg", self.base_url);
        let body = serde_json::json!({
            "user_id": user_id,
            "query": query,
            "entity_mentions": entity_mentions,
            "max_nodes": MAX_NODES,
            "max_edges": MAX_EDGES,
        });

        debug!(service_id = %self.service_id, mentions = entity_mentions.len(), "Querying knowledge graph");

        let reply: Value = http::send_json(self.client.post(&url).json(&body), timeout).await?;
        normalize(&reply)
    }
}

fn normalize(reply: &Value) -> Result<KgData, ProviderError> {
    let (Some(nodes), Some(edges)) = (
        reply.get("nodes").and_then(Value::as_array),
        reply.get("edges").and_then(Value::as_array),
    ) else {
        return Err(ProviderError::MalformedPayload(
            "reply lacks nodes/edges arrays".into(),
        ));
    };

    let nodes = nodes
        .iter()
        .filter_map(|n| serde_json::from_value::<KgNode>(n.clone()).ok())
        .collect();
    let edges = edges
        .iter()
        .filter_map(|e| serde_json::from_value::<KgEdge>(e.clone()).ok())
        .collect();

    Ok(KgData { nodes, edges })
}

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b[A-Z][a-zA-Z]+(?: [A-Z][a-zA-Z]+)*\b").unwrap_or_else(|e| {
            unreachable!("entity mention pattern is a valid literal: {e}")
        })
    })
}

/// Capitalized word runs ("Marie Curie", "Paris"), deduplicated in order of
/// first appearance and capped at twenty.
pub fn extract_entity_mentions(text: &str) -> Vec<String> {
    let mut mentions: Vec<String> = Vec::new();
    for m in mention_pattern().find_iter(text) {
        let mention = m.as_str();
        if !mentions.iter().any(|seen| seen == mention) {
            mentions.push(mention.to_string());
            if mentions.len() == MAX_MENTIONS {
                break;
            }
        }
    }
    mentions
}
