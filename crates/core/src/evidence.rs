//! Retrieval and knowledge-graph evidence.

use serde::{Deserialize, Serialize};

/// A document returned by the retrieval service.
///
/// `source` and `content` are optional on the wire; documents missing either
/// are skipped during fusion instead of failing the whole reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Raw distance reported by the retrieval service (lower is closer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl RagDocument {
    pub fn new(source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            content: Some(content.into()),
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KgNode {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KgEdge {
    pub from: String,
    pub relationship: String,
    pub to: String,
}

/// Facts returned by the knowledge-graph service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KgData {
    #[serde(default)]
    pub nodes: Vec<KgNode>,

    #[serde(default)]
    pub edges: Vec<KgEdge>,
}

impl KgData {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}
