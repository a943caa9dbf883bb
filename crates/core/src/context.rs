//! Per-conversation contexts and their append-only interaction log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Request,
    Response,
}

/// One logged interaction. Entries are never mutated once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: EntryKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl HistoryEntry {
    pub fn request(payload: serde_json::Value) -> Self {
        Self {
            kind: EntryKind::Request,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn response(payload: serde_json::Value) -> Self {
        Self {
            kind: EntryKind::Response,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// A conversation channel bound to one backend service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    pub context_id: String,
    pub service_id: String,

    /// Opaque caller data recorded at creation
    #[serde(default)]
    pub owner_data: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
}

impl Context {
    pub fn new(
        context_id: impl Into<String>,
        service_id: impl Into<String>,
        owner_data: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            context_id: context_id.into(),
            service_id: service_id.into(),
            owner_data,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_appends_and_bumps_updated_at() {
        let mut ctx = Context::new("c1", "ollama", serde_json::Value::Null);
        let created = ctx.updated_at;
        ctx.push(HistoryEntry::request(serde_json::json!({"message": "hi"})));
        ctx.push(HistoryEntry::response(serde_json::json!({"answer": "hello"})));
        assert_eq!(ctx.history.len(), 2);
        assert_eq!(ctx.history[0].kind, EntryKind::Request);
        assert_eq!(ctx.history[1].kind, EntryKind::Response);
        assert!(ctx.updated_at >= created);
    }
}
