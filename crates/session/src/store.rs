//! Server-side session repository.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chatfuse_core::error::{Error, Result};
use chatfuse_core::message::{ChatSession, Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

const PREVIEW_CHARS: usize = 75;
const DEFAULT_PREVIEW: &str = "Chat Session";

/// Reply to a save: the id the history was stored under (if anything was
/// stored) and the id the client should continue with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveReceipt {
    pub saved_session_id: Option<String>,
    #[serde(default)]
    pub new_session_id: Option<String>,
}

/// One row of a user's session list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub preview: String,
}

impl SessionSummary {
    pub fn of(session: &ChatSession) -> Self {
        let preview = session
            .messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.text())
            .filter(|t| !t.is_empty())
            .map(|text| {
                if text.chars().count() > PREVIEW_CHARS {
                    let cut: String = text.chars().take(PREVIEW_CHARS).collect();
                    format!("{cut}...")
                } else {
                    text.to_string()
                }
            })
            .unwrap_or_else(|| DEFAULT_PREVIEW.to_string());

        Self {
            session_id: session.session_id.clone(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            message_count: session.messages.len(),
            preview,
        }
    }
}

/// Persistence for finished conversations, scoped by owning user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store the valid subset of `messages` under `(user_id, session_id)`
    /// and issue a fresh session id for the client to continue with.
    async fn save(&self, user_id: &str, session_id: &str, messages: &[Value]) -> Result<SaveReceipt>;

    /// The user's sessions, most recently updated first.
    async fn list(&self, user_id: &str) -> Result<Vec<SessionSummary>>;

    async fn get(&self, user_id: &str, session_id: &str) -> Result<ChatSession>;

    async fn delete(&self, user_id: &str, session_id: &str) -> Result<()>;
}

/// Keep a message only if it has a role, a first text part, and a timestamp.
pub fn valid_messages(messages: &[Value]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| m.get("timestamp").is_some_and(|t| !t.is_null()))
        .filter_map(Message::from_wire)
        .collect()
}

/// An in-memory session store.
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<(String, String), ChatSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, user_id: &str, session_id: &str, messages: &[Value]) -> Result<SaveReceipt> {
        if session_id.trim().is_empty() {
            return Err(Error::InvalidRequest("Session ID required to save history.".into()));
        }

        let valid = valid_messages(messages);
        let new_session_id = Uuid::new_v4().to_string();

        if valid.is_empty() {
            debug!(session_id, "No valid messages to save");
            return Ok(SaveReceipt {
                saved_session_id: None,
                new_session_id: Some(new_session_id),
            });
        }

        let key = (user_id.to_string(), session_id.to_string());
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key)
            .or_insert_with(|| ChatSession::new(session_id, user_id));
        session.messages = valid;
        session.updated_at = Utc::now();

        info!(session_id, user_id, messages = session.messages.len(), "Chat history saved");
        Ok(SaveReceipt {
            saved_session_id: Some(session_id.to_string()),
            new_session_id: Some(new_session_id),
        })
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        let sessions = self.sessions.read().await;
        let mut owned: Vec<&ChatSession> = sessions.values().filter(|s| s.user_id == user_id).collect();
        owned.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(owned.into_iter().map(SessionSummary::of).collect())
    }

    async fn get(&self, user_id: &str, session_id: &str) -> Result<ChatSession> {
        self.sessions
            .read()
            .await
            .get(&(user_id.to_string(), session_id.to_string()))
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    async fn delete(&self, user_id: &str, session_id: &str) -> Result<()> {
        match self
            .sessions
            .write()
            .await
            .remove(&(user_id.to_string(), session_id.to_string()))
        {
            Some(_) => {
                info!(session_id, user_id, "Chat session deleted");
                Ok(())
            }
            None => Err(Error::SessionNotFound(session_id.to_string())),
        }
    }
}
