//! Chat message and session domain types.
//!
//! These are the persisted shapes exchanged with chat clients. Field names are
//! camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The language model
    Model,
}

impl Role {
    /// Parse a wire role. `assistant` is accepted as an alias for `model`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "model" | "assistant" => Some(Self::Model),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// One text fragment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    pub text: String,
}

/// A citation attached to a model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,

    pub content_preview: String,
}

/// A single message in a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,

    pub parts: Vec<Part>,

    pub timestamp: DateTime<Utc>,

    /// Citations (model messages only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<Reference>,

    /// Reasoning extracted from the model output (model messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

impl Message {
    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role(Role::User, text)
    }

    /// Create a new model message.
    pub fn model(text: impl Into<String>) -> Self {
        Self::with_role(Role::Model, text)
    }

    fn with_role(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![Part { text: text.into() }],
            timestamp: Utc::now(),
            references: Vec::new(),
            thinking: None,
        }
    }

    /// Text of the first part, or an empty string.
    pub fn text(&self) -> &str {
        self.parts.first().map(|p| p.text.as_str()).unwrap_or_default()
    }

    /// A turn is usable when it has at least one part with text.
    pub fn is_valid(&self) -> bool {
        !self.parts.is_empty() && !self.text().is_empty()
    }

    /// Leniently decode a client-supplied message.
    ///
    /// Returns `None` when the role is missing or unknown, when `parts` is
    /// absent or empty, or when the first part has no string `text`. A missing
    /// timestamp defaults to now. References and thinking are only kept on
    /// model messages.
    pub fn from_wire(value: &serde_json::Value) -> Option<Self> {
        let role = Role::parse(value.get("role")?.as_str()?)?;
        let raw_parts = value.get("parts")?.as_array()?;
        raw_parts.first()?.get("text")?.as_str()?;

        let parts: Vec<Part> = raw_parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .map(|text| Part { text: text.to_string() })
            .collect();

        let timestamp = value
            .get("timestamp")
            .and_then(|t| serde_json::from_value::<DateTime<Utc>>(t.clone()).ok())
            .unwrap_or_else(Utc::now);

        let (references, thinking) = if role == Role::Model {
            let references = value
                .get("references")
                .and_then(|r| serde_json::from_value::<Vec<Reference>>(r.clone()).ok())
                .unwrap_or_default();
            let thinking = value
                .get("thinking")
                .and_then(|t| t.as_str())
                .map(String::from);
            (references, thinking)
        } else {
            (Vec::new(), None)
        };

        Some(Self {
            role,
            parts,
            timestamp,
            references,
            thinking,
        })
    }
}

/// A persisted conversation owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub session_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
