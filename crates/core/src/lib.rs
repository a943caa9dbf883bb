//! # Chatfuse Core
//!
//! Domain types, traits, and error definitions for the Chatfuse service
//! orchestration core. This crate has no HTTP or storage dependencies; it
//! defines the model every other crate implements against.
//!
//! ## Layout
//!
//! - [`service`] describes backend services (LLM, retrieval, knowledge graph)
//! - [`context`] holds per-conversation contexts and their append-only log
//! - [`message`] holds persisted chat messages and sessions
//! - [`evidence`] holds retrieval documents and knowledge-graph facts
//! - [`provider`] is the seam over LLM wire protocols
//! - [`retry`] and [`deadline`] bound every outbound call

pub mod context;
pub mod deadline;
pub mod error;
pub mod evidence;
pub mod message;
pub mod provider;
pub mod retry;
pub mod service;

// Re-export key types at crate root for ergonomics
pub use context::{Context, EntryKind, HistoryEntry};
pub use deadline::Deadline;
pub use error::{Error, ProviderError, RegistrationError, Result};
pub use evidence::{KgData, KgEdge, KgNode, RagDocument};
pub use message::{ChatSession, Message, Part, Reference, Role};
pub use provider::{LlmCompletion, LlmProvider, LlmReply, LlmRequest};
pub use retry::RetryPolicy;
pub use service::{LlmAdapter, ServiceDescriptor, ServiceKind, ServiceStatus};
