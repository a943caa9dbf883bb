//! Chat session persistence for Chatfuse.
//!
//! - [`store`]: the server-side repository of finished conversations
//! - [`rotation`]: the client-side save-and-rotate protocol
//! - [`client`]: an HTTP implementation of the protocol's collaborators

pub mod client;
pub mod rotation;
pub mod store;

pub use client::{ChatOptions, GatewayClient, USER_HEADER};
pub use rotation::{ActiveSession, ChatTransport, HistoryPersistence, RotationOutcome, SingleFlight};
pub use store::{InMemorySessionStore, SaveReceipt, SessionStore, SessionSummary};
