//! Wire adapters for Chatfuse backends.
//!
//! LLM dialects implement `chatfuse_core::LlmProvider`; the retrieval and
//! knowledge-graph services get dedicated clients. The router builds one
//! provider per configured LLM service.

mod http;

pub mod generate;
pub mod health;
pub mod kg;
pub mod ollama;
pub mod openai_compat;
pub mod rag;
pub mod router;
pub mod thinking;

#[cfg(test)]
pub(crate) mod test_support;

pub use generate::GenerateProvider;
pub use health::HealthProber;
pub use kg::{KgClient, extract_entity_mentions};
pub use ollama::OllamaProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use rag::RagClient;
pub use router::ProviderRouter;
pub use thinking::{ParsedReply, parse_thinking};
