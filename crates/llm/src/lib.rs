//! LLM integration crate for taxbot.
//!
//! Provider-agnostic access to chat models through the [`LlmClient`] trait,
//! plus strict parsing of structured (JSON-schema) completions.
//!
//! # Providers
//! - **Ollama**: Local LLM runtime (default)
//! - **OpenAI**: Chat completions API and compatible endpoints
//!
//! # Example
//! ```no_run
//! use taxbot_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::new("종합소득세 신고 기한은?", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod structured;

// Re-export main types
pub use client::{
    ChatMessage, LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage,
    ResponseFormat, Role,
};
pub use factory::{create_client, create_client_from_config};
pub use providers::{OllamaClient, OpenAiClient};
pub use structured::parse_structured;
