//! Embedding providers.
//!
//! Each knowledge base names its embedding provider in its `config.yaml`;
//! the same provider embeds chunks at learn time and queries at search time.

pub mod providers;

use crate::types::KnowledgeBaseConfig;
use std::sync::Arc;
use taxbot_core::{AppError, AppResult};

/// Trait for embedding providers.
#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Provider name (e.g. "ollama", "openai", "trigram")
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed several texts; output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut results = self.embed_batch(&[text.to_string()]).await?;
        results
            .pop()
            .ok_or_else(|| AppError::Knowledge("No embedding returned".to_string()))
    }
}

/// Create the embedding provider a knowledge base is configured with.
pub fn create_provider(
    config: &KnowledgeBaseConfig,
    api_key: Option<&str>,
) -> AppResult<Arc<dyn EmbeddingProvider>> {
    let dimensions = config.embedding_dim as usize;

    match config.provider.as_str() {
        "trigram" => Ok(Arc::new(providers::trigram::TrigramProvider::new(
            dimensions,
        ))),

        "ollama" => {
            let provider = providers::ollama::OllamaProvider::new(
                config.endpoint.as_deref(),
                &config.model,
                dimensions,
            )?;
            Ok(Arc::new(provider))
        }

        "openai" => {
            let api_key = api_key.ok_or_else(|| {
                AppError::Knowledge("OpenAI embeddings require an API key".to_string())
            })?;
            let provider = providers::openai::OpenAiProvider::new(
                config.endpoint.as_deref(),
                api_key,
                &config.model,
                dimensions,
            )?;
            Ok(Arc::new(provider))
        }

        other => Err(AppError::Knowledge(format!(
            "Unknown embedding provider: '{}'. Supported providers: ollama, openai, trigram",
            other
        ))),
    }
}
