//! Document retrieval over a learned knowledge base.

use crate::config::{get_index_path, load_config};
use crate::embeddings::{create_provider, EmbeddingProvider};
use crate::index::{init_index, query_chunks};
use crate::types::{Document, KnowledgeBaseConfig, SearchResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taxbot_core::{AppError, AppResult};

/// Similarity search over a document collection.
///
/// Results are ranked by descending relevance. Calling `search` repeatedly
/// with the same arguments has no side effects.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> AppResult<Vec<Document>>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// `Retriever` backed by a SQLite knowledge base index.
#[derive(Debug, Clone)]
pub struct VectorRetriever {
    config: KnowledgeBaseConfig,
    index_path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl VectorRetriever {
    /// Open the knowledge base `base_name` in `workspace`.
    ///
    /// Fails with a retrieval error if the base has never been learned.
    pub fn open(workspace: &Path, base_name: &str, api_key: Option<&str>) -> AppResult<Self> {
        let config = load_config(workspace, base_name)?;
        let index_path = get_index_path(workspace, base_name);

        if !index_path.exists() {
            return Err(AppError::Retrieval(format!(
                "Knowledge base '{}' has no index. Run 'taxbot knowledge learn {}' first.",
                base_name, base_name
            )));
        }

        let embedder = create_provider(&config, api_key)?;
        Ok(Self::with_embedder(config, index_path, embedder))
    }

    pub fn with_embedder(
        config: KnowledgeBaseConfig,
        index_path: PathBuf,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            config,
            index_path,
            embedder,
        }
    }

    /// Top-k documents with their cosine scores, best first.
    pub async fn search_scored(&self, query: &str, k: usize) -> AppResult<SearchResult> {
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to embed query: {}", e)))?;

        let index_path = self.index_path.clone();
        let results = tokio::task::spawn_blocking(move || {
            let conn = init_index(&index_path)?;
            query_chunks(&conn, &query_embedding, k)
        })
        .await
        .map_err(|e| AppError::Retrieval(format!("Index query task failed: {}", e)))?
        .map_err(|e| AppError::Retrieval(e.to_string()))?;

        let min_score = self.config.min_score;
        let (documents, scores): (Vec<Document>, Vec<f32>) = results
            .into_iter()
            .filter(|(_, score)| *score >= min_score)
            .map(|(chunk, score)| (chunk.to_document(), score))
            .unzip();

        tracing::debug!(
            base = %self.config.name,
            hits = documents.len(),
            top_score = scores.first().copied().unwrap_or(0.0),
            "Vector search complete"
        );

        Ok(SearchResult { documents, scores })
    }
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    async fn search(&self, query: &str, k: usize) -> AppResult<Vec<Document>> {
        Ok(self.search_scored(query, k).await?.documents)
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_base_is_retrieval_error() {
        let temp = TempDir::new().unwrap();
        let err = VectorRetriever::open(temp.path(), "income_tax", None).unwrap_err();
        assert!(matches!(err, AppError::Retrieval(_)));
    }
}
