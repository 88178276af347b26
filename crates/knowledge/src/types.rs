//! Knowledge system type definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A retrieved passage and where it came from.
///
/// Produced by vector retrieval and web search alike and never modified
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Document {
    /// Passage text
    pub content: String,

    /// File path, URL or collection id
    pub source: String,
}

impl Document {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
        }
    }
}

/// Configuration for a knowledge base (one collection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBaseConfig {
    /// Name of the knowledge base
    pub name: String,

    /// Embedding provider ("ollama", "openai", "trigram")
    pub provider: String,

    /// Embedding model
    pub model: String,

    /// Embedding endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Embedding vector dimension
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: u32,

    /// Chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Overlap between chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,

    /// Texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Chunks scoring below this cosine similarity are dropped from results
    #[serde(default)]
    pub min_score: f32,
}

fn default_chunk_size() -> u32 {
    1000
}

fn default_chunk_overlap() -> u32 {
    200
}

fn default_embedding_dim() -> u32 {
    768
}

fn default_batch_size() -> u32 {
    32
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            endpoint: None,
            embedding_dim: default_embedding_dim(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            batch_size: default_batch_size(),
            min_score: 0.0,
        }
    }
}

/// A learned source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub id: String,

    /// Path as given to `learn`
    pub path: String,

    pub content_type: String,

    pub learned_at: DateTime<Utc>,

    pub size_bytes: u64,
}

/// A text chunk with embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeChunk {
    /// Unique chunk identifier
    pub id: String,

    /// Source document ID
    pub source_id: String,

    /// Source label returned with retrieved documents
    pub source: String,

    /// Position within source
    pub position: u32,

    /// Text content
    pub text: String,

    /// Embedding vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl KnowledgeChunk {
    pub fn to_document(&self) -> Document {
        Document::new(self.text.clone(), self.source.clone())
    }
}

/// Options for the learn operation.
#[derive(Debug, Clone, Default)]
pub struct LearnOptions {
    /// Knowledge base name
    pub base_name: String,

    /// Local paths to learn from
    pub paths: Vec<PathBuf>,

    /// Substring patterns a path must contain (any)
    pub include: Vec<String>,

    /// Substring patterns that exclude a path
    pub exclude: Vec<String>,

    /// Reset the base before learning
    pub reset: bool,
}

/// Statistics from a learn operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnStats {
    pub sources_count: u32,
    pub chunks_count: u32,
    pub skipped_count: u32,
    pub bytes_processed: u64,
    pub duration_secs: f64,
}

/// Options for a direct search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub base_name: String,
    pub query: String,
    pub top_k: usize,
}

/// Documents with their similarity scores, best first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub documents: Vec<Document>,
    pub scores: Vec<f32>,
}

/// Statistics for a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseStats {
    pub base_name: String,
    pub sources_count: u32,
    pub chunks_count: u32,
    pub db_size_bytes: u64,
    pub last_learn_at: Option<DateTime<Utc>>,
}

/// Internal chunk candidate before embedding.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub position: u32,
    pub text: String,
}
