//! Knowledge base management for the tax collections.
//!
//! Local documents are parsed, chunked, embedded and stored in a per-base
//! SQLite index. The [`retriever::Retriever`] and [`web::WebSearch`]
//! traits are the two document sources the answer graph consumes.

pub mod chunker;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod parser;
pub mod retriever;
pub mod types;
pub mod web;


pub use retriever::{Retriever, VectorRetriever};
pub use types::{
    BaseStats, Document, KnowledgeBaseConfig, KnowledgeChunk, KnowledgeSource, LearnOptions,
    LearnStats, SearchOptions, SearchResult,
};
pub use web::{TavilySearch, WebSearch};

use chrono::Utc;
use embeddings::EmbeddingProvider;
use std::path::Path;
use std::time::Instant;
use taxbot_core::{AppError, AppResult};
use walkdir::WalkDir;

/// Learn from local paths and populate the knowledge base.
///
/// Files that fail to parse are skipped and counted. Re-learning a path
/// replaces its previous chunks.
pub async fn learn(
    workspace: &Path,
    options: LearnOptions,
    api_key: Option<&str>,
) -> AppResult<LearnStats> {
    let start = Instant::now();

    tracing::info!("Starting learn operation for base '{}'", options.base_name);

    let config = config::load_config(workspace, &options.base_name)?;
    let embedder = embeddings::create_provider(&config, api_key)?;

    let index_path = config::get_index_path(workspace, &options.base_name);
    let conn = index::init_index(&index_path)?;

    if options.reset {
        tracing::info!("Resetting knowledge base");
        index::reset_index(&conn)?;
    }

    let mut files = Vec::new();
    for path in &options.paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            files.extend(
                WalkDir::new(path)
                    .follow_links(false)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
                    .filter(|p| should_include(p, &options)),
            );
        } else {
            return Err(AppError::Knowledge(format!(
                "Path does not exist: {}",
                path.display()
            )));
        }
    }

    let mut stats = LearnStats {
        sources_count: 0,
        chunks_count: 0,
        skipped_count: 0,
        bytes_processed: 0,
        duration_secs: 0.0,
    };

    for file in &files {
        let text = match parser::parse_file(file) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %file.display(), "Skipping file: {}", e);
                stats.skipped_count += 1;
                continue;
            }
        };

        let chunks = process_file(&conn, embedder.as_ref(), &config, file, &text).await?;
        stats.sources_count += 1;
        stats.chunks_count += chunks;
        stats.bytes_processed += text.len() as u64;
    }

    config::save_config(workspace, &config)?;

    stats.duration_secs = start.elapsed().as_secs_f64();

    tracing::info!(
        "Learn operation completed: {} sources, {} chunks, {} skipped, {} bytes in {:.2}s",
        stats.sources_count,
        stats.chunks_count,
        stats.skipped_count,
        stats.bytes_processed,
        stats.duration_secs
    );

    Ok(stats)
}

/// Chunk, embed and store one parsed file. Returns the chunk count.
async fn process_file(
    conn: &rusqlite::Connection,
    embedder: &dyn EmbeddingProvider,
    config: &KnowledgeBaseConfig,
    path: &Path,
    text: &str,
) -> AppResult<u32> {
    tracing::debug!("Processing file: {:?}", path);

    let size_bytes = text.len() as u64;
    let path_str = path.to_string_lossy().to_string();

    let candidates = chunker::chunk_text(
        text,
        config.chunk_size as usize,
        config.chunk_overlap as usize,
    )?;

    let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(config.batch_size.max(1) as usize) {
        vectors.extend(embedder.embed_batch(batch).await?);
    }

    if vectors.len() != candidates.len() {
        return Err(AppError::Knowledge(format!(
            "Expected {} embeddings, got {}",
            candidates.len(),
            vectors.len()
        )));
    }

    let removed = index::remove_source_by_path(conn, &path_str)?;
    if removed > 0 {
        tracing::debug!("Replaced previous version of {}", path_str);
    }

    let source_id = uuid::Uuid::new_v4().to_string();
    index::insert_source(
        conn,
        &KnowledgeSource {
            id: source_id.clone(),
            path: path_str.clone(),
            content_type: parser::ContentType::from_path(path).as_str().to_string(),
            learned_at: Utc::now(),
            size_bytes,
        },
    )?;

    let chunks_count = candidates.len() as u32;
    for (candidate, embedding) in candidates.into_iter().zip(vectors) {
        index::insert_chunk(
            conn,
            &KnowledgeChunk {
                id: uuid::Uuid::new_v4().to_string(),
                source_id: source_id.clone(),
                source: path_str.clone(),
                position: candidate.position,
                text: candidate.text,
                embedding: Some(embedding),
            },
        )?;
    }

    tracing::debug!(
        "Processed {:?}: {} chunks, {} bytes",
        path,
        chunks_count,
        size_bytes
    );

    Ok(chunks_count)
}

/// Check if a file should be included based on substring patterns.
fn should_include(path: &Path, options: &LearnOptions) -> bool {
    let path_str = path.to_string_lossy();

    if options.exclude.iter().any(|p| path_str.contains(p.as_str())) {
        return false;
    }

    options.include.is_empty() || options.include.iter().any(|p| path_str.contains(p.as_str()))
}

/// Search a knowledge base directly, returning documents with scores.
pub async fn search(
    workspace: &Path,
    options: SearchOptions,
    api_key: Option<&str>,
) -> AppResult<SearchResult> {
    tracing::info!(
        "Searching knowledge base '{}' with query: {}",
        options.base_name,
        options.query
    );

    let retriever = VectorRetriever::open(workspace, &options.base_name, api_key)?;
    retriever.search_scored(&options.query, options.top_k).await
}

/// Clean (reset) a knowledge base.
pub fn clean(workspace: &Path, base_name: &str) -> AppResult<()> {
    tracing::info!("Cleaning knowledge base '{}'", base_name);

    let index_path = config::get_index_path(workspace, base_name);
    if !index_path.exists() {
        return Err(AppError::Knowledge(format!(
            "Knowledge base '{}' does not exist",
            base_name
        )));
    }

    let conn = index::init_index(&index_path)?;
    index::reset_index(&conn)?;

    tracing::info!("Knowledge base '{}' cleaned", base_name);
    Ok(())
}

/// Get statistics for a knowledge base.
pub fn stats(workspace: &Path, base_name: &str) -> AppResult<BaseStats> {
    let index_path = config::get_index_path(workspace, base_name);
    if !index_path.exists() {
        return Err(AppError::Knowledge(format!(
            "Knowledge base '{}' does not exist",
            base_name
        )));
    }

    let conn = index::init_index(&index_path)?;
    let (sources_count, chunks_count) = index::get_stats(&conn)?;
    let last_learn_at = index::last_learned_at(&conn)?;

    let db_size_bytes = std::fs::metadata(&index_path).map(|m| m.len()).unwrap_or(0);

    Ok(BaseStats {
        base_name: base_name.to_string(),
        sources_count,
        chunks_count,
        db_size_bytes,
        last_learn_at,
    })
}
