//! Text chunking with configurable size and overlap.
//!
//! Splitting follows semantic boundaries (paragraphs, then sentences, then
//! words) so statute articles are kept together where they fit.

use crate::types::ChunkCandidate;
use taxbot_core::{AppError, AppResult};
use text_splitter::{ChunkConfig, TextSplitter};

/// Chunk text into overlapping segments of at most `chunk_size` characters.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> AppResult<Vec<ChunkCandidate>> {
    if text.trim().is_empty() {
        return Ok(vec![]);
    }

    let config = ChunkConfig::new(chunk_size)
        .with_overlap(overlap)
        .map_err(|e| AppError::Knowledge(format!("Invalid chunk configuration: {}", e)))?;
    let splitter = TextSplitter::new(config);

    let chunks: Vec<ChunkCandidate> = splitter
        .chunks(text)
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .enumerate()
        .map(|(position, chunk)| ChunkCandidate {
            position: position as u32,
            text: chunk.to_string(),
        })
        .collect();

    tracing::debug!(
        "Chunked text into {} chunks (size: {}, overlap: {})",
        chunks.len(),
        chunk_size,
        overlap
    );

    Ok(chunks)
}
